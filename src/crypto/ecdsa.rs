// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Secp256k1 ECDSA with public key recovery.
//!
//! Prices are signed as "personal messages": the signed digest is
//! `keccak256("\x19Ethereum Signed Message:\n" || len(msg) || msg)`, where
//! `len(msg)` is the decimal byte length. Signatures are serialized as the 65
//! bytes `r || s || v` with `v` in `{27, 28}`.

use crate::{
    crypto::{Address, Hash},
    Error, ErrorKind, Result,
};
use k256::{
    ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use serde::{de::Visitor, Deserializer, Serializer};

/// Serialized signature length.
pub const SIGNATURE_LEN: usize = 65;

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Offset added to the recovery id in the serialized `v` byte.
const RECOVERY_ID_OFFSET: u8 = 27;

/// Digest actually signed for a personal message.
pub fn personal_message_hash(message: &[u8]) -> Hash {
    let len = message.len().to_string();
    let mut buf = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + len.len() + message.len());
    buf.extend_from_slice(PERSONAL_MESSAGE_PREFIX);
    buf.extend_from_slice(len.as_bytes());
    buf.extend_from_slice(message);
    Hash::from_data(&buf)
}

/// Recoverable signature, `r || s || v`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| Error::new_ext(ErrorKind::MalformedData, "bad signature length"))?;
        Ok(Signature(buf))
    }

    /// Parses a hex signature, with or without `0x` prefix.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let buf = hex::decode(hex).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Self::from_bytes(&buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `0x` prefixed lowercase hex representation.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn r(&self) -> [u8; 32] {
        let mut r = [0; 32];
        r.copy_from_slice(&self.0[..32]);
        r
    }

    pub fn s(&self) -> [u8; 32] {
        let mut s = [0; 32];
        s.copy_from_slice(&self.0[32..64]);
        s
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    fn recovery_id(&self) -> Result<RecoveryId> {
        let v = self.v();
        let id = if v >= RECOVERY_ID_OFFSET {
            v - RECOVERY_ID_OFFSET
        } else {
            v
        };
        RecoveryId::from_byte(id)
            .ok_or_else(|| Error::new_ext(ErrorKind::MalformedData, "bad recovery id"))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl serde::Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SignatureVisitor;

        impl<'v> Visitor<'v> for SignatureVisitor {
            type Value = Signature;

            fn expecting(
                &self,
                fmt: &mut std::fmt::Formatter<'_>,
            ) -> std::result::Result<(), std::fmt::Error> {
                write!(fmt, "expecting hex signature string.")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Signature::from_hex(value)
                    .map_err(|_err| serde::de::Error::custom("Invalid signature"))
            }
        }
        deserializer.deserialize_str(SignatureVisitor)
    }
}

/// Node signing key.
pub struct KeyPair {
    imp: SigningKey,
    address: Address,
}

impl KeyPair {
    /// Load keypair from the 32 bytes private scalar.
    pub fn from_private_bytes(bytes: &[u8]) -> Result<KeyPair> {
        let imp =
            SigningKey::from_slice(bytes).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        let address = verifying_key_address(imp.verifying_key());
        Ok(KeyPair { imp, address })
    }

    /// Load keypair from the hex encoded private scalar.
    pub fn from_private_hex(hex: &str) -> Result<KeyPair> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let buf = hex::decode(hex).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Self::from_private_bytes(&buf)
    }

    /// Address owning this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs `message` as a personal message.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let digest = personal_message_hash(message);
        let (sig, id) = self
            .imp
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|err| Error::new_ext(ErrorKind::Other, err))?;
        let mut buf = [0; SIGNATURE_LEN];
        buf[..64].copy_from_slice(sig.to_bytes().as_slice());
        buf[64] = id.to_byte() + RECOVERY_ID_OFFSET;
        Ok(Signature(buf))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.address)
    }
}

fn verifying_key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the SEC1 uncompressed tag.
    Address::from_public_key(&point.as_bytes()[1..])
}

/// Recovers the address that signed `message` as a personal message.
pub fn recover(message: &[u8], sig: &Signature) -> Result<Address> {
    let digest = personal_message_hash(message);
    let ecdsa_sig = EcdsaSignature::from_slice(&sig.as_bytes()[..64])
        .map_err(|err| Error::new_ext(ErrorKind::InvalidSignature, err))?;
    let id = sig.recovery_id()?;
    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &ecdsa_sig, id)
        .map_err(|err| Error::new_ext(ErrorKind::InvalidSignature, err))?;
    Ok(verifying_key_address(&key))
}

/// Checks that `sig` is a signature of `message` by `address`.
pub fn verify(address: &Address, message: &[u8], sig: &Signature) -> bool {
    matches!(recover(message, sig), Ok(signer) if signer == *address)
}
