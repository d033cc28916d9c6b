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

//! Opaque cryptographic secure hash used by the overall project.
//!
//! Current implementation uses Keccak-256, the hash function of the chain the
//! oracles publish to. Hashes are 32 bytes wide and are rendered as lowercase
//! hex strings when serialized.

use crate::{Error, ErrorKind, Result};
use serde::{de::Visitor, Deserializer, Serializer};
use sha3::{Digest, Keccak256};

/// Hash length in bytes.
pub const HASH_LEN: usize = 32;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Default, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Creates a new instance by wrapping precomputed hash bytes.
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Construct from a bytes slice. The slice must be exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| Error::new_ext(ErrorKind::MalformedData, "bad hash length"))?;
        Ok(Hash(buf))
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Compute hash from arbitrary data.
    pub fn from_data(data: &[u8]) -> Self {
        let digest = Keccak256::digest(data);
        let mut buf = [0; HASH_LEN];
        buf.copy_from_slice(digest.as_slice());
        Hash(buf)
    }

    /// Creates a new instance from a hex string, with or without `0x` prefix.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        match hex::decode(hex) {
            Ok(buf) => Self::from_bytes(&buf),
            Err(_) => Err(Error::new(ErrorKind::MalformedData)),
        }
    }

    /// Lowercase hex representation, without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Get a reference to the inner bytes array.
impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl serde::Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HashVisitor;

        impl<'v> Visitor<'v> for HashVisitor {
            type Value = Hash;

            fn expecting(
                &self,
                fmt: &mut std::fmt::Formatter<'_>,
            ) -> std::result::Result<(), std::fmt::Error> {
                write!(fmt, "expecting hex string.")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Hash::from_hex(value).map_err(|_err| serde::de::Error::custom("Invalid hash"))
            }
        }
        deserializer.deserialize_str(HashVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_HASH_HEX: &str = "1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8";
    const EMPTY_HASH_HEX: &str = "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470";

    #[test]
    fn keccak_known_vectors() {
        assert_eq!(Hash::from_data(b"hello").to_hex(), HELLO_HASH_HEX);
        assert_eq!(Hash::from_data(b"").to_hex(), EMPTY_HASH_HEX);
    }

    #[test]
    fn from_hex_accepts_prefix() {
        let plain = Hash::from_hex(HELLO_HASH_HEX).unwrap();
        let prefixed = Hash::from_hex(&format!("0x{}", HELLO_HASH_HEX)).unwrap();

        assert_eq!(plain, prefixed);
        assert_eq!(plain.to_string(), format!("0x{}", HELLO_HASH_HEX));
    }

    #[test]
    fn from_bytes_bad_length() {
        let err = Hash::from_bytes(&[0; 31]).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn hash_serialize() {
        let hash = Hash::from_hex(HELLO_HASH_HEX).unwrap();

        let buf = serde_json::to_string(&hash).unwrap();

        assert_eq!(buf, format!("\"{}\"", HELLO_HASH_HEX));
    }

    #[test]
    fn hash_deserialize() {
        let expected = Hash::from_hex(HELLO_HASH_HEX).unwrap();

        let hash: Hash = serde_json::from_str(&format!("\"0x{}\"", HELLO_HASH_HEX)).unwrap();

        assert_eq!(hash, expected);
    }
}
