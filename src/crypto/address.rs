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

//! Account address: the trailing 20 bytes of the Keccak-256 hash of an
//! uncompressed secp256k1 public key.
//!
//! Addresses order as 160-bit big-endian unsigned integers, which is the order
//! the publication contract expects signatures to be sorted by.

use crate::{crypto::Hash, Error, ErrorKind, Result};
use serde::{de::Visitor, Deserializer, Serializer};

/// Address length in bytes.
pub const ADDRESS_LEN: usize = 20;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Address(bytes)
    }

    /// The all-zero address, used by the chain to mean "unset".
    pub const fn zero() -> Self {
        Address([0; ADDRESS_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let buf: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| Error::new_ext(ErrorKind::MalformedData, "bad address length"))?;
        Ok(Address(buf))
    }

    /// Parses a hex address, with or without `0x` prefix, any letter case.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        let hex = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .unwrap_or(hex);
        let buf = hex::decode(hex).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Self::from_bytes(&buf)
    }

    /// Address owning the given uncompressed public key (64 bytes, without
    /// the `0x04` SEC1 tag).
    pub fn from_public_key(public: &[u8]) -> Self {
        let hash = Hash::from_data(public);
        let mut buf = [0; ADDRESS_LEN];
        buf.copy_from_slice(&hash.as_bytes()[12..]);
        Address(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex representation, without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AddressVisitor;

        impl<'v> Visitor<'v> for AddressVisitor {
            type Value = Address;

            fn expecting(
                &self,
                fmt: &mut std::fmt::Formatter<'_>,
            ) -> std::result::Result<(), std::fmt::Error> {
                write!(fmt, "expecting hex address string.")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Address::from_hex(value)
                    .map_err(|_err| serde::de::Error::custom("Invalid address"))
            }
        }
        deserializer.deserialize_str(AddressVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_any_case_and_prefix() {
        let a = Address::from_hex("0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1").unwrap();
        let b = Address::from_hex("90f8bf6a479f320ead074411a4b0e7944ea8c9c1").unwrap();
        let c: Address = "0X90F8BF6A479F320EAD074411A4B0E7944EA8C9C1".parse().unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1");
    }

    #[test]
    fn bad_length() {
        let err = Address::from_hex("0x90f8bf6a").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn order_is_numeric() {
        let low = Address::from_hex("0x00000000000000000000000000000000000000ff").unwrap();
        let mid = Address::from_hex("0x0000000000000000000000000000000000000100").unwrap();
        let high = Address::from_hex("0xff00000000000000000000000000000000000000").unwrap();

        let mut addrs = vec![high, low, mid];
        addrs.sort();

        assert_eq!(addrs, vec![low, mid, high]);
    }

    #[test]
    fn zero_address() {
        assert!(Address::zero().is_zero());
        assert!(Address::default().is_zero());
        assert!(!Address::new([1; ADDRESS_LEN]).is_zero());
    }

    #[test]
    fn serde_as_prefixed_hex() {
        let addr = Address::new([0xab; ADDRESS_LEN]);

        let json = serde_json::to_string(&addr).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();

        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        assert_eq!(back, addr);
    }
}
