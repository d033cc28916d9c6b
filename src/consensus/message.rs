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

//! Publication request and its canonical encoding.
//!
//! The canonical message is what every co-signer signs and what the contract
//! verifies: the big-endian concatenation of
//!
//! | field            | bytes |
//! |------------------|-------|
//! | version          | 32    |
//! | market           | 32    |
//! | price            | 32    |
//! | requester        | 20    |
//! | last pub block   | 32    |

use crate::{
    base::schema::{Market, MARKET_BYTES_LEN},
    crypto::{address::ADDRESS_LEN, Address, Signature},
    Error, ErrorKind, Result,
};

/// Width of an on-chain unsigned integer.
const UINT_LEN: usize = 32;

/// Canonical message length.
pub const MESSAGE_LEN: usize = UINT_LEN + MARKET_BYTES_LEN + UINT_LEN + ADDRESS_LEN + UINT_LEN;

/// Publication request.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PublishPriceParams {
    /// Message protocol version.
    pub version: u64,
    pub market: Market,
    /// Fixed point price.
    pub price: u128,
    /// When the requester observed the price, UTC seconds. Not signed.
    pub price_ts_utc: f64,
    /// Requester address.
    pub oracle_addr: Address,
    /// Last publication block as seen by the requester.
    pub last_pub_block: u64,
}

fn put_uint(buf: &mut Vec<u8>, value: u128) {
    buf.extend_from_slice(&[0; UINT_LEN - 16]);
    buf.extend_from_slice(&value.to_be_bytes());
}

fn get_uint(bytes: &[u8]) -> Result<u128> {
    let (high, low) = bytes.split_at(UINT_LEN - 16);
    if high.iter().any(|b| *b != 0) {
        return Err(Error::new_ext(ErrorKind::MalformedData, "integer overflow"));
    }
    let mut buf = [0; 16];
    buf.copy_from_slice(low);
    Ok(u128::from_be_bytes(buf))
}

fn get_u64(bytes: &[u8]) -> Result<u64> {
    let value = get_uint(bytes)?;
    u64::try_from(value).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

impl PublishPriceParams {
    /// Canonical message bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MESSAGE_LEN);
        put_uint(&mut buf, self.version as u128);
        buf.extend_from_slice(&self.market.to_bytes32());
        put_uint(&mut buf, self.price);
        buf.extend_from_slice(self.oracle_addr.as_bytes());
        put_uint(&mut buf, self.last_pub_block as u128);
        buf
    }

    /// Canonical message as lowercase hex, without prefix.
    pub fn encode_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Parses a canonical message. The price timestamp is not part of the
    /// message and is set to zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MESSAGE_LEN {
            return Err(Error::new_ext(ErrorKind::MalformedData, "bad message length"));
        }
        let (version, rest) = bytes.split_at(UINT_LEN);
        let (market, rest) = rest.split_at(MARKET_BYTES_LEN);
        let (price, rest) = rest.split_at(UINT_LEN);
        let (oracle_addr, last_pub_block) = rest.split_at(ADDRESS_LEN);
        Ok(PublishPriceParams {
            version: get_u64(version)?,
            market: Market::from_bytes32(market)?,
            price: get_uint(price)?,
            price_ts_utc: 0.0,
            oracle_addr: Address::from_bytes(oracle_addr)?,
            last_pub_block: get_u64(last_pub_block)?,
        })
    }
}

/// Co-sign request form body.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SignRequestForm {
    pub version: String,
    pub coin_pair: String,
    pub price: String,
    pub price_timestamp: String,
    pub oracle_addr: String,
    pub last_pub_block: String,
    /// Requester signature of the canonical message.
    #[serde(alias = "other_signature")]
    pub signature: String,
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::new_ext(ErrorKind::MalformedData, format!("bad {}", name)))
}

impl SignRequestForm {
    pub fn new(params: &PublishPriceParams, signature: &Signature) -> Self {
        SignRequestForm {
            version: params.version.to_string(),
            coin_pair: params.market.to_string(),
            price: params.price.to_string(),
            price_timestamp: params.price_ts_utc.to_string(),
            oracle_addr: params.oracle_addr.to_string(),
            last_pub_block: params.last_pub_block.to_string(),
            signature: signature.to_hex(),
        }
    }

    /// Typed request and requester signature.
    pub fn parse(&self) -> Result<(PublishPriceParams, Signature)> {
        let params = PublishPriceParams {
            version: parse_field("version", &self.version)?,
            market: Market::new(self.coin_pair.trim())?,
            price: parse_field("price", &self.price)?,
            price_ts_utc: parse_field("price_timestamp", &self.price_timestamp)?,
            oracle_addr: Address::from_hex(&self.oracle_addr)?,
            last_pub_block: parse_field("last_pub_block", &self.last_pub_block)?,
        };
        let signature = Signature::from_hex(&self.signature)?;
        Ok((params, signature))
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn to_urlencoded(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("version", &self.version)
            .append_pair("coin_pair", &self.coin_pair)
            .append_pair("price", &self.price)
            .append_pair("price_timestamp", &self.price_timestamp)
            .append_pair("oracle_addr", &self.oracle_addr)
            .append_pair("last_pub_block", &self.last_pub_block)
            .append_pair("signature", &self.signature)
            .finish()
    }
}

/// Co-sign response body.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SignResponse {
    /// Canonical message, hex without prefix.
    pub message: String,
    /// Co-signer signature, `0x` prefixed hex.
    pub signature: String,
}
