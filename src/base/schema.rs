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

//! Oracle node data model.

use crate::{
    crypto::{Address, Hash},
    Error, ErrorKind, Result,
};
use std::fmt::{Display, Formatter};

/// Width of the on-chain market identifier.
pub const MARKET_BYTES_LEN: usize = 32;

/// Asset pair being priced, e.g. "BTCUSD".
///
/// On-chain it is a fixed 32 bytes ASCII string right padded with zeros, in
/// memory a trimmed string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Market(String);

impl Market {
    /// Creates a market from its name. The name must be non-empty printable
    /// ASCII no longer than 32 bytes.
    ///
    /// # Example
    ///
    /// ```
    /// # use trinci_oracle::base::schema::Market;
    /// let market = Market::new("BTCUSD").unwrap();
    /// assert_eq!(market.as_str(), "BTCUSD");
    /// assert!(Market::new("ŁUSD").is_err());
    /// ```
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty()
            || name.len() > MARKET_BYTES_LEN
            || !name.bytes().all(|b| b.is_ascii_graphic())
        {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("bad market name: {:?}", name),
            ));
        }
        Ok(Market(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed width on-chain representation.
    pub fn to_bytes32(&self) -> [u8; MARKET_BYTES_LEN] {
        let mut buf = [0; MARKET_BYTES_LEN];
        buf[..self.0.len()].copy_from_slice(self.0.as_bytes());
        buf
    }

    /// Parses the on-chain representation, trailing zeros are trimmed.
    pub fn from_bytes32(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MARKET_BYTES_LEN {
            return Err(Error::new_ext(ErrorKind::MalformedData, "bad market length"));
        }
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |pos| pos + 1);
        let name = std::str::from_utf8(&bytes[..end])
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Market::new(name)
    }
}

impl TryFrom<String> for Market {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Market::new(&name)
    }
}

impl From<Market> for String {
    fn from(market: Market) -> String {
        market.0
    }
}

impl std::str::FromStr for Market {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Market::new(s)
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Oracle eligible for selection in the current round.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Participant {
    /// Oracle signing address.
    pub addr: Address,
    /// Base URL of the oracle co-sign endpoint.
    pub internet_name: String,
    /// Staked amount.
    pub stake: u128,
    /// Oracle owner.
    pub owner: Address,
    /// Reward points collected in the round.
    pub points: u64,
    /// Selected for the round in progress.
    pub selected_in_current_round: bool,
    /// Round number the oracle was selected in.
    pub selected_in_round: u64,
}

/// Market round state as stored on-chain.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct RoundInfo {
    /// Round number, zero when the market was never initialized.
    pub round: u64,
    pub start_block: u64,
    pub lock_period_end_block: u64,
    pub total_points: u64,
    pub selected_oracles: Vec<Address>,
}

/// Blockchain facts a turn decision is based on, all read by the same
/// refresh.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Snapshot {
    pub market: Market,
    /// Oracles selected for the round, in contract order.
    pub selected_oracles: Vec<Participant>,
    /// Last price published on-chain.
    pub blockchain_price: u128,
    /// Chain height at refresh time.
    pub block_num: u64,
    /// Block of the last publication.
    pub last_pub_block: u64,
    /// Hash of `last_pub_block`, the shared selection seed.
    pub last_pub_block_hash: Hash,
}

impl Snapshot {
    /// Participant entry with the given address, if any.
    pub fn participant(&self, addr: &Address) -> Option<&Participant> {
        self.selected_oracles.iter().find(|p| p.addr == *addr)
    }

    /// True if `addr` is one of the oracles selected for the round in progress.
    pub fn is_selected(&self, addr: &Address) -> bool {
        self.selected_oracles
            .iter()
            .any(|p| p.addr == *addr && p.selected_in_current_round)
    }
}

/// Aggregated exchange price.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub struct ExchangePrice {
    /// Fixed point price.
    pub price: u128,
    /// Observation time, UTC seconds.
    pub ts_utc: f64,
}

/// Single exchange price observation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PriceSample {
    /// Exchange name.
    pub name: String,
    /// Fixed point price.
    pub price: u128,
    /// Exchange weight within the aggregation.
    pub weight: f64,
    /// Observation time, UTC seconds.
    pub ts_utc: f64,
}
