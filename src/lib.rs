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

//! TRINCI price oracle node.
//!
//! Every node observes exchange prices and agrees, without any direct
//! coordination protocol, on which node publishes the price of a market next.
//! Agreement derives from public blockchain state (last publication block
//! hash, selected oracles and their stakes) fed into a deterministic
//! selection algorithm, with a staggered fallback when the leader is silent.

// External crates macros.
#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

// Public modules.
pub mod base;
pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod oracle;

// Optional public modules.
#[cfg(feature = "rest")]
pub mod rest;

pub use base::schema::{ExchangePrice, Market, Participant, PriceSample, RoundInfo, Snapshot};
pub use chain::{BlockchainClient, PublishPriceTx, Registry};
pub use consensus::{OracleTurn, PublishPriceParams, TurnConfig, TurnDecision};
pub use crypto::{Address, Hash, KeyPair, Signature};
pub use error::{Error, ErrorKind, Result};
pub use oracle::{OracleConfig, OracleService};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
pub const VERSION_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
pub const VERSION_PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");
