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

//! Blockchain collaborators.
//!
//! The node never talks to the chain directly: every read and write goes
//! through a `BlockchainClient` (oracle manager and per-market contracts) or a
//! `Registry` (on-chain configuration), injected at construction.

use crate::{
    base::schema::{Market, Participant, RoundInfo},
    consensus::PublishPriceParams,
    crypto::{Address, Hash, Signature},
    Error, ErrorKind, Result,
};
use async_trait::async_trait;
use std::{future::Future, time::Duration};

#[cfg(test)]
use mockall::automock;

/// Blockchain access required by the oracle node.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockchainClient: Send + Sync + 'static {
    /// Markets registered on the oracle manager contract.
    async fn get_coin_pairs(&self, oracle_manager: &Address) -> Result<Vec<Market>>;

    /// Current chain height.
    async fn get_block_number(&self) -> Result<u64>;

    /// Round state of the given market.
    async fn get_round_info(&self, market: &Market) -> Result<RoundInfo>;

    /// Last price published for the given market.
    async fn get_price(&self, market: &Market) -> Result<u128>;

    /// Block of the last publication for the given market.
    async fn get_last_pub_block(&self, market: &Market) -> Result<u64>;

    /// Hash of the given block.
    async fn get_last_pub_block_hash(&self, market: &Market, block: u64) -> Result<Hash>;

    /// Oracles selected for the market round, with their stakes.
    async fn get_selected_oracles_info(&self, market: &Market) -> Result<Vec<Participant>>;

    /// Submits a publication and waits for its receipt. Returns the
    /// transaction hash.
    async fn publish_price(&self, market: &Market, tx: PublishPriceTx) -> Result<Hash>;
}

/// On-chain configuration registry.
///
/// Unset entries read as zero.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    async fn get_uint(&self, key: &Hash) -> Result<u128>;

    /// Decimal as `(base, exponent)`, meaning `base * 10^exponent`.
    async fn get_decimal(&self, key: &Hash) -> Result<(i128, i32)>;

    async fn get_address(&self, key: &Hash) -> Result<Address>;
}

/// Bounds a blockchain read to `timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match async_std::future::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::new_ext(
            ErrorKind::Timeout,
            format!("blockchain read exceeded {:?}", timeout),
        )),
    }
}

/// Publication transaction payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPriceTx {
    pub params: PublishPriceParams,
    /// Co-signatures, sorted by signer address.
    pub signatures: Vec<(Address, Signature)>,
}

impl PublishPriceTx {
    /// Builds the payload sorting the signatures by signer address.
    pub fn new(params: PublishPriceParams, mut signatures: Vec<(Address, Signature)>) -> Self {
        signatures.sort_by(|a, b| a.0.cmp(&b.0));
        PublishPriceTx { params, signatures }
    }

    /// Signatures split in the `v`, `r` and `s` arrays taken by the contract.
    #[allow(clippy::type_complexity)]
    pub fn v_r_s(&self) -> (Vec<u8>, Vec<[u8; 32]>, Vec<[u8; 32]>) {
        let v = self.signatures.iter().map(|(_, sig)| sig.v()).collect();
        let r = self.signatures.iter().map(|(_, sig)| sig.r()).collect();
        let s = self.signatures.iter().map(|(_, sig)| sig.s()).collect();
        (v, r, s)
    }

    /// Signers in submission order.
    pub fn signers(&self) -> Vec<Address> {
        self.signatures.iter().map(|(addr, _)| *addr).collect()
    }
}
