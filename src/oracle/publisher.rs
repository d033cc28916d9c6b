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

//! Publication loop of a market.

use super::{
    config::{ConfigKey, OracleConfig},
    feeder::PriceFeeder,
    snapshot::SnapshotCache,
    task::Task,
};
use crate::{
    base::{schema::Market, Mutex},
    chain::{with_timeout, BlockchainClient, PublishPriceTx},
    consensus::{
        quorum::{check_quorum, gather_signatures},
        OracleTurn, PublishPriceParams, SignatureRequester,
    },
    crypto::KeyPair,
    Result,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Wait before retrying a failed publication.
pub const PUBLISH_RETRY: Duration = Duration::from_secs(1);

/// Shared components of a market.
#[derive(Clone)]
pub struct MarketContext {
    pub market: Market,
    pub client: Arc<dyn BlockchainClient>,
    pub config: Arc<OracleConfig>,
    pub keypair: Arc<KeyPair>,
    pub feeder: Arc<PriceFeeder>,
    pub snapshot: Arc<SnapshotCache>,
    pub turn: Arc<Mutex<OracleTurn>>,
}

/// Publishes the market price when this node is entitled to.
pub struct CoinPairPublisher {
    ctx: MarketContext,
    requester: Arc<dyn SignatureRequester>,
}

impl CoinPairPublisher {
    pub fn new(ctx: MarketContext, requester: Arc<dyn SignatureRequester>) -> Self {
        CoinPairPublisher { ctx, requester }
    }

    /// One publication attempt. Returns the time to wait before the next.
    pub async fn run(&self) -> Result<Duration> {
        let ctx = &self.ctx;
        let interval = ctx.config.duration(ConfigKey::CoinPairLoopTaskInterval)?;
        let rpc_timeout = ctx.config.duration(ConfigKey::RpcTimeout)?;

        let round = match with_timeout(rpc_timeout, ctx.client.get_round_info(&ctx.market)).await {
            Ok(round) => round,
            Err(err) => {
                error!("{}: round info read failed: {}", ctx.market, err.to_string_full());
                return Ok(interval);
            }
        };
        if round.round == 0 {
            info!("{}: round not initialized", ctx.market);
            return Ok(interval);
        }
        let exchange_price = match ctx.feeder.get_last_price(None) {
            Some(price) if price.ts_utc > 0.0 => price,
            _ => {
                info!("{}: still no price", ctx.market);
                return Ok(interval);
            }
        };
        let snapshot = match ctx.snapshot.get() {
            Some(snapshot) => snapshot,
            None => {
                info!("{}: still no blockchain info", ctx.market);
                return Ok(interval);
            }
        };

        let conf = ctx.config.turn_config()?;
        let me = ctx.keypair.address();
        let decision = ctx
            .turn
            .lock()
            .is_oracle_turn(&conf, &snapshot, &me, exchange_price.price);
        if !decision.is_turn() {
            debug!("{}: not our turn: {}", ctx.market, decision.reason());
            return Ok(interval);
        }
        info!("{}: our turn ({})", ctx.market, decision.reason());

        let params = PublishPriceParams {
            version: ctx.config.u64(ConfigKey::MessageVersion)?,
            market: ctx.market.clone(),
            price: exchange_price.price,
            price_ts_utc: exchange_price.ts_utc,
            oracle_addr: me,
            last_pub_block: snapshot.last_pub_block,
        };
        let own = (me, ctx.keypair.sign(&params.encode())?);
        let sign_timeout = ctx.config.duration(ConfigKey::GatherSignatureTimeout)?;
        let signatures = gather_signatures(
            &*self.requester,
            &snapshot.selected_oracles,
            &params,
            own,
            sign_timeout,
        )
        .await;
        if let Err(err) = check_quorum(signatures.len(), snapshot.selected_oracles.len()) {
            error!("{}: publication aborted: {}", ctx.market, err.to_string_full());
            return Ok(PUBLISH_RETRY);
        }

        let price = params.price;
        let tx = PublishPriceTx::new(params, signatures);
        match ctx.client.publish_price(&ctx.market, tx).await {
            Ok(hash) => info!("{}: published price {} in {}", ctx.market, price, hash),
            Err(err) => {
                error!("{}: publication failed: {}", ctx.market, err.to_string_full());
                return Ok(PUBLISH_RETRY);
            }
        }
        if let Err(err) = ctx.snapshot.force_update().await {
            error!(
                "{}: blockchain info refresh failed: {}",
                ctx.market,
                err.to_string_full()
            );
        }
        Ok(interval)
    }
}

#[async_trait]
impl Task for CoinPairPublisher {
    fn name(&self) -> String {
        format!("{} publisher", self.ctx.market)
    }

    async fn tick(&self) -> Result<Duration> {
        self.run().await
    }
}
