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

//! Market set and co-sign request handling.

use super::{
    config::{ConfigKey, OracleConfig},
    feeder::{PriceFeeder, PriceSource},
    publisher::{CoinPairPublisher, MarketContext},
    snapshot::SnapshotCache,
    task::{self, Task, TaskHandle},
};
use crate::{
    base::{schema::Market, Mutex},
    chain::{with_timeout, BlockchainClient},
    consensus::{
        OracleTurn, PublishPriceParams, RequestValidation, SignRequestHandler, SignResponse,
        SignatureRequester,
    },
    crypto::{KeyPair, Signature},
    Error, ErrorKind, Result,
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

struct MarketTasks {
    ctx: MarketContext,
    handles: Vec<TaskHandle>,
}

/// Owns the markets registered on the oracle manager and their loops.
pub struct OracleWorker {
    client: Arc<dyn BlockchainClient>,
    config: Arc<OracleConfig>,
    keypair: Arc<KeyPair>,
    source: Arc<dyn PriceSource>,
    requester: Arc<dyn SignatureRequester>,
    markets: Mutex<HashMap<Market, MarketTasks>>,
}

impl OracleWorker {
    pub fn new(
        client: Arc<dyn BlockchainClient>,
        config: Arc<OracleConfig>,
        keypair: Arc<KeyPair>,
        source: Arc<dyn PriceSource>,
        requester: Arc<dyn SignatureRequester>,
    ) -> Self {
        OracleWorker {
            client,
            config,
            keypair,
            source,
            requester,
            markets: Mutex::new(HashMap::new()),
        }
    }

    /// Markets currently served.
    pub fn markets(&self) -> Vec<Market> {
        let mut markets: Vec<Market> = self.markets.lock().keys().cloned().collect();
        markets.sort();
        markets
    }

    pub fn context(&self, market: &Market) -> Option<MarketContext> {
        self.markets.lock().get(market).map(|tasks| tasks.ctx.clone())
    }

    fn start_market(&self, market: Market) -> MarketTasks {
        info!("{}: starting market", market);
        let ctx = MarketContext {
            market: market.clone(),
            client: self.client.clone(),
            config: self.config.clone(),
            keypair: self.keypair.clone(),
            feeder: Arc::new(PriceFeeder::new(
                market.clone(),
                self.source.clone(),
                self.config.clone(),
            )),
            snapshot: Arc::new(SnapshotCache::new(
                market.clone(),
                self.client.clone(),
                self.config.clone(),
            )),
            turn: Arc::new(Mutex::new(OracleTurn::new(market))),
        };
        let publisher = CoinPairPublisher::new(ctx.clone(), self.requester.clone());
        let handles = vec![
            task::spawn(ctx.feeder.clone()),
            task::spawn(ctx.snapshot.clone()),
            task::spawn(Arc::new(publisher)),
        ];
        MarketTasks { ctx, handles }
    }

    async fn stop_market(tasks: MarketTasks) {
        info!("{}: stopping market", tasks.ctx.market);
        for handle in tasks.handles {
            handle.stop().await;
        }
    }

    /// Aligns the served markets to the oracle manager coin pairs.
    pub async fn sync_markets(&self) -> Result<()> {
        let manager = self.config.address(ConfigKey::OracleManagerAddr)?;
        let rpc_timeout = self.config.duration(ConfigKey::RpcTimeout)?;
        let coin_pairs = with_timeout(rpc_timeout, self.client.get_coin_pairs(&manager)).await?;
        let listed: HashSet<&Market> = coin_pairs.iter().collect();

        let removed: Vec<MarketTasks> = {
            let mut markets = self.markets.lock();
            let stale: Vec<Market> = markets
                .keys()
                .filter(|market| !listed.contains(market))
                .cloned()
                .collect();
            stale
                .iter()
                .filter_map(|market| markets.remove(market))
                .collect()
        };
        for tasks in removed {
            Self::stop_market(tasks).await;
        }

        let mut markets = self.markets.lock();
        for market in coin_pairs.iter() {
            if !markets.contains_key(market) {
                let tasks = self.start_market(market.clone());
                markets.insert(market.clone(), tasks);
            }
        }
        Ok(())
    }

    /// Stops every market.
    pub async fn stop_all(&self) {
        let removed: Vec<MarketTasks> = self.markets.lock().drain().map(|(_, t)| t).collect();
        for tasks in removed {
            Self::stop_market(tasks).await;
        }
    }
}

#[async_trait]
impl Task for OracleWorker {
    fn name(&self) -> String {
        "main".to_string()
    }

    async fn tick(&self) -> Result<Duration> {
        self.sync_markets().await?;
        self.config.duration(ConfigKey::MainLoopTaskInterval)
    }
}

impl SignRequestHandler for OracleWorker {
    fn validate_and_sign(
        &self,
        params: PublishPriceParams,
        signature: Signature,
    ) -> Result<SignResponse> {
        let ctx = self.context(&params.market).ok_or_else(|| {
            Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("unknown market {}", params.market),
            )
        })?;
        let exchange_price = ctx.feeder.get_last_price(Some(params.price_ts_utc));
        let snapshot = ctx.snapshot.get();
        let conf = ctx.config.turn_config()?;
        let reject_delta_pct = ctx.config.decimal(ConfigKey::PriceRejectDeltaPct)?;

        let validation = RequestValidation::new(
            reject_delta_pct,
            Some(&params),
            exchange_price,
            snapshot.as_deref(),
        );
        let mut turn = ctx.turn.lock();
        let (message, own) = validation.validate_and_sign(&mut turn, &conf, &signature, &ctx.keypair)?;
        Ok(SignResponse {
            message: hex::encode(message),
            signature: own.to_hex(),
        })
    }
}
