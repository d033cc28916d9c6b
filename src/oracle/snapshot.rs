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

//! Cached blockchain view of a market.

use super::{
    config::{ConfigKey, OracleConfig},
    task::Task,
};
use crate::{
    base::{schema::Market, schema::Snapshot, Mutex, RwLock},
    chain::{with_timeout, BlockchainClient},
    Result,
};
use async_trait::async_trait;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Periodically refreshed snapshot of the market state.
///
/// The snapshot is replaced as a whole, readers get a shared reference that
/// never changes under them.
pub struct SnapshotCache {
    market: Market,
    client: Arc<dyn BlockchainClient>,
    config: Arc<OracleConfig>,
    last_update: Mutex<Option<Instant>>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new(market: Market, client: Arc<dyn BlockchainClient>, config: Arc<OracleConfig>) -> Self {
        SnapshotCache {
            market,
            client,
            config,
            last_update: Mutex::new(None),
            snapshot: RwLock::new(None),
        }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Last complete snapshot, `None` until the first refresh succeeds.
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().clone()
    }

    /// Refreshes the snapshot when the configured interval elapsed. Returns
    /// the time to wait before the next check.
    pub async fn run(&self) -> Result<Duration> {
        let interval = self.config.duration(ConfigKey::BlockchainInfoInterval)?;
        let elapsed = self.last_update.lock().map(|instant| instant.elapsed());
        if let Some(elapsed) = elapsed {
            if elapsed < interval {
                return Ok(interval - elapsed);
            }
        }
        self.force_update().await?;
        Ok(interval)
    }

    /// Refreshes the snapshot now.
    ///
    /// The update time is taken before reading so that a slow refresh is not
    /// overlapped by the next one. On any failure the previous snapshot is
    /// kept.
    pub async fn force_update(&self) -> Result<()> {
        *self.last_update.lock() = Some(Instant::now());

        let timeout = self.config.duration(ConfigKey::RpcTimeout)?;
        let client = &self.client;
        let market = &self.market;
        let (block_num, blockchain_price, last_pub_block, selected_oracles) = futures::try_join!(
            with_timeout(timeout, client.get_block_number()),
            with_timeout(timeout, client.get_price(market)),
            with_timeout(timeout, client.get_last_pub_block(market)),
            with_timeout(timeout, client.get_selected_oracles_info(market)),
        )?;
        let last_pub_block_hash = with_timeout(
            timeout,
            client.get_last_pub_block_hash(market, last_pub_block),
        )
        .await?;

        let snapshot = Snapshot {
            market: market.clone(),
            selected_oracles,
            blockchain_price,
            block_num,
            last_pub_block,
            last_pub_block_hash,
        };
        debug!(
            "{}: block {} last publication {} price {}",
            market, snapshot.block_num, snapshot.last_pub_block, snapshot.blockchain_price
        );
        *self.snapshot.write() = Some(Arc::new(snapshot));
        Ok(())
    }
}

#[async_trait]
impl Task for SnapshotCache {
    fn name(&self) -> String {
        format!("{} blockchain info", self.market)
    }

    async fn tick(&self) -> Result<Duration> {
        self.run().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        base::schema::tests::{create_test_participant, create_test_snapshot},
        chain::MockBlockchainClient,
        oracle::config::tests::create_test_config,
        Error, ErrorKind,
    };
    use async_std::task::block_on;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Client serving `create_test_snapshot` data, with the block number
    /// taken from `block`.
    pub fn create_test_client(block: Arc<AtomicU64>) -> MockBlockchainClient {
        let expected = create_test_snapshot(vec![
            create_test_participant(1, 10),
            create_test_participant(2, 20),
        ]);
        let mut client = MockBlockchainClient::new();
        client
            .expect_get_block_number()
            .returning(move || Ok(block.load(Ordering::SeqCst)));
        let price = expected.blockchain_price;
        client.expect_get_price().returning(move |_| Ok(price));
        let last_pub_block = expected.last_pub_block;
        client
            .expect_get_last_pub_block()
            .returning(move |_| Ok(last_pub_block));
        let oracles = expected.selected_oracles.clone();
        client
            .expect_get_selected_oracles_info()
            .returning(move |_| Ok(oracles.clone()));
        let hash = expected.last_pub_block_hash;
        client
            .expect_get_last_pub_block_hash()
            .returning(move |_, _| Ok(hash));
        client
    }

    fn create_cache(client: MockBlockchainClient) -> SnapshotCache {
        SnapshotCache::new(
            Market::new("BTCUSD").unwrap(),
            Arc::new(client),
            create_test_config(&[]),
        )
    }

    #[test]
    fn empty_until_first_update() {
        let cache = create_cache(create_test_client(Arc::new(AtomicU64::new(10))));
        assert!(cache.get().is_none());

        block_on(cache.force_update()).unwrap();

        let expected = create_test_snapshot(vec![
            create_test_participant(1, 10),
            create_test_participant(2, 20),
        ]);
        assert_eq!(*cache.get().unwrap(), expected);
    }

    #[test]
    fn failed_update_keeps_previous_snapshot() {
        let calls = AtomicUsize::new(0);
        let mut client = MockBlockchainClient::new();
        client.expect_get_block_number().returning(|| Ok(10));
        client.expect_get_last_pub_block().returning(|_| Ok(9));
        client
            .expect_get_selected_oracles_info()
            .returning(|_| Ok(vec![create_test_participant(1, 10)]));
        client
            .expect_get_last_pub_block_hash()
            .returning(|_, _| Ok(Default::default()));
        client
            .expect_get_price()
            .returning(move |_| match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(100),
                _ => Err(Error::new(ErrorKind::BadNetwork)),
            });
        let cache = create_cache(client);

        block_on(cache.force_update()).unwrap();
        let first = cache.get().unwrap();
        let err = block_on(cache.force_update()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::BadNetwork);
        assert!(Arc::ptr_eq(&first, &cache.get().unwrap()));
        assert_eq!(first.blockchain_price, 100);
    }

    #[test]
    fn failed_update_still_delays_next_refresh() {
        let mut client = MockBlockchainClient::new();
        client.expect_get_block_number().times(1).returning(|| Ok(10));
        client
            .expect_get_price()
            .times(1)
            .returning(|_| Err(Error::new(ErrorKind::Timeout)));
        client.expect_get_last_pub_block().times(1).returning(|_| Ok(9));
        client
            .expect_get_selected_oracles_info()
            .times(1)
            .returning(|_| Ok(vec![]));
        client.expect_get_last_pub_block_hash().never();
        let cache = create_cache(client);

        assert!(block_on(cache.force_update()).is_err());
        let wait = block_on(cache.run()).unwrap();

        assert!(wait < Duration::from_secs(3));
        assert!(cache.get().is_none());
    }

    #[test]
    fn run_waits_for_interval() {
        let mut client = MockBlockchainClient::new();
        client.expect_get_block_number().times(1).returning(|| Ok(10));
        client.expect_get_price().times(1).returning(|_| Ok(100));
        client.expect_get_last_pub_block().times(1).returning(|_| Ok(9));
        client
            .expect_get_selected_oracles_info()
            .times(1)
            .returning(|_| Ok(vec![]));
        client
            .expect_get_last_pub_block_hash()
            .times(1)
            .returning(|_, _| Ok(Default::default()));
        let cache = create_cache(client);

        let first = block_on(cache.run()).unwrap();
        let second = block_on(cache.run()).unwrap();

        assert_eq!(first, Duration::from_secs(3));
        assert!(second <= first);
        assert!(cache.get().is_some());
    }
}
