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

//! Exchange price aggregation.

use super::{
    config::{ConfigKey, OracleConfig},
    task::Task,
};
use crate::{
    base::{
        price_queue::PriceQueue,
        schema::{ExchangePrice, Market, PriceSample},
        Mutex,
    },
    Result,
};
use async_trait::async_trait;
use std::{collections::HashMap, convert::TryFrom, sync::Arc, time::Duration};

#[cfg(test)]
use mockall::automock;

/// Exchange prices provider.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    /// Current samples of `market`, one per exchange, with prices scaled to
    /// `digits` decimal digits.
    async fn fetch(&self, market: &Market, digits: u32) -> Result<Vec<PriceSample>>;
}

/// Index of the weighted median of `(price, weight)` pairs.
///
/// When the cumulative weight lands exactly on one half the lower price is
/// taken. Returns `None` without a positive total weight.
pub fn weighted_median_idx(values: &[(u128, f64)]) -> Option<usize> {
    let total: f64 = values.iter().map(|(_, weight)| *weight).sum();
    if total.is_nan() || total <= 0.0 {
        return None;
    }
    let mut sorted: Vec<usize> = (0..values.len()).collect();
    sorted.sort_by_key(|idx| values[*idx].0);

    let mut cumulative = 0.0;
    for idx in sorted.iter() {
        cumulative += values[*idx].1 / total;
        if cumulative >= 0.5 {
            return Some(*idx);
        }
    }
    sorted.last().copied()
}

/// Keeps the recent samples of every exchange of a market.
pub struct PriceFeeder {
    market: Market,
    source: Arc<dyn PriceSource>,
    config: Arc<OracleConfig>,
    queues: Mutex<HashMap<String, PriceQueue<PriceSample>>>,
}

impl PriceFeeder {
    pub fn new(market: Market, source: Arc<dyn PriceSource>, config: Arc<OracleConfig>) -> Self {
        PriceFeeder {
            market,
            source,
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Stores fresh samples, discarding the unusable ones.
    pub fn push(&self, samples: Vec<PriceSample>) {
        let capacity = self
            .config
            .uint(ConfigKey::QueueLen)
            .ok()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(1);
        let mut queues = self.queues.lock();
        for sample in samples {
            if sample.price == 0 || sample.ts_utc <= 0.0 || sample.weight.is_nan() || sample.weight < 0.0 {
                warn!("{}: discarding sample {:?}", self.market, sample);
                continue;
            }
            let queue = queues
                .entry(sample.name.clone())
                .or_insert_with(|| PriceQueue::new(capacity));
            if queue.capacity() != capacity {
                queue.set_capacity(capacity);
            }
            trace!(
                "{}: {} -> {} at {} ({} queued)",
                self.market,
                sample.name,
                sample.price,
                sample.ts_utc,
                queue.len()
            );
            queue.push(sample);
        }
    }

    /// Weighted median over the exchanges.
    ///
    /// Each exchange contributes its sample nearest to `target_ts`, or its
    /// latest one when `None`.
    pub fn get_last_price(&self, target_ts: Option<f64>) -> Option<ExchangePrice> {
        let queues = self.queues.lock();
        let samples: Vec<&PriceSample> = queues
            .values()
            .filter_map(|queue| match target_ts {
                Some(ts) => queue.nearest(ts),
                None => queue.latest(),
            })
            .collect();
        let values: Vec<(u128, f64)> = samples.iter().map(|s| (s.price, s.weight)).collect();
        let median = samples[weighted_median_idx(&values)?];
        debug!(
            "{}: median {} from {} at {}",
            self.market, median.price, median.name, median.ts_utc
        );
        Some(ExchangePrice {
            price: median.price,
            ts_utc: median.ts_utc,
        })
    }

    /// Fetches and stores one round of samples. Returns their number.
    pub async fn fetch(&self) -> Result<usize> {
        let digits = u32::try_from(self.config.uint(ConfigKey::PriceDigits)?).unwrap_or(u32::MAX);
        let samples = self.source.fetch(&self.market, digits).await?;
        let count = samples.len();
        self.push(samples);
        Ok(count)
    }
}

#[async_trait]
impl Task for PriceFeeder {
    fn name(&self) -> String {
        format!("{} price feeder", self.market)
    }

    async fn tick(&self) -> Result<Duration> {
        self.fetch().await?;
        self.config.duration(ConfigKey::PriceFetchRate)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::oracle::config::tests::create_test_config;
    use async_std::task::block_on;

    const E16: u128 = 10_000_000_000_000_000;

    pub fn sample(name: &str, price: u128, weight: f64, ts_utc: f64) -> PriceSample {
        PriceSample {
            name: name.to_string(),
            price,
            weight,
            ts_utc,
        }
    }

    fn create_feeder(source: MockPriceSource, queue_len: &str) -> PriceFeeder {
        PriceFeeder::new(
            Market::new("BTCUSD").unwrap(),
            Arc::new(source),
            create_test_config(&[("ORACLE_QUEUE_LEN", queue_len)]),
        )
    }

    #[test]
    fn weighted_median() {
        let values = [
            (725010 * E16, 0.1605),
            (728381 * E16, 0.2782),
            (728625 * E16, 0.3475),
            (798415 * E16, 0.2138),
        ];
        assert_eq!(weighted_median_idx(&values), Some(2));

        let unsorted = [(3, 0.3), (1, 0.1), (0, 0.6)];
        assert_eq!(weighted_median_idx(&unsorted), Some(2));
    }

    #[test]
    fn weighted_median_half_takes_lower() {
        assert_eq!(weighted_median_idx(&[(20, 1.0), (10, 1.0)]), Some(1));
        assert_eq!(weighted_median_idx(&[(10, 0.0), (20, 0.0)]), None);
        assert_eq!(weighted_median_idx(&[]), None);
    }

    #[test]
    fn nearest_sample_per_exchange() {
        let feeder = create_feeder(MockPriceSource::new(), "5");
        feeder.push(vec![sample("a", 100, 1.0, 10.0), sample("b", 300, 1.0, 10.0)]);
        feeder.push(vec![sample("a", 200, 1.0, 20.0), sample("b", 400, 3.0, 20.0)]);

        let old = feeder.get_last_price(Some(11.0)).unwrap();
        let last = feeder.get_last_price(None).unwrap();

        assert_eq!(old, ExchangePrice { price: 100, ts_utc: 10.0 });
        assert_eq!(last, ExchangePrice { price: 400, ts_utc: 20.0 });
    }

    #[test]
    fn bounded_history() {
        let feeder = create_feeder(MockPriceSource::new(), "2");
        for ts in 1..=5 {
            feeder.push(vec![sample("a", ts as u128, 1.0, ts as f64)]);
        }

        let oldest = feeder.get_last_price(Some(0.0)).unwrap();

        assert_eq!(oldest.price, 4);
    }

    #[test]
    fn invalid_samples_discarded() {
        let feeder = create_feeder(MockPriceSource::new(), "5");
        feeder.push(vec![sample("a", 0, 1.0, 10.0), sample("b", 5, 1.0, 0.0)]);

        assert!(feeder.get_last_price(None).is_none());
    }

    #[test]
    fn fetch_uses_price_digits() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .withf(|market, digits| market.as_str() == "BTCUSD" && *digits == 18)
            .times(1)
            .returning(|_, _| Ok(vec![sample("a", 7, 1.0, 1.0)]));
        let feeder = create_feeder(source, "5");

        let count = block_on(feeder.fetch()).unwrap();

        assert_eq!(count, 1);
        assert_eq!(feeder.get_last_price(None).unwrap().price, 7);
    }
}
