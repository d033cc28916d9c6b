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

//! Bounded First In First Out queue of timestamped values.
//!
//! When the capacity is reached the least recently inserted value is dropped.
//! Values can be looked up by nearest timestamp, used to retrieve the price
//! observed closest to the instant a peer claims it saw its own price.

use std::collections::VecDeque;

/// Values carrying an observation time in UTC seconds.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for crate::base::schema::PriceSample {
    fn timestamp(&self) -> f64 {
        self.ts_utc
    }
}

/// Price Queue structure.
#[derive(Debug)]
pub struct PriceQueue<T> {
    /// Max number of retained values.
    capacity: usize,
    /// Values sorted by arrival time.
    fifo: VecDeque<T>,
}

impl<T: Timestamped> PriceQueue<T> {
    /// Instance a new empty queue retaining at most `capacity` values.
    ///
    /// # Example
    ///
    /// ```
    /// # use trinci_oracle::{base::price_queue::PriceQueue, PriceSample};
    /// let queue: PriceQueue<PriceSample> = PriceQueue::new(3);
    /// assert!(queue.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        PriceQueue {
            capacity,
            fifo: VecDeque::with_capacity(capacity),
        }
    }

    /// Get the number of entries in the queue.
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    /// Checks if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, dropping the oldest values if the queue is now
    /// too long.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.fifo.len() > self.capacity {
            self.fifo.pop_front();
        }
    }

    /// Appends a value, evicting the oldest one when full.
    pub fn push(&mut self, val: T) {
        if self.fifo.len() == self.capacity {
            self.fifo.pop_front();
        }
        self.fifo.push_back(val);
    }

    /// Most recently inserted value.
    pub fn latest(&self) -> Option<&T> {
        self.fifo.back()
    }

    /// Value with the timestamp nearest to `target`. On ties the older value
    /// wins.
    ///
    /// # Example
    ///
    /// ```
    /// # use trinci_oracle::{base::price_queue::PriceQueue, PriceSample};
    /// let sample = |price: u128, ts_utc: f64| PriceSample {
    ///     name: "exchange".to_string(),
    ///     price,
    ///     weight: 1.0,
    ///     ts_utc,
    /// };
    /// let mut queue = PriceQueue::new(5);
    /// queue.push(sample(1, 10.0));
    /// queue.push(sample(2, 15.0));
    /// queue.push(sample(3, 20.0));
    /// assert_eq!(queue.nearest(16.0).map(|s| s.price), Some(2));
    /// assert_eq!(queue.nearest(100.0).map(|s| s.price), Some(3));
    /// ```
    pub fn nearest(&self, target: f64) -> Option<&T> {
        let mut best: Option<(&T, f64)> = None;
        for val in self.fifo.iter() {
            let distance = (val.timestamp() - target).abs();
            match best {
                Some((_, best_distance)) if best_distance <= distance => (),
                _ => best = Some((val, distance)),
            }
        }
        best.map(|(val, _)| val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::PriceSample;

    fn sample(price: u128, ts_utc: f64) -> PriceSample {
        PriceSample {
            name: "exchange".to_string(),
            price,
            weight: 1.0,
            ts_utc,
        }
    }

    fn nearest_price(queue: &PriceQueue<PriceSample>, target: f64) -> Option<u128> {
        queue.nearest(target).map(|s| s.price)
    }

    #[test]
    fn push_over_capacity() {
        let mut queue = PriceQueue::new(3);

        for i in 0..5 {
            queue.push(sample(i, i as f64));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(nearest_price(&queue, 0.0), Some(2));
        assert_eq!(queue.latest().map(|s| s.price), Some(4));
    }

    #[test]
    fn nearest_on_empty() {
        let queue: PriceQueue<PriceSample> = PriceQueue::new(3);

        assert!(queue.nearest(1.0).is_none());
        assert!(queue.latest().is_none());
    }

    #[test]
    fn nearest_tie_takes_older() {
        let mut queue = PriceQueue::new(3);
        queue.push(sample(1, 10.0));
        queue.push(sample(2, 20.0));

        assert_eq!(nearest_price(&queue, 15.0), Some(1));
        assert_eq!(nearest_price(&queue, 15.1), Some(2));
    }

    #[test]
    fn shrink_capacity() {
        let mut queue = PriceQueue::new(4);
        for i in 0..4 {
            queue.push(sample(i, i as f64));
        }

        queue.set_capacity(2);

        assert_eq!(queue.capacity(), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(nearest_price(&queue, 0.0), Some(2));
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut queue = PriceQueue::new(0);
        queue.push(sample(1, 1.0));
        queue.push(sample(2, 2.0));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.latest().map(|s| s.price), Some(2));
    }
}
