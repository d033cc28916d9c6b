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

//! Publication turn state machine.
//!
//! One `OracleTurn` exists per market. It decides whether a candidate address
//! may publish now, either as the leader picked by the selection algorithm or
//! as a fallback after the price drifted and the leader stayed silent.
//!
//! State transitions of the price change record:
//!
//! - `None` -> `Some(pub_block, block)`: the price delta reaches the fallback
//!   threshold for the first time since `pub_block` was published.
//! - `Some(pub_block, _)` -> `None`: a new publication moved the last
//!   publication block away from `pub_block`.
//!
//! While a record is held, the elapsed blocks are returned without checking
//! the price again.

use super::{price_delta_pct, selection::select_next};
use crate::{
    base::schema::{Market, Snapshot},
    crypto::Address,
};

/// Blocks each fallback rank waits after the previous one.
pub const FALLBACK_STAGGER_BLOCKS: u64 = 3;

/// Turn related configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// Effective stake cap, as a multiple of the minimum stake.
    pub stake_limit_multiplicator: u128,
    /// Price delta percentage counted as a price change.
    pub price_fallback_delta_pct: f64,
    /// Blocks after a price change before the first fallback may publish.
    pub price_fallback_blocks: u64,
    /// Blocks after a price change before the leader publishes.
    pub price_publish_blocks: u64,
}

/// Turn decision for a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDecision {
    /// Leader of the selection.
    Primary,
    /// Fallback of the given rank, starting from 1.
    Fallback { rank: usize },
    /// Not entitled, with the reason.
    NotTurn(String),
}

impl TurnDecision {
    pub fn is_turn(&self) -> bool {
        !matches!(self, TurnDecision::NotTurn(_))
    }

    /// Human readable description.
    pub fn reason(&self) -> String {
        match self {
            TurnDecision::Primary => "selected as leader".to_string(),
            TurnDecision::Fallback { rank } => format!("selected as fallback {}", rank),
            TurnDecision::NotTurn(reason) => reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PriceChange {
    /// Last publication block the change refers to.
    pub_block: u64,
    /// Block the change was first seen at.
    block: u64,
}

/// Per market turn state.
#[derive(Debug)]
pub struct OracleTurn {
    market: Market,
    price_change: Option<PriceChange>,
}

impl OracleTurn {
    pub fn new(market: Market) -> Self {
        OracleTurn {
            market,
            price_change: None,
        }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    fn observe_pub_block(&mut self, last_pub_block: u64) {
        if let Some(change) = self.price_change {
            if change.pub_block != last_pub_block {
                debug!(
                    "{}: publication block changed {} -> {}, price change discarded",
                    self.market, change.pub_block, last_pub_block
                );
                self.price_change = None;
            }
        }
    }

    /// Blocks elapsed since the price change seen for the current publication
    /// round, `None` if the price did not change enough.
    pub fn price_changed_blocks(
        &mut self,
        conf: &TurnConfig,
        snapshot: &Snapshot,
        exchange_price: u128,
    ) -> Option<u64> {
        self.observe_pub_block(snapshot.last_pub_block);

        if let Some(change) = self.price_change {
            let blocks = snapshot.block_num.saturating_sub(change.block);
            debug!("{}: price changed {} blocks ago", self.market, blocks);
            return Some(blocks);
        }

        let delta = price_delta_pct(snapshot.blockchain_price, exchange_price);
        if delta < conf.price_fallback_delta_pct {
            debug!(
                "{}: price delta {} below {}, blockchain price {} exchange price {}",
                self.market,
                delta,
                conf.price_fallback_delta_pct,
                snapshot.blockchain_price,
                exchange_price
            );
            return None;
        }

        info!(
            "{}: price changed at block {} (delta {})",
            self.market, snapshot.block_num, delta
        );
        self.price_change = Some(PriceChange {
            pub_block: snapshot.last_pub_block,
            block: snapshot.block_num,
        });
        Some(0)
    }

    /// Decides if `addr` may publish now, as seen by a co-signer.
    ///
    /// The leader is always entitled. A fallback of rank `k` becomes entitled
    /// once `price_fallback_blocks + 3 * (k - 1)` blocks passed since the
    /// price change.
    pub fn validate_turn(
        &mut self,
        conf: &TurnConfig,
        snapshot: &Snapshot,
        addr: &Address,
        exchange_price: u128,
    ) -> TurnDecision {
        let decision = self.decide(conf, snapshot, addr, exchange_price);
        debug!("{}: {} turn: {}", self.market, addr, decision.reason());
        decision
    }

    fn decide(
        &mut self,
        conf: &TurnConfig,
        snapshot: &Snapshot,
        addr: &Address,
        exchange_price: u128,
    ) -> TurnDecision {
        if !snapshot.is_selected(addr) {
            return TurnDecision::NotTurn(format!(
                "{} is not selected for the current round",
                addr
            ));
        }

        let selection = match select_next(
            conf.stake_limit_multiplicator,
            snapshot.last_pub_block_hash.as_bytes(),
            &snapshot.selected_oracles,
        ) {
            Ok(selection) => selection,
            Err(err) => return TurnDecision::NotTurn(err.to_string_full()),
        };
        let (leader, fallbacks) = match selection.split_first() {
            Some(split) => split,
            None => return TurnDecision::NotTurn("empty selection".to_string()),
        };
        if leader.addr == *addr {
            return TurnDecision::Primary;
        }

        let f_block = match self.price_changed_blocks(conf, snapshot, exchange_price) {
            Some(f_block) => f_block,
            None => return TurnDecision::NotTurn("there was no price change".to_string()),
        };
        let f_num = match f_block.checked_sub(conf.price_fallback_blocks) {
            Some(f_num) => f_num,
            None => {
                return TurnDecision::NotTurn(format!(
                    "price changed {} blocks ago, fallbacks wait {}",
                    f_block, conf.price_fallback_blocks
                ))
            }
        };
        let f_idx = match fallbacks.iter().position(|p| p.addr == *addr) {
            Some(f_idx) => f_idx,
            None => return TurnDecision::NotTurn(format!("{} is not a fallback", addr)),
        };
        if f_idx as u64 * FALLBACK_STAGGER_BLOCKS > f_num {
            return TurnDecision::NotTurn(format!(
                "fallback {} waits, price changed {} blocks ago",
                f_idx + 1,
                f_block
            ));
        }
        TurnDecision::Fallback { rank: f_idx + 1 }
    }

    /// Decides if `addr`, this node, should publish now.
    ///
    /// On top of `validate_turn` a price change must have been seen at least
    /// `price_publish_blocks` ago, for the leader too.
    pub fn is_oracle_turn(
        &mut self,
        conf: &TurnConfig,
        snapshot: &Snapshot,
        addr: &Address,
        exchange_price: u128,
    ) -> TurnDecision {
        let decision = self.validate_turn(conf, snapshot, addr, exchange_price);
        if !decision.is_turn() {
            return decision;
        }
        match self.price_changed_blocks(conf, snapshot, exchange_price) {
            Some(f_block) if f_block >= conf.price_publish_blocks => decision,
            f_block => {
                warn!(
                    "{}: selected but waiting for price change blocks {:?} < {}",
                    self.market, f_block, conf.price_publish_blocks
                );
                TurnDecision::NotTurn(format!(
                    "waiting for price change blocks {:?} < {}",
                    f_block, conf.price_publish_blocks
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::{
            tests::{create_test_address, create_test_participant, create_test_snapshot},
            Participant,
        },
        crypto::Hash,
    };
    use rand_core::{RngCore, SeedableRng};
    use rand_pcg::Pcg32;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn conf() -> TurnConfig {
        TurnConfig {
            stake_limit_multiplicator: 2,
            price_fallback_delta_pct: 0.05,
            price_fallback_blocks: 3,
            price_publish_blocks: 1,
        }
    }

    fn create_turn() -> OracleTurn {
        OracleTurn::new(Market::new("BTCUSD").unwrap())
    }

    fn price_snapshot(last_pub_block: u64, block_num: u64, blockchain_price: u128) -> Snapshot {
        let mut snapshot = create_test_snapshot(vec![]);
        snapshot.last_pub_block = last_pub_block;
        snapshot.block_num = block_num;
        snapshot.blockchain_price = blockchain_price;
        snapshot
    }

    /// Leader is the first oracle for a zero seed, the fourth entry repeats
    /// the third address but is not selected for the current round.
    fn round_oracles() -> Vec<Participant> {
        let mut late = create_test_participant(3, 2 * E18);
        late.selected_in_current_round = false;
        vec![
            create_test_participant(1, 14 * E18),
            create_test_participant(2, 8 * E18),
            create_test_participant(3, 2 * E18),
            late,
        ]
    }

    fn round_snapshot(block_num: u64) -> Snapshot {
        let mut snapshot = create_test_snapshot(round_oracles());
        snapshot.block_num = block_num;
        snapshot.last_pub_block = 1;
        snapshot.blockchain_price = 111;
        snapshot.last_pub_block_hash = Hash::new([0; 32]);
        snapshot
    }

    #[test]
    fn no_price_change() {
        let mut turn = create_turn();

        for (pub_block, block) in [(1, 10), (1, 12), (1, 14), (2, 16), (2, 18)] {
            let ret = turn.price_changed_blocks(&conf(), &price_snapshot(pub_block, block, 111), 111);
            assert_eq!(ret, None);
        }
    }

    #[test]
    fn price_change() {
        let mut turn = create_turn();
        let mut check = |block, price| turn.price_changed_blocks(&conf(), &price_snapshot(1, block, 111), price);

        assert_eq!(check(10, 111), None);
        assert_eq!(check(12, 222), Some(0));
        assert_eq!(check(14, 222), Some(2));
        assert_eq!(check(16, 222), Some(4));
        assert_eq!(check(18, 333), Some(6));
    }

    #[test]
    fn price_change_record_survives_price_recovery() {
        let mut turn = create_turn();
        let mut check = |pub_block, block, price| {
            turn.price_changed_blocks(&conf(), &price_snapshot(pub_block, block, 111), price)
        };

        assert_eq!(check(1, 10, 222), Some(0));
        assert_eq!(check(1, 12, 111), Some(2));
        assert_eq!(check(1, 14, 111), Some(4));
        assert_eq!(check(2, 16, 222), Some(0));
        assert_eq!(check(2, 18, 111), Some(2));
        assert_eq!(check(2, 20, 111), Some(4));
    }

    #[test]
    fn new_publication_resets() {
        let mut turn = create_turn();
        let mut check = |pub_block, block, price| {
            turn.price_changed_blocks(&conf(), &price_snapshot(pub_block, block, 111), price)
        };

        assert_eq!(check(1, 10, 111), None);
        assert_eq!(check(1, 12, 222), Some(0));
        assert_eq!(check(2, 14, 111), None);
        assert_eq!(check(2, 16, 111), None);
        assert_eq!(check(2, 18, 222), Some(0));
        assert_eq!(check(2, 20, 111), Some(2));
    }

    #[test]
    fn zero_blockchain_price_is_a_change() {
        let mut turn = create_turn();

        let ret = turn.price_changed_blocks(&conf(), &price_snapshot(1, 10, 0), 111);

        assert_eq!(ret, Some(0));
    }

    #[test]
    fn monotonic_until_new_publication() {
        let mut rng = Pcg32::seed_from_u64(3);
        let mut turn = create_turn();
        let mut block = 100;

        assert_eq!(turn.price_changed_blocks(&conf(), &price_snapshot(7, block, 111), 222), Some(0));
        let mut last = 0;
        for _ in 0..200 {
            block += (rng.next_u32() % 4) as u64;
            let price = 100 + (rng.next_u32() % 200) as u128;
            let ret = turn
                .price_changed_blocks(&conf(), &price_snapshot(7, block, 111), price)
                .unwrap();
            assert!(ret >= last);
            last = ret;
        }

        let ret = turn.price_changed_blocks(&conf(), &price_snapshot(8, block, 111), 111);
        assert_eq!(ret, None);
    }

    #[test]
    fn not_selected_in_current_round() {
        let mut turn = create_turn();
        let snapshot = round_snapshot(12);

        let decision = turn.validate_turn(&conf(), &snapshot, &create_test_address(9), 222);

        assert!(!decision.is_turn());
    }

    #[test]
    fn leader_validated_without_price_change() {
        let mut turn = create_turn();
        let snapshot = round_snapshot(12);

        assert_eq!(
            turn.validate_turn(&conf(), &snapshot, &create_test_address(1), 111),
            TurnDecision::Primary
        );
        assert!(!turn
            .validate_turn(&conf(), &snapshot, &create_test_address(2), 111)
            .is_turn());
        // Publishing on its own initiative needs a price change.
        assert!(!turn
            .is_oracle_turn(&conf(), &snapshot, &create_test_address(1), 111)
            .is_turn());
    }

    #[test]
    fn leader_waits_publish_blocks() {
        let mut turn = create_turn();
        let leader = create_test_address(1);

        assert!(!turn.is_oracle_turn(&conf(), &round_snapshot(12), &leader, 141).is_turn());
        assert_eq!(
            turn.is_oracle_turn(&conf(), &round_snapshot(13), &leader, 141),
            TurnDecision::Primary
        );
    }

    #[test]
    fn fallback_escalation() {
        let mut turn = create_turn();
        let first = create_test_address(2);
        let second = create_test_address(3);

        // Price change seen at block 12.
        assert!(!turn.validate_turn(&conf(), &round_snapshot(12), &first, 141).is_turn());
        assert!(!turn.validate_turn(&conf(), &round_snapshot(14), &first, 141).is_turn());
        assert_eq!(
            turn.validate_turn(&conf(), &round_snapshot(15), &first, 111),
            TurnDecision::Fallback { rank: 1 }
        );
        assert!(!turn.validate_turn(&conf(), &round_snapshot(15), &second, 111).is_turn());
        assert!(!turn.validate_turn(&conf(), &round_snapshot(17), &second, 111).is_turn());
        assert_eq!(
            turn.validate_turn(&conf(), &round_snapshot(18), &second, 111),
            TurnDecision::Fallback { rank: 2 }
        );
        assert_eq!(
            turn.is_oracle_turn(&conf(), &round_snapshot(19), &second, 111),
            TurnDecision::Fallback { rank: 2 }
        );
    }

    #[test]
    fn primary_before_fallback() {
        let mut turn = create_turn();
        let leader = create_test_address(1);
        let second = create_test_address(3);
        let t = 12;

        assert!(!turn.is_oracle_turn(&conf(), &round_snapshot(t), &second, 141).is_turn());
        for block in t + 1..t + conf().price_fallback_blocks {
            let snapshot = round_snapshot(block);
            assert!(turn.is_oracle_turn(&conf(), &snapshot, &leader, 141).is_turn());
            for tag in [2, 3] {
                let decision = turn.is_oracle_turn(&conf(), &snapshot, &create_test_address(tag), 141);
                assert!(!decision.is_turn());
            }
        }
        let late = t + conf().price_fallback_blocks + FALLBACK_STAGGER_BLOCKS;
        assert!(turn.is_oracle_turn(&conf(), &round_snapshot(late), &second, 141).is_turn());
    }

    #[test]
    fn new_publication_restarts_fallbacks() {
        let mut turn = create_turn();
        let first = create_test_address(2);

        turn.validate_turn(&conf(), &round_snapshot(12), &first, 141);
        assert!(turn.validate_turn(&conf(), &round_snapshot(15), &first, 141).is_turn());

        let mut snapshot = round_snapshot(16);
        snapshot.last_pub_block = 15;
        assert!(!turn.validate_turn(&conf(), &snapshot, &first, 141).is_turn());
    }
}
