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

//! Deterministic stake weighted oracle selection.
//!
//! Given the oracles selected for a round and a shared seed (the hash of the
//! last publication block) every node computes the same priority list. The
//! first entry is the publisher, the others are the fallback order.
//!
//! The seed bytes drive a permutation of the oracles, one byte per draw over
//! the oracles not yet drawn. Then the seed, as a big-endian integer modulo
//! the total effective stake, lands in one of the cumulative stake buckets
//! laid over the permutation, and the list is rotated so that the bucket
//! owner comes first.
//!
//! The effective stake is capped at `multiplicator * min_stake` so that a
//! large holder cannot dominate the selection.

use crate::{base::schema::Participant, Error, ErrorKind, Result};
use num_bigint::BigUint;

/// Max number of oracles, one seed byte is consumed per draw.
pub const MAX_SELECTION_SIZE: usize = 32;

/// Effective stakes of `oracles`, in the same order.
pub fn effective_stakes(stake_limit_multiplicator: u128, oracles: &[&Participant]) -> Vec<u128> {
    let min_stake = oracles.iter().map(|o| o.stake).min().unwrap_or_default();
    let cap = min_stake.saturating_mul(stake_limit_multiplicator);
    oracles.iter().map(|o| o.stake.min(cap)).collect()
}

/// Orders `oracles` by publication priority.
///
/// Fails if there are more than 32 oracles, if the seed is shorter than the
/// number of oracles or if the total effective stake is zero.
pub fn select_next<'a>(
    stake_limit_multiplicator: u128,
    seed: &[u8],
    oracles: &'a [Participant],
) -> Result<Vec<&'a Participant>> {
    if oracles.is_empty() {
        return Ok(vec![]);
    }
    if oracles.len() > MAX_SELECTION_SIZE {
        return Err(Error::new_ext(
            ErrorKind::MalformedData,
            format!("cannot select among {} oracles", oracles.len()),
        ));
    }
    if seed.len() < oracles.len() {
        return Err(Error::new_ext(ErrorKind::MalformedData, "seed too short"));
    }

    let mut remaining: Vec<&Participant> = oracles.iter().collect();
    let mut order = Vec::with_capacity(oracles.len());
    for byte in seed.iter().take(oracles.len()) {
        let idx = *byte as usize % remaining.len();
        order.push(remaining.remove(idx));
    }

    let mut bounds = Vec::with_capacity(order.len());
    let mut total: u128 = 0;
    for stake in effective_stakes(stake_limit_multiplicator, &order) {
        total = total.saturating_add(stake);
        bounds.push(total);
    }
    if total == 0 {
        return Err(Error::new_ext(ErrorKind::MalformedData, "no stake"));
    }

    // Bucket `i` spans `[bounds[i-1], bounds[i])`.
    let rnd = BigUint::from_bytes_be(seed) % BigUint::from(total);
    let chosen = bounds
        .iter()
        .position(|bound| BigUint::from(*bound) > rnd)
        .unwrap_or_default();
    order.rotate_left(chosen);

    trace!(
        "selection: rnd {} of {}, chosen {}",
        rnd,
        total,
        order[0].addr
    );
    Ok(order)
}
