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

//! Publication turn consensus.
//!
//! Nodes never exchange turn information: each one derives it from the same
//! public inputs through `selection`, `turn` keeps the per market price change
//! record, `validation` re-derives everything before co-signing and `quorum`
//! collects co-signatures for our own publications.

pub mod message;
pub mod quorum;
pub mod selection;
pub mod turn;
pub mod validation;

pub use message::{PublishPriceParams, SignRequestForm, SignResponse};
pub use quorum::{SignRequestHandler, SignatureRequester};
pub use selection::select_next;
pub use turn::{OracleTurn, TurnConfig, TurnDecision};
pub use validation::RequestValidation;

/// Percentage distance between two prices, relative to the lower one.
///
/// Infinite when exactly one of them is zero.
pub fn price_delta_pct(a: u128, b: u128) -> f64 {
    let low = a.min(b);
    let diff = a.abs_diff(b);
    if diff == 0 {
        return 0.0;
    }
    if low == 0 {
        return f64::INFINITY;
    }
    diff as f64 / low as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_symmetric() {
        assert_eq!(price_delta_pct(100, 150), 50.0);
        assert_eq!(price_delta_pct(150, 100), 50.0);
        assert_eq!(price_delta_pct(7, 7), 0.0);
    }

    #[test]
    fn delta_with_zero() {
        assert_eq!(price_delta_pct(0, 0), 0.0);
        assert!(price_delta_pct(0, 1).is_infinite());
    }
}
