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

//! Co-sign request validation.
//!
//! Before signing a peer publication, every claim of the requester is checked
//! against our own view: same publication round, a sane price with respect to
//! our exchange price, the requester turn and the requester signature.

use super::{price_delta_pct, OracleTurn, PublishPriceParams, TurnConfig};
use crate::{
    base::schema::{ExchangePrice, Snapshot},
    crypto::{ecdsa, KeyPair, Signature},
    Error, ErrorKind, Result,
};

fn failure(kind: ErrorKind, params: Option<&PublishPriceParams>, msg: String) -> Error {
    match params {
        Some(params) => warn!("{}: {}", params.market, msg),
        None => warn!("{}", msg),
    }
    Error::new_ext(kind, msg)
}

/// Validation context of a single co-sign request.
pub struct RequestValidation<'a> {
    price_reject_delta_pct: f64,
    params: Option<&'a PublishPriceParams>,
    exchange_price: Option<ExchangePrice>,
    snapshot: Option<&'a Snapshot>,
}

impl<'a> RequestValidation<'a> {
    /// `exchange_price` is our price nearest to the requester observation.
    pub fn new(
        price_reject_delta_pct: f64,
        params: Option<&'a PublishPriceParams>,
        exchange_price: Option<ExchangePrice>,
        snapshot: Option<&'a Snapshot>,
    ) -> Self {
        RequestValidation {
            price_reject_delta_pct,
            params,
            exchange_price,
            snapshot,
        }
    }

    /// Checks round and price. Returns the validated inputs.
    pub fn validate_params(&self) -> Result<(&'a PublishPriceParams, &'a Snapshot, ExchangePrice)> {
        let (params, snapshot) = match (self.params, self.snapshot) {
            (Some(params), Some(snapshot)) => (params, snapshot),
            _ => {
                return Err(failure(
                    ErrorKind::NoBlockchainData,
                    self.params,
                    "still no valid blockchain info".to_string(),
                ))
            }
        };

        if params.last_pub_block != snapshot.last_pub_block {
            return Err(failure(
                ErrorKind::DifferentLastPubBlock,
                self.params,
                format!(
                    "different last publication blocks {} != {}",
                    params.last_pub_block, snapshot.last_pub_block
                ),
            ));
        }

        let exchange_price = match self.exchange_price {
            Some(price) if price.price > 0 && price.ts_utc > 0.0 => price,
            other => {
                return Err(failure(
                    ErrorKind::NoBlockchainData,
                    self.params,
                    format!("still no valid price {:?}", other),
                ))
            }
        };

        if params.price == 0 || params.price_ts_utc <= 0.0 {
            return Err(failure(
                ErrorKind::ValidationFailure,
                self.params,
                format!("invalid publish price {}", params.price),
            ));
        }

        let delta = price_delta_pct(params.price, exchange_price.price);
        if delta > self.price_reject_delta_pct {
            return Err(failure(
                ErrorKind::ValidationFailure,
                self.params,
                format!(
                    "price out of range delta {} > {}, price {} exchange price {}",
                    delta, self.price_reject_delta_pct, params.price, exchange_price.price
                ),
            ));
        }

        Ok((params, snapshot, exchange_price))
    }

    /// Checks params, then that the requester is entitled to publish now.
    pub fn validate_turn(&self, turn: &mut OracleTurn, conf: &TurnConfig) -> Result<()> {
        let (params, snapshot, exchange_price) = self.validate_params()?;
        let decision = turn.validate_turn(conf, snapshot, &params.oracle_addr, exchange_price.price);
        if !decision.is_turn() {
            return Err(failure(
                ErrorKind::InvalidTurn,
                self.params,
                format!("is not oracle {} turn: {}", params.oracle_addr, decision.reason()),
            ));
        }
        Ok(())
    }

    /// Checks that the requester signed `message`.
    pub fn validate_signature(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let params = self.params.ok_or_else(|| {
            failure(ErrorKind::NoBlockchainData, None, "missing request".to_string())
        })?;
        if !ecdsa::verify(&params.oracle_addr, message, signature) {
            return Err(failure(
                ErrorKind::InvalidSignature,
                self.params,
                format!("oracle {} invalid signature", params.oracle_addr),
            ));
        }
        Ok(())
    }

    /// Runs every check and co-signs the canonical message.
    pub fn validate_and_sign(
        &self,
        turn: &mut OracleTurn,
        conf: &TurnConfig,
        signature: &Signature,
        keypair: &KeyPair,
    ) -> Result<(Vec<u8>, Signature)> {
        self.validate_turn(turn, conf)?;
        let params = self
            .params
            .ok_or_else(|| Error::new(ErrorKind::NoBlockchainData))?;
        let message = params.encode();
        self.validate_signature(&message, signature)?;
        let own = keypair.sign(&message)?;
        info!("{}: co-signed price {}", params.market, params.price);
        Ok((message, own))
    }
}
