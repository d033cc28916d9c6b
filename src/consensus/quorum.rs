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

//! Co-signature collection.

use super::{PublishPriceParams, SignRequestForm, SignResponse};
use crate::{
    base::schema::Participant,
    crypto::{ecdsa, Address, Signature},
    Error, ErrorKind, Result,
};
use async_std::future;
use async_trait::async_trait;
use futures::future::join_all;
use std::{collections::HashSet, time::Duration};

#[cfg(test)]
use mockall::automock;

/// Client side of the co-sign protocol.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SignatureRequester: Send + Sync + 'static {
    /// Asks the oracle reachable at `endpoint` to co-sign the request.
    async fn request_signature(
        &self,
        endpoint: &str,
        form: &SignRequestForm,
        timeout: Duration,
    ) -> Result<Signature>;
}

/// Server side of the co-sign protocol.
#[cfg_attr(test, automock)]
pub trait SignRequestHandler: Send + Sync + 'static {
    /// Validates a peer request and co-signs it.
    fn validate_and_sign(
        &self,
        params: PublishPriceParams,
        signature: Signature,
    ) -> Result<SignResponse>;
}

/// Minimum number of signatures accepted by the contract.
pub fn quorum(oracles: usize) -> usize {
    oracles / 2 + 1
}

/// Checks the quorum, strictly more than half of the oracles.
pub fn check_quorum(signatures: usize, oracles: usize) -> Result<()> {
    let required = quorum(oracles);
    if signatures < required {
        return Err(Error::new_ext(
            ErrorKind::QuorumNotReached,
            format!("{} signatures of {} required", signatures, required),
        ));
    }
    Ok(())
}

async fn request_one(
    requester: &dyn SignatureRequester,
    oracle: &Participant,
    form: &SignRequestForm,
    message: &[u8],
    timeout: Duration,
) -> Option<(Address, Signature)> {
    let res = future::timeout(
        timeout,
        requester.request_signature(&oracle.internet_name, form, timeout),
    )
    .await;
    let sig = match res {
        Ok(Ok(sig)) => sig,
        Ok(Err(err)) => {
            warn!(
                "{}: co-sign request to {} failed: {}",
                form.coin_pair,
                oracle.addr,
                err.to_string_full()
            );
            return None;
        }
        Err(_) => {
            warn!("{}: co-sign request to {} timed out", form.coin_pair, oracle.addr);
            return None;
        }
    };
    if !ecdsa::verify(&oracle.addr, message, &sig) {
        warn!("{}: invalid signature from {}", form.coin_pair, oracle.addr);
        return None;
    }
    Some((oracle.addr, sig))
}

/// Requests co-signatures from every other oracle concurrently.
///
/// Failed, late and invalid answers are dropped. Our own signature is always
/// included. The result is sorted by signer address.
pub async fn gather_signatures(
    requester: &dyn SignatureRequester,
    oracles: &[Participant],
    params: &PublishPriceParams,
    own: (Address, Signature),
    timeout: Duration,
) -> Vec<(Address, Signature)> {
    let message = params.encode();
    let form = SignRequestForm::new(params, &own.1);

    let mut seen = HashSet::new();
    seen.insert(own.0);
    let peers: Vec<&Participant> = oracles.iter().filter(|o| seen.insert(o.addr)).collect();

    let requests = peers
        .iter()
        .map(|oracle| request_one(requester, oracle, &form, &message, timeout));
    let mut signatures: Vec<(Address, Signature)> =
        join_all(requests).await.into_iter().flatten().collect();

    signatures.push(own);
    signatures.sort_by(|a, b| a.0.cmp(&b.0));
    debug!(
        "{}: collected {} signatures of {} oracles",
        params.market,
        signatures.len(),
        oracles.len()
    );
    signatures
}
