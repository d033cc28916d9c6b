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

use crate::{
    consensus::{SignRequestForm, SignRequestHandler, SignResponse},
    Error, ErrorKind, Result,
};
use std::sync::Arc;
use tide::{http::mime, Body, Request, Response, StatusCode};

/// Error detail returned when debug is disabled.
pub const REDACTED_DETAIL: &str = "Invalid signature";

/// Conversion from "core" errors to HTTP errors.
impl From<ErrorKind> for StatusCode {
    fn from(err: ErrorKind) -> StatusCode {
        use crate::error::ErrorKind::*;
        match err {
            NoBlockchainData => StatusCode::ServiceUnavailable,
            DifferentLastPubBlock => StatusCode::Conflict,
            InvalidTurn => StatusCode::Forbidden,
            InvalidSignature => StatusCode::Unauthorized,
            ValidationFailure | MalformedData => StatusCode::BadRequest,
            ResourceNotFound => StatusCode::NotFound,
            BadNetwork | Timeout | QuorumNotReached | ConfigurationMissing | Other => {
                StatusCode::InternalServerError
            }
        }
    }
}

/// Server state shared by the handlers.
#[derive(Clone)]
pub struct RestState {
    pub handler: Arc<dyn SignRequestHandler>,
    /// Expose error details to callers.
    pub debug: bool,
}

fn tide_result(result: Result<SignResponse>, debug: bool) -> tide::Result {
    let response = match result {
        Ok(res) => Response::builder(StatusCode::Ok)
            .body(Body::from_json(&res)?)
            .content_type(mime::JSON)
            .build(),
        Err(err) => {
            let detail = match debug {
                true => err.to_string_full(),
                false => REDACTED_DETAIL.to_string(),
            };
            let body = serde_json::json!({ "detail": detail });
            Response::builder(StatusCode::from(err.kind))
                .body(Body::from_json(&body)?)
                .content_type(mime::JSON)
                .build()
        }
    };
    Ok(response)
}

async fn sign(mut req: Request<RestState>) -> tide::Result {
    let form = req.body_form::<SignRequestForm>().await;
    let state = req.state();
    let res = match form {
        Ok(form) => form
            .parse()
            .and_then(|(params, signature)| state.handler.validate_and_sign(params, signature)),
        Err(err) => Err(Error::new_ext(ErrorKind::MalformedData, err.to_string())),
    };
    tide_result(res, state.debug)
}

async fn get_index(_req: Request<RestState>) -> tide::Result {
    Ok(Response::new(StatusCode::NotFound))
}

pub fn run(addr: String, port: u16, state: RestState) {
    let mut app = tide::with_state(state);

    app.at("/sign").post(sign);
    app.at("/sign/").post(sign);
    app.at("/").get(get_index);

    let fut = app.listen((addr, port));
    if let Err(err) = async_std::task::block_on(fut) {
        error!("REST server error: {}", err);
    }
}
