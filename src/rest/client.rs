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

//! Co-sign client.

use crate::{
    consensus::{SignRequestForm, SignResponse, SignatureRequester},
    crypto::Signature,
    Error, ErrorKind, Result,
};
use async_trait::async_trait;
use isahc::{config::Configurable, AsyncReadResponseExt, Request, RequestExt};
use std::time::Duration;
use url::Url;

/// Path of the co-sign endpoint, relative to the oracle base URL.
const SIGN_PATH: &str = "sign/";

/// Co-sign URL of an oracle.
pub fn sign_url(endpoint: &str) -> Result<Url> {
    let mut base = Url::parse(endpoint)
        .map_err(|err| Error::new_ext(ErrorKind::MalformedData, format!("{}: {}", endpoint, err)))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(SIGN_PATH)
        .map_err(|err| Error::new_ext(ErrorKind::MalformedData, format!("{}: {}", endpoint, err)))
}

/// Requests co-signatures over HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSignatureRequester;

#[async_trait]
impl SignatureRequester for HttpSignatureRequester {
    async fn request_signature(
        &self,
        endpoint: &str,
        form: &SignRequestForm,
        timeout: Duration,
    ) -> Result<Signature> {
        let url = sign_url(endpoint)?;
        let request = Request::post(url.as_str())
            .timeout(timeout)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form.to_urlencoded())
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;

        let mut response = request
            .send_async()
            .await
            .map_err(|err| Error::new_ext(ErrorKind::BadNetwork, err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| Error::new_ext(ErrorKind::BadNetwork, err))?;
        if !status.is_success() {
            return Err(Error::new_ext(
                ErrorKind::BadNetwork,
                format!("{} answered {}: {}", url, status, body),
            ));
        }

        let response: SignResponse = serde_json::from_str(&body)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Signature::from_hex(&response.signature)
    }
}
