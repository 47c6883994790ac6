/* src/fetch.rs */

use std::time::Duration;

use crate::cache::{HttpFetcher, HttpResponse};
use crate::error::{RealIpError, Result};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// [`HttpFetcher`] backed by a blocking `reqwest` client.
///
/// Must not be driven from inside an async runtime thread; the axum layer runs resolution on
/// the blocking pool for this reason.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| RealIpError::Fetch(err.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        let res = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| RealIpError::Fetch(err.to_string()))?;

        let status = res.status().as_u16();
        let body = res.text().map_err(|err| RealIpError::Fetch(err.to_string()))?;

        Ok(HttpResponse::new(status, body))
    }
}
