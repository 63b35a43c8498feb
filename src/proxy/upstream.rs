//! Pooled HTTP client for forwarding intercepted requests upstream.
//!
//! One session for the process lifetime; transient failures retry with
//! exponential backoff before surfacing as a 502 to the client.

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

use crate::errors::AppError;

pub struct UpstreamClient {
    client: ClientWithMiddleware,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build upstream HTTP client");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client }
    }

    /// Forward a request verbatim and return the upstream response. The
    /// caller has already sanitized the header map.
    pub async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: reqwest::header::HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, AppError> {
        self.client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url, error = %e, "upstream request failed");
                AppError::Upstream(e.to_string())
            })
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
