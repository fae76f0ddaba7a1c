//! HTTP implementation of [`ResourceClient`] over `reqwest`.
//!
//! Every request carries `x-request-id` with the activity's correlation id.
//! Transport failures and HTTP 429 / 503 responses are retried up to
//! `retry_count` times with a doubling wait capped at `retry_max_wait_ms`;
//! any other response is returned to the caller as-is.

use std::time::Duration;

use casflow_core::resource::{
    ACTIVITY_NAME_HEADER, CORRELATION_QUERY_PARAM, Correlation, REQUEST_ID_HEADER, ResourceClient,
    ResourceResponse, TransportError, WORKFLOW_ID_HEADER,
};
use casflow_types::config::HttpConfig;
use reqwest::{Method, StatusCode};

/// Errors constructing the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Resource service client backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    client: reqwest::Client,
    retry_count: u32,
    retry_wait: Duration,
    retry_max_wait: Duration,
}

impl HttpResourceClient {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("casflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            retry_count: config.retry_count,
            retry_wait: Duration::from_millis(config.retry_wait_ms),
            retry_max_wait: Duration::from_millis(config.retry_max_wait_ms),
        })
    }

    /// Wait before retry number `retry` (1-based).
    fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_wait.saturating_mul(factor).min(self.retry_max_wait)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&'static str, &str)],
        query: Option<(&'static str, &str)>,
        body: Option<&str>,
    ) -> Result<ResourceResponse, TransportError> {
        let mut retry: u32 = 0;
        loop {
            let mut request = self.client.request(method.clone(), url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            if let Some(pair) = query {
                request = request.query(&[pair]);
            }
            if let Some(body) = body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.to_string());
            }

            let reason = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || retry >= self.retry_count {
                        let text = response.text().await.map_err(|e| transport_error(url, e))?;
                        tracing::debug!(method = %method, url, status = status.as_u16(), "resource request complete");
                        return Ok(ResourceResponse::new(status.as_u16(), text));
                    }
                    format!("HTTP {status}")
                }
                Err(e) if retry < self.retry_count => e.to_string(),
                Err(e) => return Err(transport_error(url, e)),
            };

            retry += 1;
            let delay = self.retry_delay(retry);
            tracing::warn!(
                method = %method,
                url,
                attempt = retry,
                delay_ms = delay.as_millis() as u64,
                "resource request failed ({reason}), retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn transport_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else if err.is_builder() {
        TransportError::InvalidUrl(format!("{url}: {err}"))
    } else {
        TransportError::Request {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

impl ResourceClient for HttpResourceClient {
    async fn find_by_correlation(
        &self,
        collection_url: &str,
        correlation: &Correlation,
    ) -> Result<ResourceResponse, TransportError> {
        self.send(
            Method::GET,
            collection_url,
            &[(REQUEST_ID_HEADER, correlation.correlation_id.as_str())],
            Some((CORRELATION_QUERY_PARAM, correlation.correlation_id.as_str())),
            None,
        )
        .await
    }

    async fn create(
        &self,
        collection_url: &str,
        correlation: &Correlation,
        body: &str,
    ) -> Result<ResourceResponse, TransportError> {
        self.send(
            Method::POST,
            collection_url,
            &[
                (REQUEST_ID_HEADER, correlation.correlation_id.as_str()),
                (WORKFLOW_ID_HEADER, correlation.run_id.as_str()),
                (ACTIVITY_NAME_HEADER, correlation.activity.as_str()),
            ],
            None,
            Some(body),
        )
        .await
    }

    async fn fetch(
        &self,
        resource_url: &str,
        correlation: Option<&Correlation>,
    ) -> Result<ResourceResponse, TransportError> {
        let headers: Vec<(&'static str, &str)> = correlation
            .map(|c| vec![(REQUEST_ID_HEADER, c.correlation_id.as_str())])
            .unwrap_or_default();
        self.send(Method::GET, resource_url, &headers, None, None).await
    }

    async fn delete(&self, resource_url: &str) -> Result<ResourceResponse, TransportError> {
        self.send(Method::DELETE, resource_url, &[], None, None).await
    }
}
