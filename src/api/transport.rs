//! Sending requests over the network.
//!
//! [`Transport`] is the seam the interceptor and the replay pass send through;
//! [`HttpTransport`] is the reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE};
use thiserror::Error;

use super::request::{ApiRequest, ApiResponse, Credentials};

/// Failure to obtain any response at all.
///
/// A reachable server answering with an error status is not a `FetchError`;
/// that arrives as a normal [`ApiResponse`].
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Unreachable(String),

  #[error("request timed out")]
  Timeout,

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl FetchError {
  /// True when the network itself could not be reached.
  pub fn is_network_failure(&self) -> bool {
    matches!(self, FetchError::Unreachable(_) | FetchError::Timeout)
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      FetchError::Timeout
    } else if e.is_builder() {
      FetchError::InvalidRequest(e.to_string())
    } else {
      FetchError::Unreachable(e.to_string())
    }
  }
}

/// Sends requests to the network.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse, FetchError>;
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("docs-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
    let ApiRequest {
      method,
      url,
      mut headers,
      body,
      options,
    } = request;

    if options.credentials == Credentials::Omit {
      headers.remove(AUTHORIZATION);
      headers.remove(COOKIE);
    }

    tracing::debug!(%method, %url, "sending request");

    let mut builder = self.client.request(method, url).headers(headers);
    if let Some(body) = body {
      builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(ApiResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_network_failure_classification() {
    assert!(FetchError::Unreachable("refused".into()).is_network_failure());
    assert!(FetchError::Timeout.is_network_failure());
    assert!(!FetchError::InvalidRequest("bad header".into()).is_network_failure());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_a_network_failure() {
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
    // Port 9 on loopback: nothing listens there.
    let url = url::Url::parse("http://127.0.0.1:9/api/v1.0/documents/").unwrap();

    let err = transport.send(ApiRequest::get(url)).await.unwrap_err();
    assert!(err.is_network_failure(), "unexpected error: {err}");
  }
}
