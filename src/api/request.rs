//! Live request and response values exchanged with the transport.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Body of the generic "could not reach the server" response.
pub const NETWORK_UNAVAILABLE: &str = "Network is unavailable.";

/// How the request relates to the page's origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  #[default]
  Cors,
  NoCors,
  SameOrigin,
  Navigate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
  Omit,
  #[default]
  SameOrigin,
  Include,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
  #[default]
  Default,
  NoStore,
  Reload,
  NoCache,
  ForceCache,
  OnlyIfCached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectMode {
  #[default]
  Follow,
  Error,
  Manual,
}

/// Transport flags carried alongside a request and preserved across replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
  #[serde(default)]
  pub referrer: String,
  #[serde(default)]
  pub referrer_policy: String,
  #[serde(default)]
  pub mode: RequestMode,
  #[serde(default)]
  pub credentials: Credentials,
  #[serde(default)]
  pub cache: CacheMode,
  #[serde(default)]
  pub redirect: RedirectMode,
  #[serde(default)]
  pub integrity: String,
  #[serde(default)]
  pub keepalive: bool,
}

/// An outgoing request. Sending consumes it, so anything that needs the body
/// afterwards must snapshot it first.
#[derive(Debug)]
pub struct ApiRequest {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Option<Vec<u8>>,
  pub options: RequestOptions,
}

impl ApiRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: None,
      options: RequestOptions::default(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Attach a JSON body and the matching content type.
  pub fn with_json(mut self, body: &Value) -> Self {
    self.body = Some(body.to_string().into_bytes());
    self
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    self
  }

  pub fn with_options(mut self, options: RequestOptions) -> Self {
    self.options = options;
    self
  }
}

/// A response, either received from the network or synthesized locally.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Vec<u8>,
}

impl ApiResponse {
  pub fn new(status: StatusCode, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body,
    }
  }

  /// Synthetic JSON response.
  pub fn json(status: StatusCode, body: &Value) -> Self {
    let mut response = Self::new(status, body.to_string().into_bytes());
    response
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
  }

  pub fn no_content() -> Self {
    Self::new(StatusCode::NO_CONTENT, Vec::new())
  }

  pub fn not_found(message: &str) -> Self {
    let mut response = Self::new(StatusCode::NOT_FOUND, message.as_bytes().to_vec());
    response
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
  }

  /// The 502 sentinel returned when neither network nor cache can answer.
  pub fn network_unavailable() -> Self {
    Self::json(
      StatusCode::BAD_GATEWAY,
      &serde_json::json!({ "error": NETWORK_UNAVAILABLE }),
    )
  }

  /// Parse the body as JSON. An empty body yields `None`.
  pub fn json_body(&self) -> serde_json::Result<Option<Value>> {
    if self.body.is_empty() {
      return Ok(None);
    }
    serde_json::from_slice(&self.body).map(Some)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_network_unavailable_body_is_exact() {
    let response = ApiResponse::network_unavailable();
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(
      String::from_utf8(response.body).unwrap(),
      r#"{"error":"Network is unavailable."}"#
    );
  }

  #[test]
  fn test_no_content_has_empty_body() {
    let response = ApiResponse::no_content();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(response.json_body().unwrap(), None);
  }

  #[test]
  fn test_options_use_kebab_case_on_the_wire() {
    let options = RequestOptions {
      mode: RequestMode::SameOrigin,
      cache: CacheMode::NoStore,
      ..Default::default()
    };
    let value = serde_json::to_value(&options).unwrap();
    assert_eq!(value["mode"], "same-origin");
    assert_eq!(value["cache"], "no-store");
    assert_eq!(value["credentials"], "same-origin");
  }
}
