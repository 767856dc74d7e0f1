//! Durable snapshots of in-flight requests.
//!
//! A [`RequestData`] captures everything needed to send a request again later:
//! method, URL, flattened headers, the body bytes (non-GET only) and the
//! transport flags. It is what the mutation queue stores.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::request::{ApiRequest, RequestMode, RequestOptions};

#[derive(Debug, Error)]
pub enum RequestDataError {
  #[error("invalid method {0:?}")]
  Method(String),

  #[error("invalid url {url:?}: {source}")]
  Url {
    url: String,
    source: url::ParseError,
  },

  #[error("invalid header {0:?}")]
  Header(String),

  #[error("body is not utf-8: {0}")]
  Utf8(#[from] std::string::FromUtf8Error),

  #[error("body is not json: {0}")]
  Json(#[from] serde_json::Error),
}

/// Serializable snapshot of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
  pub url: String,
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default, with = "body_base64", skip_serializing_if = "Option::is_none")]
  pub body: Option<Vec<u8>>,
  #[serde(flatten)]
  pub options: RequestOptions,
}

impl RequestData {
  /// Snapshot a request before it is sent.
  ///
  /// Headers are flattened to one value per name (repeated values joined with
  /// `", "`). The body is only kept for non-GET methods. Navigation requests
  /// cannot be replayed as such and are recorded as same-origin.
  pub fn from_request(request: &ApiRequest) -> Self {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &request.headers {
      let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
      headers
        .entry(name.as_str().to_string())
        .and_modify(|existing| {
          existing.push_str(", ");
          existing.push_str(&value);
        })
        .or_insert(value);
    }

    let body = if request.method == Method::GET {
      None
    } else {
      request.body.clone()
    };

    let mut options = request.options.clone();
    if options.mode == RequestMode::Navigate {
      options.mode = RequestMode::SameOrigin;
    }

    Self {
      url: request.url.to_string(),
      method: request.method.as_str().to_string(),
      headers,
      body,
      options,
    }
  }

  /// Independent deep copy, safe to store while `self` keeps changing.
  pub fn to_object(&self) -> RequestData {
    self.clone()
  }

  /// Rebuild a live request from the snapshot.
  pub fn to_request(&self) -> Result<ApiRequest, RequestDataError> {
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|_| RequestDataError::Method(self.method.clone()))?;
    let url = Url::parse(&self.url).map_err(|source| RequestDataError::Url {
      url: self.url.clone(),
      source,
    })?;

    let mut headers = HeaderMap::new();
    for (name, value) in &self.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| RequestDataError::Header(name.clone()))?;
      let value =
        HeaderValue::from_str(value).map_err(|_| RequestDataError::Header(name.to_string()))?;
      headers.insert(name, value);
    }

    Ok(ApiRequest {
      method,
      url,
      headers,
      body: self.body.clone(),
      options: self.options.clone(),
    })
  }

  pub fn body_text(&self) -> Result<Option<String>, RequestDataError> {
    match &self.body {
      Some(bytes) => Ok(Some(bytes_to_string(bytes)?)),
      None => Ok(None),
    }
  }

  /// Parse the captured body as JSON. A missing or empty body yields `None`.
  pub fn body_json(&self) -> Result<Option<Value>, RequestDataError> {
    match &self.body {
      Some(bytes) if !bytes.is_empty() => Ok(Some(bytes_to_json(bytes)?)),
      _ => Ok(None),
    }
  }

  /// Replace the captured body with `value`, marking it as JSON.
  pub fn set_body_json(&mut self, value: &Value) {
    self.body = Some(json_to_bytes(value));
    let has_content_type = self
      .headers
      .keys()
      .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
    if !has_content_type {
      self
        .headers
        .insert(CONTENT_TYPE.as_str().to_string(), "application/json".to_string());
    }
  }
}

pub fn bytes_to_string(bytes: &[u8]) -> Result<String, std::string::FromUtf8Error> {
  String::from_utf8(bytes.to_vec())
}

pub fn string_to_bytes(text: &str) -> Vec<u8> {
  text.as_bytes().to_vec()
}

pub fn bytes_to_json(bytes: &[u8]) -> serde_json::Result<Value> {
  serde_json::from_slice(bytes)
}

pub fn json_to_bytes(value: &Value) -> Vec<u8> {
  value.to_string().into_bytes()
}

/// Bodies are stored as base64 so snapshots stay valid JSON.
mod body_base64 {
  use base64::engine::general_purpose::STANDARD;
  use base64::Engine;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    match body {
      Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
      .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
      .transpose()
  }
}
