//! Generic API client seam
//!
//! Finalization talks to the vendor API only through [`ApiClient`]. The
//! client owns its retry policy; callers issue each request exactly once.
//!
//! - [`HttpApiClient`] - reqwest implementation with backoff on 429/5xx
//! - [`requests`] - the two vendor requests finalization needs

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::Result;

mod http;
pub mod requests;

pub use http::HttpApiClient;

/// Header carrying the resource version after a write
pub const LAST_MODIFIED_VERSION: &str = "last-modified-version";

/// Outbound API request
#[derive(Clone, Debug)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute request URL
    pub url: Url,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<Bytes>,
}

impl ApiRequest {
    /// Create a request without headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and content type
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body)?;
        Ok(self.header("Content-Type", "application/json").body(json))
    }

    /// First value of a header, compared case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response of a successful API request
#[derive(Clone, Debug, Default)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: Bytes,
}

impl ApiResponse {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Version from the `Last-Modified-Version` header
    pub fn last_modified_version(&self) -> Option<i64> {
        self.header(LAST_MODIFIED_VERSION)?.trim().parse().ok()
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Generic vendor API client
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send a request; non-2xx answers are returned as errors
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Send a request and stream the response body into `destination`
    async fn download(&self, request: ApiRequest, destination: &Path) -> Result<()>;
}

/// Join an API path onto a base URL, tolerating a base without trailing slash
pub(crate) fn endpoint(base_url: &Url, path: &str) -> Result<Url> {
    if base_url.path().ends_with('/') {
        Ok(base_url.join(path)?)
    } else {
        let mut base = base_url.clone();
        base.set_path(&format!("{}/", base_url.path()));
        Ok(base.join(path)?)
    }
}
