//! reqwest-backed [`ApiClient`]

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::{ApiClient, ApiRequest, ApiResponse};
use crate::config::ApiConfig;
use crate::retry::with_retry;
use crate::{Error, Result};

/// Vendor API client over reqwest
///
/// Adds the API version header and bearer token to every request and retries
/// transient failures according to [`ApiConfig::retry`].
#[derive(Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpApiClient {
    /// Create a client with its own connection pool
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("attachment-transfer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client reusing an existing reqwest client
    pub fn with_client(client: reqwest::Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    fn build(&self, request: ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());

        if request.header_value("Zotero-API-Version").is_none() {
            builder = builder.header("Zotero-API-Version", self.config.api_version.to_string());
        }
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        builder
    }

    /// Send once and turn non-2xx answers into errors
    async fn execute(&self, request: ApiRequest) -> Result<reqwest::Response> {
        let method = request.method.clone();
        let url = request.url.clone();
        let response = self.build(request).send().await?;
        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            tracing::debug!(%method, %url, status, "API request returned unacceptable status");
            return Err(Error::UnacceptableStatus { code: status });
        }

        Ok(response)
    }

    async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    async fn fetch_to_file(&self, request: ApiRequest, destination: &Path) -> Result<()> {
        let response = self.execute(request).await?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        with_retry(&self.config.retry, || {
            let request = request.clone();
            async move { self.fetch(request).await }
        })
        .await
    }

    async fn download(&self, request: ApiRequest, destination: &Path) -> Result<()> {
        with_retry(&self.config.retry, || {
            let request = request.clone();
            async move { self.fetch_to_file(request, destination).await }
        })
        .await
    }
}
