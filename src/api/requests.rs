//! Vendor requests issued while finalizing uploads

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use super::{ApiRequest, endpoint};
use crate::Result;
use crate::types::LibraryId;

/// Registers a finished vendor storage upload with its attachment item
#[derive(Clone, Debug)]
pub struct RegisterUpload<'a> {
    /// Library of the attachment
    pub library_id: &'a LibraryId,
    /// Owning user
    pub user_id: i64,
    /// Attachment key
    pub key: &'a str,
    /// Upload key issued when the upload was authorized
    pub upload_key: &'a str,
}

impl RegisterUpload<'_> {
    /// `POST <library>/items/<key>/file` with form body `upload=<upload key>`
    pub fn to_request(&self, base_url: &Url) -> Result<ApiRequest> {
        let path = format!(
            "{}/items/{}/file",
            self.library_id.api_path(self.user_id),
            self.key
        );
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("upload", self.upload_key)
            .finish();

        Ok(ApiRequest::new(Method::POST, endpoint(base_url, &path)?)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("If-None-Match", "*")
            .body(body))
    }
}

/// Attachment fields that must match an externally stored file
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemFileUpdate {
    /// Attachment key
    pub key: String,
    /// Local item version the update is based on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// File modification time (milliseconds)
    pub mtime: i64,
    /// File MD5
    pub md5: String,
}

/// Submits item updates to `POST <library>/items`
#[derive(Clone, Debug)]
pub struct SubmitItemUpdates<'a> {
    /// Library of the items
    pub library_id: &'a LibraryId,
    /// Owning user
    pub user_id: i64,
    /// Updates, answered by index in [`UpdatesResponse`]
    pub updates: &'a [ItemFileUpdate],
}

impl SubmitItemUpdates<'_> {
    /// Build the JSON request
    pub fn to_request(&self, base_url: &Url) -> Result<ApiRequest> {
        let path = format!("{}/items", self.library_id.api_path(self.user_id));
        ApiRequest::new(Method::POST, endpoint(base_url, &path)?).json(self.updates)
    }
}

/// One rejected object of a write request
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct FailedUpdate {
    /// Key of the rejected object, when the server reports it
    #[serde(default)]
    pub key: Option<String>,
    /// Status code for this object
    #[serde(default)]
    pub code: u16,
    /// Server message
    #[serde(default)]
    pub message: String,
}

/// Result of a multi-object write, keyed by request index
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdatesResponse {
    /// Objects written
    #[serde(default)]
    pub successful: BTreeMap<String, serde_json::Value>,
    /// Objects that needed no change
    #[serde(default)]
    pub unchanged: BTreeMap<String, serde_json::Value>,
    /// Objects the server refused
    #[serde(default)]
    pub failed: BTreeMap<String, FailedUpdate>,
}

impl UpdatesResponse {
    /// Whether the update of `key` (sent at `index`) was refused
    pub fn is_failed(&self, index: usize, key: &str) -> bool {
        self.failed.contains_key(&index.to_string())
            || self
                .failed
                .values()
                .any(|failure| failure.key.as_deref() == Some(key))
    }
}
