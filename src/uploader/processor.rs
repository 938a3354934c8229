//! Finalization Processor
//!
//! Runs the backend-specific completion protocol once a transfer finished.
//! Each upload is finalized with a single attempt; the API client may retry
//! transient failures internally but nothing here does. The streamed file is
//! removed in every branch.

use std::sync::Arc;
use url::Url;

use crate::api::ApiClient;
use crate::api::requests::{ItemFileUpdate, RegisterUpload, SubmitItemUpdates, UpdatesResponse};
use crate::error::{FinalizeError, Result};
use crate::files::FileStorage;
use crate::store::SerialStore;
use crate::types::{LibraryId, Upload, UploadKind};
use crate::webdav::{WebDavCoordinator, WebDavUploadResult};

/// Completes transferred uploads against the vendor API and the local store
#[derive(Clone)]
pub struct FinalizationProcessor {
    api: Arc<dyn ApiClient>,
    store: SerialStore,
    files: Arc<dyn FileStorage>,
    webdav: Arc<dyn WebDavCoordinator>,
    base_url: Url,
}

impl FinalizationProcessor {
    /// Create a processor issuing API requests relative to `base_url`
    pub fn new(
        api: Arc<dyn ApiClient>,
        store: SerialStore,
        files: Arc<dyn FileStorage>,
        webdav: Arc<dyn WebDavCoordinator>,
        base_url: Url,
    ) -> Self {
        Self {
            api,
            store,
            files,
            webdav,
            base_url,
        }
    }

    /// Finalize one upload. A failed transfer only removes its file.
    pub async fn finish(&self, upload: &Upload, successful: bool) -> Result<()> {
        if !successful {
            self.delete(upload).await;
            return Ok(());
        }

        let result = match &upload.kind {
            UploadKind::Vendor { upload_key } => self.finish_vendor(upload, upload_key).await,
            UploadKind::Webdav { mtime } => self.finish_webdav(upload, *mtime).await,
        };

        self.delete(upload).await;
        result
    }

    async fn finish_vendor(&self, upload: &Upload, upload_key: &str) -> Result<()> {
        tracing::info!(key = %upload.key, "Registering vendor upload");

        let request = RegisterUpload {
            library_id: &upload.library_id,
            user_id: upload.user_id,
            key: &upload.key,
            upload_key,
        }
        .to_request(&self.base_url)?;

        let response = self.api.send(request).await?;
        let version = response
            .last_modified_version()
            .ok_or(FinalizeError::MissingVersion)?;

        self.mark_uploaded(&upload.library_id, &upload.key, version)
            .await
    }

    async fn finish_webdav(&self, upload: &Upload, mtime: i64) -> Result<()> {
        let result = WebDavUploadResult {
            mtime,
            hash: upload.md5.clone(),
            url: upload.remote_url.clone(),
        };
        self.webdav
            .finish_upload(&upload.key, Ok(result), None)
            .await?;

        let version = self.submit_hash_and_mtime(upload, mtime).await?;
        self.mark_uploaded(&upload.library_id, &upload.key, version)
            .await
    }

    /// Push the file's mtime and hash to the item so server bookkeeping
    /// matches the WebDAV file; returns the new library version
    async fn submit_hash_and_mtime(&self, upload: &Upload, mtime: i64) -> Result<i64> {
        tracing::info!(key = %upload.key, "Submitting mtime and md5");

        let version = self
            .store
            .item_version(&upload.library_id, &upload.key)
            .await
            .inspect_err(|e| tracing::error!(key = %upload.key, error = %e, "Failed to load item parameters"))?;

        let updates = [ItemFileUpdate {
            key: upload.key.clone(),
            version,
            mtime,
            md5: upload.md5.clone(),
        }];
        let request = SubmitItemUpdates {
            library_id: &upload.library_id,
            user_id: upload.user_id,
            updates: &updates,
        }
        .to_request(&self.base_url)?;

        let response = self.api.send(request).await?;
        let parsed: UpdatesResponse = response.json()?;
        if parsed.is_failed(0, &upload.key) {
            return Err(FinalizeError::CantSubmitItem {
                key: upload.key.clone(),
            }
            .into());
        }

        Ok(response
            .last_modified_version()
            .ok_or(FinalizeError::MissingVersion)?)
    }

    async fn mark_uploaded(&self, library_id: &LibraryId, key: &str, version: i64) -> Result<()> {
        tracing::info!(key, version, "Marking attachment as uploaded");

        self.store
            .mark_attachment_uploaded(library_id, key, version)
            .await
            .map_err(|e| {
                tracing::error!(key, error = %e, "Failed to mark attachment as uploaded");
                crate::Error::from(FinalizeError::Store(e.to_string()))
            })
    }

    async fn delete(&self, upload: &Upload) {
        tracing::info!(path = %upload.file_path.display(), "Deleting file after upload");
        if let Err(e) = self.files.remove(&upload.file_path).await {
            tracing::error!(path = %upload.file_path.display(), error = %e, "Failed to remove uploaded file");
        }
    }
}
