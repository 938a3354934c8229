//! WebDAV coordinator seam
//!
//! After a WebDAV transfer the server still needs the `<key>.prop` metadata
//! file next to `<key>.zip`, otherwise other clients treat the upload as
//! missing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use crate::files::FileStorage;
use crate::{Error, Result};

/// Metadata of a finished WebDAV upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebDavUploadResult {
    /// File modification time (milliseconds)
    pub mtime: i64,
    /// File MD5
    pub hash: String,
    /// WebDAV collection the file was uploaded to
    pub url: Url,
}

/// WebDAV coordinator used by finalization
#[async_trait]
pub trait WebDavCoordinator: Send + Sync {
    /// Complete an upload: on success write the remote metadata, then remove
    /// `file` if given
    async fn finish_upload(
        &self,
        key: &str,
        result: std::result::Result<WebDavUploadResult, Error>,
        file: Option<&Path>,
    ) -> Result<()>;
}

/// Body of the `<key>.prop` metadata file
pub fn metadata_properties(mtime: i64, hash: &str) -> String {
    format!(
        "<properties version=\"1\"><mtime>{}</mtime><hash>{}</hash></properties>",
        mtime, hash
    )
}

/// [`WebDavCoordinator`] writing metadata with a plain `PUT`
pub struct HttpWebDavCoordinator {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
    files: Arc<dyn FileStorage>,
}

impl HttpWebDavCoordinator {
    /// Create a coordinator; `credentials` are sent as basic auth
    pub fn new(
        client: reqwest::Client,
        credentials: Option<(String, String)>,
        files: Arc<dyn FileStorage>,
    ) -> Self {
        Self {
            client,
            credentials,
            files,
        }
    }

    async fn upload_metadata(&self, key: &str, upload: &WebDavUploadResult) -> Result<()> {
        tracing::info!(key, "Uploading WebDAV metadata");

        let url = crate::api::endpoint(&upload.url, &format!("{}.prop", key))?;
        let mut request = self
            .client
            .put(url)
            .body(metadata_properties(upload.mtime, &upload.hash));
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let status = request.send().await?.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(Error::UnacceptableStatus { code: status });
        }

        Ok(())
    }
}

#[async_trait]
impl WebDavCoordinator for HttpWebDavCoordinator {
    async fn finish_upload(
        &self,
        key: &str,
        result: std::result::Result<WebDavUploadResult, Error>,
        file: Option<&Path>,
    ) -> Result<()> {
        match result {
            Ok(upload) => {
                self.upload_metadata(key, &upload).await?;
            }
            Err(e) => {
                tracing::error!(key, error = %e, "WebDAV upload failed");
            }
        }

        if let Some(file) = file {
            self.files.remove(file).await?;
        }

        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::LocalFileStorage;
    use wiremock::matchers::{body_string, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator(credentials: Option<(String, String)>) -> HttpWebDavCoordinator {
        HttpWebDavCoordinator::new(
            reqwest::Client::new(),
            credentials,
            Arc::new(LocalFileStorage),
        )
    }

    #[test]
    fn properties_document() {
        assert_eq!(
            metadata_properties(1_600_000_000_000, "abc"),
            "<properties version=\"1\"><mtime>1600000000000</mtime><hash>abc</hash></properties>"
        );
    }

    #[tokio::test]
    async fn success_writes_prop_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/zotero/ABCD1234.prop"))
            .and(header_exists("Authorization"))
            .and(body_string(metadata_properties(42, "deadbeef")))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let result = WebDavUploadResult {
            mtime: 42,
            hash: "deadbeef".into(),
            url: Url::parse(&format!("{}/zotero/", server.uri())).unwrap(),
        };

        coordinator(Some(("user".into(), "pass".into())))
            .finish_upload("ABCD1234", Ok(result), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_metadata_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(507))
            .mount(&server)
            .await;

        let result = WebDavUploadResult {
            mtime: 1,
            hash: "x".into(),
            url: Url::parse(&format!("{}/zotero", server.uri())).unwrap(),
        };

        let outcome = coordinator(None)
            .finish_upload("KEY", Ok(result), None)
            .await;
        assert!(matches!(outcome, Err(Error::UnacceptableStatus { code: 507 })));
    }

    #[tokio::test]
    async fn failure_only_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("upload.zip");
        tokio::fs::write(&file, b"zip").await.unwrap();

        coordinator(None)
            .finish_upload("KEY", Err(Error::Transport("lost".into())), Some(&file))
            .await
            .unwrap();

        assert!(!file.exists());
    }
}
