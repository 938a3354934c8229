//! Request Builder
//!
//! Produces the outbound request of an upload together with the file the
//! transfer streams from. Vendor uploads get a multipart copy written to a
//! fresh file in the temp directory, so the caller's original stays usable and
//! deletable on its own. WebDAV uploads stream the caller's zip as-is.

use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;
use uuid::Uuid;

use crate::error::{BuildError, Error, Result};
use crate::files::FileStorage;
use crate::transfer::TransferRequest;
use crate::types::{Upload, UploadKind};

/// Caller-supplied details of the file part and extra request data
#[derive(Clone, Debug, Default)]
pub struct UploadParams {
    /// Filename announced in the multipart file part
    pub filename: String,
    /// MIME type of the file part
    pub mime_type: String,
    /// Form fields written before the file part, in order
    pub form_fields: Vec<(String, String)>,
    /// Extra request headers (vendor uploads only)
    pub headers: Vec<(String, String)>,
}

/// A request ready to hand to the transfer backend
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    /// The request to send
    pub request: TransferRequest,
    /// File whose contents form the request body
    pub file: PathBuf,
    /// Size of `file` in bytes
    pub size: u64,
}

/// Builds upload requests for both backends
#[derive(Clone)]
pub struct RequestBuilder {
    temp_dir: PathBuf,
    api_version: u32,
    files: Arc<dyn FileStorage>,
}

impl RequestBuilder {
    /// Create a builder writing multipart copies into `temp_dir`
    pub fn new(temp_dir: impl Into<PathBuf>, api_version: u32, files: Arc<dyn FileStorage>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            api_version,
            files,
        }
    }

    /// Build the request for `upload`.
    ///
    /// Every failure is an [`Error::Build`]; a multipart copy that was
    /// partially written is removed again before returning.
    pub async fn build(
        &self,
        upload: &Upload,
        params: &UploadParams,
        schema_version: u32,
    ) -> Result<PreparedRequest> {
        match &upload.kind {
            UploadKind::Webdav { .. } => self.webdav_request(upload).await,
            UploadKind::Vendor { .. } => {
                self.multipart_request(upload, params, schema_version).await
            }
        }
    }

    async fn webdav_request(&self, upload: &Upload) -> Result<PreparedRequest> {
        let url = crate::api::endpoint(&upload.remote_url, &format!("{}.zip", upload.key))
            .map_err(|e| BuildError::InvalidRequest(e.to_string()))?;
        let request = TransferRequest {
            method: Method::PUT,
            url,
            headers: Vec::new(),
        };
        validate(&request)?;

        let size = match self.files.size(&upload.file_path).await {
            Ok(size) => size,
            Err(Error::Io(source)) => {
                return Err(BuildError::SourceFile {
                    path: upload.file_path.clone(),
                    source,
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        Ok(PreparedRequest {
            request,
            file: upload.file_path.clone(),
            size,
        })
    }

    async fn multipart_request(
        &self,
        upload: &Upload,
        params: &UploadParams,
        schema_version: u32,
    ) -> Result<PreparedRequest> {
        let boundary = format!("attachment-transfer.boundary.{}", Uuid::new_v4().simple());

        let mut headers = params.headers.clone();
        headers.retain(|(name, _)| {
            !["content-type", "zotero-api-version", "zotero-schema-version"]
                .iter()
                .any(|reserved| name.eq_ignore_ascii_case(reserved))
        });
        headers.push((
            "Content-Type".into(),
            format!("multipart/form-data; boundary={}", boundary),
        ));
        headers.push(("Zotero-API-Version".into(), self.api_version.to_string()));
        headers.push(("Zotero-Schema-Version".into(), schema_version.to_string()));

        let request = TransferRequest {
            method: Method::POST,
            url: upload.remote_url.clone(),
            headers,
        };
        validate(&request)?;

        let file = self
            .temp_dir
            .join(format!("{}.multipart", Uuid::new_v4().simple()));
        if let Err(e) = self.files.create_dir_all(&self.temp_dir).await {
            tracing::error!(path = %self.temp_dir.display(), error = %e, "Failed to create upload directory");
            return Err(e);
        }

        if let Err(e) = write_multipart(&file, &boundary, &upload.file_path, params).await {
            tracing::error!(key = %upload.key, error = %e, "Failed to create multipart form data");
            if let Err(remove_error) = self.files.remove(&file).await {
                tracing::debug!(path = %file.display(), error = %remove_error, "No partial multipart file to remove");
            }
            return Err(e.into());
        }

        let size = self.files.size(&file).await?;
        tracing::debug!(key = %upload.key, path = %file.display(), size, "Wrote multipart upload file");

        Ok(PreparedRequest {
            request,
            file,
            size,
        })
    }
}

/// Structural checks a transfer backend would otherwise reject late
fn validate(request: &TransferRequest) -> std::result::Result<(), BuildError> {
    check_url(&request.url)?;

    for (name, value) in &request.headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BuildError::InvalidRequest(format!("invalid header name {:?}", name)))?;
        HeaderValue::from_str(value).map_err(|_| {
            BuildError::InvalidRequest(format!("invalid value for header {}", name))
        })?;
    }

    Ok(())
}

fn check_url(url: &Url) -> std::result::Result<(), BuildError> {
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(BuildError::InvalidRequest(format!(
            "{} is not an http(s) URL",
            url
        )));
    }
    Ok(())
}

/// Quoted multipart parameters may not break out of their quotes or line
fn form_token(value: &str, what: &str) -> std::result::Result<(), BuildError> {
    if value.contains(['"', '\r', '\n']) {
        return Err(BuildError::FormEncoding(format!(
            "{} {:?} contains a quote or line break",
            what, value
        )));
    }
    Ok(())
}

async fn write_multipart(
    path: &Path,
    boundary: &str,
    source: &Path,
    params: &UploadParams,
) -> std::result::Result<(), BuildError> {
    for (name, _) in &params.form_fields {
        form_token(name, "form field")?;
    }
    form_token(&params.filename, "filename")?;
    form_token(&params.mime_type, "mime type")?;

    let mut original = tokio::fs::File::open(source)
        .await
        .map_err(|source_error| BuildError::SourceFile {
            path: source.to_path_buf(),
            source: source_error,
        })?;

    let temp_file = |source| BuildError::TempFile {
        path: path.to_path_buf(),
        source,
    };

    let mut out = BufWriter::new(tokio::fs::File::create(path).await.map_err(temp_file)?);

    let mut head = String::new();
    for (name, value) in &params.form_fields {
        head.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            boundary, name, value
        ));
    }
    head.push_str(&format!(
        "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
        boundary, params.filename, params.mime_type
    ));

    out.write_all(head.as_bytes()).await.map_err(temp_file)?;
    tokio::io::copy(&mut original, &mut out)
        .await
        .map_err(temp_file)?;
    out.write_all(format!("\r\n--{}--\r\n", boundary).as_bytes())
        .await
        .map_err(temp_file)?;
    out.flush().await.map_err(temp_file)?;

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::LocalFileStorage;
    use crate::types::{CustomLibraryType, LibraryId};

    fn upload(kind: UploadKind, file: &Path, remote: &str) -> Upload {
        Upload::new(
            kind,
            "ABCD1234",
            LibraryId::Custom(CustomLibraryType::MyLibrary),
            1,
            Url::parse(remote).unwrap(),
            file,
            "0123456789abcdef",
        )
    }

    fn params() -> UploadParams {
        UploadParams {
            filename: "paper.pdf".into(),
            mime_type: "application/pdf".into(),
            form_fields: vec![
                ("key".into(), "uploads/abc".into()),
                ("policy".into(), "p0l1cy".into()),
            ],
            headers: vec![("X-Caller".into(), "yes".into())],
        }
    }

    #[tokio::test]
    async fn vendor_upload_writes_multipart_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        tokio::fs::write(&source, b"%PDF-1.7 body").await.unwrap();

        let builder = RequestBuilder::new(dir.path().join("temp"), 3, Arc::new(LocalFileStorage));
        let upload = upload(
            UploadKind::Vendor {
                upload_key: "uk".into(),
            },
            &source,
            "https://storage.example.org/upload",
        );

        let prepared = builder.build(&upload, &params(), 27).await.unwrap();

        assert_eq!(prepared.request.method, Method::POST);
        assert_eq!(prepared.request.url, upload.remote_url);
        assert_eq!(prepared.request.header_value("zotero-api-version"), Some("3"));
        assert_eq!(prepared.request.header_value("Zotero-Schema-Version"), Some("27"));
        assert_eq!(prepared.request.header_value("X-Caller"), Some("yes"));

        let content_type = prepared.request.header_value("Content-Type").unwrap();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();

        assert_ne!(prepared.file, source);
        assert!(prepared.file.starts_with(dir.path().join("temp")));
        assert!(source.exists());

        let body = tokio::fs::read_to_string(&prepared.file).await.unwrap();
        assert_eq!(prepared.size, body.len() as u64);

        let key_field = body.find("name=\"key\"").unwrap();
        let policy_field = body.find("name=\"policy\"").unwrap();
        let file_part = body.find("filename=\"paper.pdf\"").unwrap();
        assert!(key_field < policy_field && policy_field < file_part);
        assert!(body.contains("Content-Type: application/pdf\r\n\r\n%PDF-1.7 body\r\n"));
        assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[tokio::test]
    async fn webdav_upload_streams_the_zip() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("ABCD1234.zip");
        tokio::fs::write(&zip, vec![7u8; 321]).await.unwrap();

        let builder = RequestBuilder::new(dir.path().join("temp"), 3, Arc::new(LocalFileStorage));
        let upload = upload(
            UploadKind::Webdav { mtime: 5 },
            &zip,
            "https://dav.example.org/zotero",
        );

        let prepared = builder.build(&upload, &params(), 27).await.unwrap();

        assert_eq!(prepared.request.method, Method::PUT);
        assert_eq!(
            prepared.request.url.as_str(),
            "https://dav.example.org/zotero/ABCD1234.zip"
        );
        assert!(prepared.request.headers.is_empty());
        assert_eq!(prepared.file, zip);
        assert_eq!(prepared.size, 321);
        assert!(!dir.path().join("temp").exists());
    }

    #[tokio::test]
    async fn missing_source_fails_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        let builder = RequestBuilder::new(&temp, 3, Arc::new(LocalFileStorage));
        let upload = upload(
            UploadKind::Vendor {
                upload_key: "uk".into(),
            },
            &dir.path().join("gone.pdf"),
            "https://storage.example.org/upload",
        );

        let error = builder.build(&upload, &params(), 1).await.unwrap_err();
        assert!(matches!(error, Error::Build(BuildError::SourceFile { .. })));

        let mut entries = tokio::fs::read_dir(&temp).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        tokio::fs::write(&source, b"x").await.unwrap();

        let builder = RequestBuilder::new(dir.path().join("temp"), 3, Arc::new(LocalFileStorage));
        let upload = upload(
            UploadKind::Vendor {
                upload_key: "uk".into(),
            },
            &source,
            "https://storage.example.org/upload",
        );
        let mut params = params();
        params.headers.push(("Bad Header".into(), "v".into()));

        let error = builder.build(&upload, &params, 1).await.unwrap_err();
        assert!(matches!(error, Error::Build(BuildError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn quote_in_filename_is_a_form_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        tokio::fs::write(&source, b"x").await.unwrap();

        let builder = RequestBuilder::new(dir.path().join("temp"), 3, Arc::new(LocalFileStorage));
        let upload = upload(
            UploadKind::Vendor {
                upload_key: "uk".into(),
            },
            &source,
            "https://storage.example.org/upload",
        );
        let mut params = params();
        params.filename = "a\"b.pdf".into();

        let error = builder.build(&upload, &params, 1).await.unwrap_err();
        assert!(matches!(error, Error::Build(BuildError::FormEncoding(_))));
    }

    #[test]
    fn non_http_urls_fail_validation() {
        let request = TransferRequest {
            method: Method::PUT,
            url: Url::parse("file:///tmp/x").unwrap(),
            headers: vec![],
        };
        assert!(validate(&request).is_err());
    }
}
