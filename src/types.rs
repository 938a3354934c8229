//! Core types for attachment-transfer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::error::Error;

/// Identifier of one transfer task, as handed out by the transfer backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Globally unique identifier of a background transfer session
pub type SessionId = String;

/// Custom (non-group) library kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomLibraryType {
    /// The user's personal library
    MyLibrary,
}

/// Library an attachment belongs to
///
/// Serialized as `{"custom": "myLibrary"}` or `{"group": 42}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LibraryId {
    /// A custom library owned by the user
    Custom(CustomLibraryType),
    /// A group library
    Group(i64),
}

impl LibraryId {
    /// API path prefix for this library (`users/<id>` or `groups/<id>`)
    pub fn api_path(&self, user_id: i64) -> String {
        match self {
            LibraryId::Custom(_) => format!("users/{}", user_id),
            LibraryId::Group(id) => format!("groups/{}", id),
        }
    }
}

/// Destination backend of an upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UploadKindRepr", into = "UploadKindRepr")]
pub enum UploadKind {
    /// Vendor storage, finished by registering the pre-issued upload key
    Vendor {
        /// Upload key returned by the upload authorization call
        upload_key: String,
    },
    /// User-configured WebDAV server
    Webdav {
        /// Modification time of the uploaded file (milliseconds)
        mtime: i64,
    },
}

/// On-disk shape of [`UploadKind`]: exactly one of the two keys is present.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadKindRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    zotero_upload_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    webdav_mtime: Option<i64>,
}

impl TryFrom<UploadKindRepr> for UploadKind {
    type Error = String;

    fn try_from(repr: UploadKindRepr) -> Result<Self, Self::Error> {
        match (repr.zotero_upload_key, repr.webdav_mtime) {
            (Some(upload_key), _) => Ok(UploadKind::Vendor { upload_key }),
            (None, Some(mtime)) => Ok(UploadKind::Webdav { mtime }),
            (None, None) => Err("upload type has neither zoteroUploadKey nor webdavMtime".into()),
        }
    }
}

impl From<UploadKind> for UploadKindRepr {
    fn from(kind: UploadKind) -> Self {
        match kind {
            UploadKind::Vendor { upload_key } => Self {
                zotero_upload_key: Some(upload_key),
                webdav_mtime: None,
            },
            UploadKind::Webdav { mtime } => Self {
                zotero_upload_key: None,
                webdav_mtime: Some(mtime),
            },
        }
    }
}

/// Callback notified about the outcome of an upload started in this process.
///
/// Only lives in memory; it is never persisted and does not survive a restart.
#[derive(Clone)]
pub struct CompletionHandler(Arc<dyn Fn(Result<&Upload, &Error>) + Send + Sync>);

impl CompletionHandler {
    /// Wrap a closure as a completion handler
    pub fn new(handler: impl Fn(Result<&Upload, &Error>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    pub(crate) fn notify(&self, result: Result<&Upload, &Error>) {
        (self.0)(result)
    }
}

impl std::fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompletionHandler")
    }
}

/// Durable record of one in-flight transfer and everything needed to finish it
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "UploadRecord", into = "UploadRecord")]
pub struct Upload {
    /// Backend the file is uploaded to
    pub kind: UploadKind,
    /// Attachment item key
    pub key: String,
    /// Library of the attachment
    pub library_id: LibraryId,
    /// Owning user
    pub user_id: i64,
    /// Upload destination (vendor upload URL or WebDAV collection URL)
    pub remote_url: Url,
    /// Throwaway copy that is streamed by the transfer; deleted on finalization
    pub file_path: PathBuf,
    /// MD5 of the original file
    pub md5: String,
    /// Session the transfer task belongs to (empty until started)
    pub session_id: SessionId,
    /// When the upload was requested
    pub created_at: DateTime<Utc>,
    /// Size of `file_path` in bytes (0 until started)
    pub size: u64,
    /// In-memory completion callback
    pub completion: Option<CompletionHandler>,
}

impl Upload {
    /// Create a new upload request. `session_id` and `size` are filled in when the
    /// transfer is started.
    pub fn new(
        kind: UploadKind,
        key: impl Into<String>,
        library_id: LibraryId,
        user_id: i64,
        remote_url: Url,
        file_path: impl Into<PathBuf>,
        md5: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            library_id,
            user_id,
            remote_url,
            file_path: file_path.into(),
            md5: md5.into(),
            session_id: String::new(),
            created_at: Utc::now(),
            size: 0,
            completion: None,
        }
    }

    /// Attach an in-memory completion callback
    pub fn with_completion(mut self, completion: CompletionHandler) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Copy of this upload pointing at the streamable file of a started transfer
    pub fn started(&self, file_path: PathBuf, size: u64, session_id: &str) -> Self {
        Self {
            file_path,
            size,
            session_id: session_id.to_string(),
            ..self.clone()
        }
    }

    pub(crate) fn notify(&self, result: Result<&Upload, &Error>) {
        if let Some(completion) = &self.completion {
            completion.notify(result);
        }
    }
}

/// Persisted shape of [`Upload`].
///
/// Older records carry a flat `uploadKey` instead of `type`, and may lack
/// `sessionId`, `size` or `date`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<UploadKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    upload_key: Option<String>,
    key: String,
    library_id: LibraryId,
    user_id: i64,
    remote_url: Url,
    #[serde(rename = "fileUrl")]
    file_path: PathBuf,
    md5: String,
    #[serde(default)]
    session_id: String,
    #[serde(rename = "date", default = "unix_epoch")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    size: u64,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl TryFrom<UploadRecord> for Upload {
    type Error = String;

    fn try_from(record: UploadRecord) -> Result<Self, Self::Error> {
        let kind = match (record.upload_key, record.kind) {
            (Some(upload_key), _) => UploadKind::Vendor { upload_key },
            (None, Some(kind)) => kind,
            (None, None) => return Err(format!("upload {} has no type", record.key)),
        };

        Ok(Self {
            kind,
            key: record.key,
            library_id: record.library_id,
            user_id: record.user_id,
            remote_url: record.remote_url,
            file_path: record.file_path,
            md5: record.md5,
            session_id: record.session_id,
            created_at: record.created_at,
            size: record.size,
            completion: None,
        })
    }
}

impl From<Upload> for UploadRecord {
    fn from(upload: Upload) -> Self {
        Self {
            kind: Some(upload.kind),
            upload_key: None,
            key: upload.key,
            library_id: upload.library_id,
            user_id: upload.user_id,
            remote_url: upload.remote_url,
            file_path: upload.file_path,
            md5: upload.md5,
            session_id: upload.session_id,
            created_at: upload.created_at,
            size: upload.size,
        }
    }
}

/// Which of the two cooperating processes this instance runs in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// The long-lived main application
    #[default]
    Main,
    /// The short-lived extension process
    Extension,
}

/// Event emitted during the upload lifecycle
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A transfer task was registered and started
    UploadStarted {
        /// Task ID
        task_id: TaskId,
        /// Session carrying the task
        session_id: SessionId,
        /// Attachment key
        key: String,
    },

    /// The transfer backend reported a finished task
    TaskFinished {
        /// Task ID
        task_id: TaskId,
        /// Session carrying the task
        session_id: SessionId,
        /// Attachment key
        key: String,
        /// Whether the transfer itself succeeded
        success: bool,
    },

    /// Finalization of an upload settled
    UploadFinalized {
        /// Attachment key
        key: String,
        /// Whether the whole upload (transfer and finalization) succeeded
        success: bool,
    },

    /// An upload was dropped because it exceeded its size-tier timeout
    UploadTimedOut {
        /// Task ID
        task_id: TaskId,
        /// Attachment key
        key: String,
    },

    /// This process started observing a session
    SessionObserved {
        /// Session ID
        session_id: SessionId,
    },

    /// A session was invalidated and its tasks cancelled
    SessionInvalidated {
        /// Session ID
        session_id: SessionId,
    },

    /// The extension process released a session to this process
    SessionHandedOff {
        /// Session ID
        session_id: SessionId,
    },

    /// Every upload was cancelled
    AllUploadsCancelled,

    /// The uploader is shutting down
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vendor_upload() -> Upload {
        Upload::new(
            UploadKind::Vendor {
                upload_key: "abc123".to_string(),
            },
            "AAAA1111",
            LibraryId::Custom(CustomLibraryType::MyLibrary),
            7,
            Url::parse("https://uploads.example.org/").unwrap(),
            "/tmp/original.pdf",
            "d41d8cd98f00b204e9800998ecf8427e",
        )
    }

    #[test]
    fn library_api_paths() {
        let custom = LibraryId::Custom(CustomLibraryType::MyLibrary);
        assert_eq!(custom.api_path(12), "users/12");
        assert_eq!(LibraryId::Group(99).api_path(12), "groups/99");
    }

    #[test]
    fn library_id_uses_keyed_representation() {
        let value = serde_json::to_value(LibraryId::Group(5)).unwrap();
        assert_eq!(value, json!({"group": 5}));

        let value = serde_json::to_value(LibraryId::Custom(CustomLibraryType::MyLibrary)).unwrap();
        assert_eq!(value, json!({"custom": "myLibrary"}));
    }

    #[test]
    fn upload_encodes_current_format() {
        let upload = vendor_upload().started(PathBuf::from("/tmp/copy"), 42, "session-1");
        let value = serde_json::to_value(&upload).unwrap();

        assert_eq!(value["type"], json!({"zoteroUploadKey": "abc123"}));
        assert_eq!(value["fileUrl"], "/tmp/copy");
        assert_eq!(value["sessionId"], "session-1");
        assert_eq!(value["size"], 42);
        assert!(value.get("uploadKey").is_none(), "legacy key must not be written");
        assert!(value.get("completion").is_none(), "callback must never be persisted");
    }

    #[test]
    fn webdav_kind_encodes_mtime() {
        let value = serde_json::to_value(UploadKind::Webdav { mtime: 1_600_000 }).unwrap();
        assert_eq!(value, json!({"webdavMtime": 1_600_000}));
    }

    #[test]
    fn legacy_flat_upload_key_decodes_as_vendor() {
        let legacy = json!({
            "uploadKey": "legacy-key",
            "key": "BBBB2222",
            "libraryId": {"group": 3},
            "userId": 1,
            "remoteUrl": "https://uploads.example.org/",
            "fileUrl": "/tmp/legacy",
            "md5": "abc"
        });

        let upload: Upload = serde_json::from_value(legacy).unwrap();

        assert_eq!(
            upload.kind,
            UploadKind::Vendor {
                upload_key: "legacy-key".to_string()
            }
        );
        assert_eq!(upload.session_id, "");
        assert_eq!(upload.size, 0);
        assert_eq!(upload.created_at, DateTime::<Utc>::UNIX_EPOCH);
        assert!(upload.completion.is_none());
    }

    #[test]
    fn record_without_any_type_is_rejected() {
        let broken = json!({
            "key": "CCCC3333",
            "libraryId": {"group": 3},
            "userId": 1,
            "remoteUrl": "https://uploads.example.org/",
            "fileUrl": "/tmp/broken",
            "md5": "abc"
        });

        assert!(serde_json::from_value::<Upload>(broken).is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut value = serde_json::to_value(vendor_upload()).unwrap();
        value["addedInAFutureVersion"] = json!(true);

        let upload: Upload = serde_json::from_value(value).unwrap();
        assert_eq!(upload.key, "AAAA1111");
    }

    #[test]
    fn started_copy_keeps_identity_and_completion() {
        let upload = vendor_upload().with_completion(CompletionHandler::new(|_| {}));
        let started = upload.started(PathBuf::from("/tmp/copy"), 10, "s");

        assert_eq!(started.key, upload.key);
        assert_eq!(started.created_at, upload.created_at);
        assert_eq!(started.file_path, PathBuf::from("/tmp/copy"));
        assert!(started.completion.is_some());
    }
}
