//! Uploader instances wired to the in-memory fakes

use super::fakes::{FakeApiClient, FakeTransferBackend, FakeWebDav, ItemUpdates, MemoryStore};
use attachment_transfer::{
    BackgroundUploads, Collaborators, Config, CustomLibraryType, Event, LibraryId,
    LocalFileStorage, ProcessRole, SerialQueue, SerialStore, TaskId, Upload, UploadKind,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use url::Url;

/// One uploader plus the fakes behind it
pub struct Harness {
    pub uploads: BackgroundUploads,
    pub backend: Arc<FakeTransferBackend>,
    pub api: Arc<FakeApiClient>,
    pub store: Arc<MemoryStore>,
    pub webdav: Arc<FakeWebDav>,
}

/// Settings for [`build_harness`]
pub struct HarnessOptions {
    pub role: ProcessRole,
    pub poll_interval: Duration,
    pub api: FakeApiClient,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            role: ProcessRole::Main,
            poll_interval: Duration::from_millis(50),
            api: FakeApiClient::new(ItemUpdates::Accept),
        }
    }
}

/// Config rooted in `dir`; instances built from the same dir share the context
pub fn test_config(dir: &Path, role: ProcessRole, poll_interval: Duration) -> Config {
    let mut config = Config::default();
    config.transfer.temp_dir = dir.join("temp");
    config.transfer.role = role;
    config.transfer.extension_poll_interval = poll_interval;
    config.persistence.database_path = dir.join("uploads.db");
    config.api.base_url = "https://api.example.org/".to_string();
    config
}

/// Create an uploader in `dir` with fake collaborators
pub async fn build_harness(dir: &Path, options: HarnessOptions) -> Harness {
    let backend = Arc::new(FakeTransferBackend::default());
    let api = Arc::new(options.api);
    let store = Arc::new(MemoryStore::default());
    let webdav = Arc::new(FakeWebDav::default());

    let collaborators = Collaborators {
        backend: backend.clone(),
        api: api.clone(),
        store: SerialStore::new(store.clone(), SerialQueue::new()),
        files: Arc::new(LocalFileStorage),
        webdav: webdav.clone(),
    };

    let config = test_config(dir, options.role, options.poll_interval);
    let uploads = BackgroundUploads::new(config, collaborators)
        .await
        .expect("failed to create uploader");

    Harness {
        uploads,
        backend,
        api,
        store,
        webdav,
    }
}

/// Main-process uploader in a fresh temp dir
pub async fn create_test_uploads() -> (Harness, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let harness = build_harness(dir.path(), HarnessOptions::default()).await;
    (harness, dir)
}

/// Write `contents` to `name` inside `dir`
pub async fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, contents).await.unwrap();
    path
}

pub fn vendor_upload(key: &str, file: &Path) -> Upload {
    Upload::new(
        UploadKind::Vendor {
            upload_key: format!("upload-{}", key),
        },
        key,
        LibraryId::Custom(CustomLibraryType::MyLibrary),
        7,
        Url::parse("https://uploads.example.org/").unwrap(),
        file,
        "9e107d9d372bb6826bd81d3542a419d6",
    )
}

pub fn webdav_upload(key: &str, file: &Path) -> Upload {
    Upload::new(
        UploadKind::Webdav { mtime: 1_700_000 },
        key,
        LibraryId::Group(3),
        7,
        Url::parse("https://dav.example.org/zotero/").unwrap(),
        file,
        "e4d909c290d0fb1ca068ffaddf22cbd0",
    )
}

/// Persist `upload` as if a transfer for it had been started earlier
pub async fn seed_upload(
    uploads: &BackgroundUploads,
    task_id: i64,
    session_id: &str,
    upload: Upload,
    size: u64,
    created_at: DateTime<Utc>,
    extension: bool,
) {
    let mut upload = upload.started(upload.file_path.clone(), size, session_id);
    upload.created_at = created_at;
    let session_id = session_id.to_string();

    uploads
        .db
        .update_context(move |state| {
            state.session_ids.insert(session_id.clone());
            if extension {
                state.extension_session_ids.insert(session_id);
            }
            state.uploads.insert(TaskId(task_id), upload);
        })
        .await
        .unwrap();
}

/// Receive events until one matches `predicate`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    predicate: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `condition` until it holds
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time")
}
