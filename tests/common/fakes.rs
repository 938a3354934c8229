//! In-memory collaborators for driving the uploader without a network

use async_trait::async_trait;
use attachment_transfer::{
    ApiClient, ApiRequest, ApiResponse, AttachmentStore, Error, EventSink, LibraryId, Result,
    SessionConfig, SessionEvent, SessionId, TaskId, TaskResult, TransferBackend, TransferRequest,
    WebDavCoordinator, WebDavUploadResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;

/// Transfer backend that records calls and lets the test emit events
#[derive(Default)]
pub struct FakeTransferBackend {
    sinks: Mutex<HashMap<SessionId, EventSink>>,
    attached: Mutex<Vec<SessionId>>,
    cancelled: Mutex<Vec<SessionId>>,
    detached: Mutex<Vec<SessionId>>,
    tasks: Mutex<Vec<(SessionId, TaskId, TransferRequest, PathBuf, u64)>>,
    resumed: Mutex<Vec<TaskId>>,
    next_task_id: AtomicI64,
}

impl FakeTransferBackend {
    /// Deliver an event through the sink attached to `session_id`
    pub fn emit(&self, session_id: &str, event: SessionEvent) {
        let sinks = self.sinks.lock().unwrap();
        let sink = sinks
            .get(session_id)
            .unwrap_or_else(|| panic!("session {} is not attached", session_id));
        sink.emit(event).expect("observer is gone");
    }

    /// Report a finished task
    pub fn complete(&self, session_id: &str, task_id: TaskId, result: TaskResult) {
        self.emit(
            session_id,
            SessionEvent::TaskCompleted {
                session_id: session_id.to_string(),
                task_id,
                result,
            },
        );
    }

    /// Report that every event of the session was delivered
    pub fn drain(&self, session_id: &str) {
        self.emit(
            session_id,
            SessionEvent::SessionDrained {
                session_id: session_id.to_string(),
            },
        );
    }

    pub fn attach_count(&self, session_id: &str) -> usize {
        self.attached
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == session_id)
            .count()
    }

    pub fn attached(&self) -> Vec<SessionId> {
        self.attached.lock().unwrap().clone()
    }

    pub fn cancel_count(&self, session_id: &str) -> usize {
        self.cancelled
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == session_id)
            .count()
    }

    pub fn cancelled(&self) -> Vec<SessionId> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn detached(&self) -> Vec<SessionId> {
        self.detached.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<(SessionId, TaskId, TransferRequest, PathBuf, u64)> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn resumed(&self) -> Vec<TaskId> {
        self.resumed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferBackend for FakeTransferBackend {
    async fn attach(&self, config: SessionConfig, sink: EventSink) -> Result<()> {
        self.sinks
            .lock()
            .unwrap()
            .insert(config.identifier.clone(), sink);
        self.attached.lock().unwrap().push(config.identifier);
        Ok(())
    }

    async fn create_task(
        &self,
        session_id: &str,
        request: TransferRequest,
        file: &Path,
        expected_bytes: u64,
    ) -> Result<TaskId> {
        let task_id = TaskId(1000 + self.next_task_id.fetch_add(1, Ordering::SeqCst));
        self.tasks.lock().unwrap().push((
            session_id.to_string(),
            task_id,
            request,
            file.to_path_buf(),
            expected_bytes,
        ));
        Ok(task_id)
    }

    async fn resume_task(&self, _session_id: &str, task_id: TaskId) -> Result<()> {
        self.resumed.lock().unwrap().push(task_id);
        Ok(())
    }

    async fn cancel_session(&self, session_id: &str) -> Result<()> {
        self.sinks.lock().unwrap().remove(session_id);
        self.cancelled.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn detach(&self, session_id: &str) -> Result<()> {
        self.sinks.lock().unwrap().remove(session_id);
        self.detached.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

/// How [`FakeApiClient`] answers item update requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemUpdates {
    Accept,
    Reject,
}

/// API client answering register-upload and item-update requests
pub struct FakeApiClient {
    requests: Mutex<Vec<ApiRequest>>,
    item_updates: ItemUpdates,
    gate: Option<std::sync::Arc<Notify>>,
}

impl FakeApiClient {
    pub fn new(item_updates: ItemUpdates) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            item_updates,
            gate: None,
        }
    }

    /// Hold every response until `gate` is notified
    pub fn gated(gate: std::sync::Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(ItemUpdates::Accept)
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn response(status: u16, version: i64, body: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status,
        headers: HashMap::from([("last-modified-version".to_string(), version.to_string())]),
        body: serde_json::to_vec(&body).unwrap().into(),
    }
}

#[async_trait]
impl ApiClient for FakeApiClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let path = request.url.path().to_string();
        if path.ends_with("/file") {
            return Ok(response(204, 100, serde_json::Value::Null));
        }
        if path.ends_with("/items") {
            return Ok(match self.item_updates {
                ItemUpdates::Accept => response(
                    200,
                    101,
                    serde_json::json!({"successful": {"0": {}}, "unchanged": {}, "failed": {}}),
                ),
                ItemUpdates::Reject => response(
                    200,
                    101,
                    serde_json::json!({
                        "successful": {},
                        "unchanged": {},
                        "failed": {"0": {"code": 409, "message": "conflict"}}
                    }),
                ),
            });
        }
        Err(Error::UnacceptableStatus { code: 404 })
    }

    async fn download(&self, _request: ApiRequest, _destination: &Path) -> Result<()> {
        Err(Error::Other("downloads are not used by uploads".into()))
    }
}

/// Item store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    versions: Mutex<HashMap<String, i64>>,
    marked: Mutex<Vec<(LibraryId, String, i64)>>,
}

impl MemoryStore {
    pub fn marked(&self) -> Vec<(LibraryId, String, i64)> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentStore for MemoryStore {
    async fn item_version(&self, _library_id: &LibraryId, key: &str) -> Result<Option<i64>> {
        Ok(self.versions.lock().unwrap().get(key).copied())
    }

    async fn mark_attachment_uploaded(
        &self,
        library_id: &LibraryId,
        key: &str,
        version: i64,
    ) -> Result<()> {
        self.versions
            .lock()
            .unwrap()
            .insert(key.to_string(), version);
        self.marked
            .lock()
            .unwrap()
            .push((library_id.clone(), key.to_string(), version));
        Ok(())
    }
}

/// WebDAV coordinator recording finished uploads
#[derive(Default)]
pub struct FakeWebDav {
    finished: Mutex<Vec<(String, bool)>>,
}

impl FakeWebDav {
    pub fn finished(&self) -> Vec<(String, bool)> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebDavCoordinator for FakeWebDav {
    async fn finish_upload(
        &self,
        key: &str,
        result: std::result::Result<WebDavUploadResult, Error>,
        file: Option<&Path>,
    ) -> Result<()> {
        self.finished
            .lock()
            .unwrap()
            .push((key.to_string(), result.is_ok()));
        if let Some(file) = file {
            tokio::fs::remove_file(file).await?;
        }
        Ok(())
    }
}
