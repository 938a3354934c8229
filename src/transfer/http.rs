//! In-process [`TransferBackend`] streaming files with reqwest

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::{EventSink, SessionConfig, SessionEvent, TaskResult, TransferBackend, TransferRequest};
use crate::types::{SessionId, TaskId};
use crate::{Error, Result};

/// Transfer backend running each task as a tokio task in this process
///
/// Sessions live as long as this value. Events finishing while no sink is
/// attached are kept and handed to the next [`TransferBackend::attach`] for
/// the same identifier. A session drains once none of its created tasks is
/// still suspended or running.
#[derive(Clone)]
pub struct HttpTransferBackend {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    next_task_id: Arc<AtomicI64>,
}

struct Session {
    client: reqwest::Client,
    sink: Option<EventSink>,
    pending: Vec<SessionEvent>,
    tasks: HashMap<TaskId, TaskState>,
    cancel: CancellationToken,
}

enum TaskState {
    Suspended {
        request: TransferRequest,
        file: PathBuf,
        expected_bytes: u64,
    },
    Running,
    Finished,
}

impl Session {
    fn deliver(&mut self, event: SessionEvent) {
        match self.sink.as_ref().map(|sink| sink.emit(event.clone())) {
            Some(Ok(())) => {}
            Some(Err(_)) | None => {
                self.sink = None;
                self.pending.push(event);
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.tasks
            .values()
            .all(|task| matches!(task, TaskState::Finished))
    }
}

impl HttpTransferBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        // Random base so ids from separate backends are unlikely to collide
        let base = rand::thread_rng().gen_range(1..1_i64 << 40);
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_task_id: Arc::new(AtomicI64::new(base)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        // A poisoned map still holds consistent entries; keep serving it
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish_task(&self, session_id: &str, task_id: TaskId, result: TaskResult) {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            // Cancelled while the request was in flight
            return;
        };

        session.tasks.insert(task_id, TaskState::Finished);
        session.deliver(SessionEvent::TaskCompleted {
            session_id: session_id.to_string(),
            task_id,
            result,
        });

        if session.is_drained() {
            session.deliver(SessionEvent::SessionDrained {
                session_id: session_id.to_string(),
            });
        }
    }
}

impl Default for HttpTransferBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn send_file(
    client: reqwest::Client,
    request: TransferRequest,
    file: PathBuf,
    expected_bytes: u64,
) -> TaskResult {
    let file = match tokio::fs::File::open(&file).await {
        Ok(file) => file,
        Err(e) => return TaskResult::error(format!("cannot open {}: {}", file.display(), e)),
    };

    let mut builder = client
        .request(request.method, request.url)
        .header(reqwest::header::CONTENT_LENGTH, expected_bytes)
        .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    match builder.send().await {
        Ok(response) => TaskResult::status(response.status().as_u16()),
        Err(e) => TaskResult::error(e.to_string()),
    }
}

#[async_trait]
impl TransferBackend for HttpTransferBackend {
    async fn attach(&self, config: SessionConfig, sink: EventSink) -> Result<()> {
        let mut sessions = self.lock();

        if let Some(session) = sessions.get_mut(&config.identifier) {
            let pending = std::mem::take(&mut session.pending);
            session.sink = Some(sink);
            for event in pending {
                session.deliver(event);
            }
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .timeout(config.resource_timeout)
            .build()?;

        tracing::debug!(
            session_id = %config.identifier,
            container = %config.shared_container_id,
            "Created transfer session"
        );

        sessions.insert(
            config.identifier,
            Session {
                client,
                sink: Some(sink),
                pending: Vec::new(),
                tasks: HashMap::new(),
                cancel: CancellationToken::new(),
            },
        );

        Ok(())
    }

    async fn create_task(
        &self,
        session_id: &str,
        request: TransferRequest,
        file: &Path,
        expected_bytes: u64,
    ) -> Result<TaskId> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::Other(format!("unknown transfer session {}", session_id)))?;

        let task_id = TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst));
        session.tasks.insert(
            task_id,
            TaskState::Suspended {
                request,
                file: file.to_path_buf(),
                expected_bytes,
            },
        );

        Ok(task_id)
    }

    async fn resume_task(&self, session_id: &str, task_id: TaskId) -> Result<()> {
        let (client, cancel, request, file, expected_bytes) = {
            let mut sessions = self.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::Other(format!("unknown transfer session {}", session_id)))?;

            match session.tasks.insert(task_id, TaskState::Running) {
                Some(TaskState::Suspended {
                    request,
                    file,
                    expected_bytes,
                }) => (
                    session.client.clone(),
                    session.cancel.clone(),
                    request,
                    file,
                    expected_bytes,
                ),
                Some(previous) => {
                    // Already running or finished; resuming again is a no-op
                    session.tasks.insert(task_id, previous);
                    return Ok(());
                }
                None => {
                    session.tasks.remove(&task_id);
                    return Err(Error::Other(format!(
                        "unknown task {} in session {}",
                        task_id, session_id
                    )));
                }
            }
        };

        let backend = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = send_file(client, request, file, expected_bytes) => result,
            };
            backend.finish_task(&session_id, task_id, result);
        });

        Ok(())
    }

    async fn cancel_session(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.lock().remove(session_id) {
            session.cancel.cancel();
            tracing::debug!(session_id, tasks = session.tasks.len(), "Cancelled transfer session");
        }
        Ok(())
    }

    async fn detach(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.lock().get_mut(session_id) {
            session.sink = None;
        }
        Ok(())
    }
}
