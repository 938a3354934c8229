//! Background transfer seam
//!
//! A [`TransferBackend`] runs uploads outside the caller's control flow and
//! reports back through an [`EventSink`] as typed [`SessionEvent`]s. Sessions
//! are addressed by identifier only, so a process can attach to (and receive
//! the pending events of) a session another process created, or cancel one it
//! never attached to.
//!
//! [`HttpTransferBackend`] is the in-process implementation; platform
//! background services plug in through the same trait.

use async_trait::async_trait;
use reqwest::Method;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::Result;
use crate::types::{SessionId, TaskId};

mod http;

pub use http::HttpTransferBackend;

/// Policy of a background session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Globally unique session identifier
    pub identifier: SessionId,
    /// Container shared by the cooperating processes
    pub shared_container_id: String,
    /// Timeout of a single request
    pub request_timeout: Duration,
    /// Upper bound for a whole transfer
    pub resource_timeout: Duration,
    /// Relaunch the owning process when the session has events
    pub sends_launch_events: bool,
    /// Allow the system to defer transfers
    pub discretionary: bool,
}

/// Outbound transfer request; the body is streamed from the task's file
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Request headers
    pub headers: Vec<(String, String)>,
}

impl TransferRequest {
    /// First value of a header, compared case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outcome of one transfer task as reported by the backend
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskResult {
    /// HTTP status of the response, if one arrived
    pub status: Option<u16>,
    /// Transport error, if the transfer failed before a response
    pub error: Option<String>,
}

impl TaskResult {
    /// A response with `status`
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    /// A transport failure
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: None,
            error: Some(message.into()),
        }
    }
}

/// Event delivered by a transfer backend
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// One task finished, successfully or not
    TaskCompleted {
        /// Session carrying the task
        session_id: SessionId,
        /// Finished task
        task_id: TaskId,
        /// Transfer outcome
        result: TaskResult,
    },
    /// Every event of the session has been delivered
    SessionDrained {
        /// Drained session
        session_id: SessionId,
    },
    /// Background time for finishing the session's work is about to run out
    TimeExpiring {
        /// Affected session
        session_id: SessionId,
    },
}

/// Receiving end handed to a backend when attaching a session
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Wrap a channel sender
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event; gives it back if the receiver is gone
    pub fn emit(&self, event: SessionEvent) -> std::result::Result<(), SessionEvent> {
        self.tx.send(event).map_err(|e| e.0)
    }

    /// Whether the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Out-of-process (or at least out-of-caller) transfer service
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Create the session, or attach to an existing one with this identifier.
    ///
    /// Events that completed while no sink was attached are delivered to
    /// `sink` right away.
    async fn attach(&self, config: SessionConfig, sink: EventSink) -> Result<()>;

    /// Create a suspended task uploading `file` in `session_id`
    async fn create_task(
        &self,
        session_id: &str,
        request: TransferRequest,
        file: &Path,
        expected_bytes: u64,
    ) -> Result<TaskId>;

    /// Start a created task
    async fn resume_task(&self, session_id: &str, task_id: TaskId) -> Result<()>;

    /// Invalidate a session and cancel its tasks, attached or not
    async fn cancel_session(&self, session_id: &str) -> Result<()>;

    /// Stop delivering events for a session without cancelling it; later
    /// events are held until someone attaches again
    async fn detach(&self, session_id: &str) -> Result<()>;
}
