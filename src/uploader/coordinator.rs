//! Transfer Coordinator
//!
//! Starting an upload happens in two halves. [`TransferCoordinator::prepare`]
//! builds the request and the streamable file and may run anywhere.
//! [`TransferCoordinator::register`] creates the session, persists the upload
//! and starts the task; it runs on the observer loop so it never interleaves
//! with reconciliation.

use std::sync::Arc;

use super::request::{PreparedRequest, RequestBuilder, UploadParams};
use super::session::SessionFactory;
use crate::db::Database;
use crate::error::Result;
use crate::files::FileStorage;
use crate::transfer::{EventSink, TransferBackend};
use crate::types::{ProcessRole, TaskId, Upload, UploadKind};

/// Outcome of registering a transfer
#[derive(Clone, Debug)]
pub struct StartedUpload {
    /// Task carrying the transfer
    pub task_id: TaskId,
    /// The persisted upload, pointing at the streamed file
    pub upload: Upload,
}

/// Starts transfers and records them durably
#[derive(Clone)]
pub struct TransferCoordinator {
    builder: RequestBuilder,
    sessions: SessionFactory,
    backend: Arc<dyn TransferBackend>,
    db: Arc<Database>,
    files: Arc<dyn FileStorage>,
    role: ProcessRole,
}

impl TransferCoordinator {
    /// Create a coordinator
    pub fn new(
        builder: RequestBuilder,
        sessions: SessionFactory,
        backend: Arc<dyn TransferBackend>,
        db: Arc<Database>,
        files: Arc<dyn FileStorage>,
        role: ProcessRole,
    ) -> Self {
        Self {
            builder,
            sessions,
            backend,
            db,
            files,
            role,
        }
    }

    /// Build the outbound request. Nothing is persisted, so a failure here
    /// can be retried from scratch.
    pub async fn prepare(
        &self,
        upload: &Upload,
        params: &UploadParams,
        schema_version: u32,
    ) -> Result<PreparedRequest> {
        self.builder.build(upload, params, schema_version).await
    }

    /// Create a session for `prepared`, persist the upload and start the task.
    ///
    /// `sink` receives the session's events. In the extension role the
    /// session is detached right away, so its events wait until someone
    /// starts observing it. The upload record and both session id sets are
    /// written in one transaction before the task is resumed.
    pub async fn register(
        &self,
        upload: &Upload,
        prepared: PreparedRequest,
        sink: EventSink,
    ) -> Result<StartedUpload> {
        let session_id = SessionFactory::new_session_id();
        let file = prepared.file.clone();

        match self.register_in_session(&session_id, upload, prepared, sink).await {
            Ok(started) => Ok(started),
            Err(e) => {
                tracing::error!(key = %upload.key, session_id, error = %e, "Failed to start upload");
                if let Err(cancel_error) = self.backend.cancel_session(&session_id).await {
                    tracing::warn!(session_id, error = %cancel_error, "Failed to cancel session of failed start");
                }
                // Only the multipart copy is ours; a WebDAV zip stays with the caller
                if matches!(upload.kind, UploadKind::Vendor { .. })
                    && let Err(remove_error) = self.files.remove(&file).await
                {
                    tracing::warn!(path = %file.display(), error = %remove_error, "Failed to remove multipart copy");
                }
                Err(e)
            }
        }
    }

    async fn register_in_session(
        &self,
        session_id: &str,
        upload: &Upload,
        prepared: PreparedRequest,
        sink: EventSink,
    ) -> Result<StartedUpload> {
        self.backend
            .attach(self.sessions.create(session_id), sink)
            .await?;
        if self.role == ProcessRole::Extension {
            self.backend.detach(session_id).await?;
        }

        let started = upload.started(prepared.file.clone(), prepared.size, session_id);
        let task_id = self
            .backend
            .create_task(session_id, prepared.request, &prepared.file, prepared.size)
            .await?;

        let record = started.clone();
        self.db
            .update_context(move |state| {
                state.session_ids.insert(record.session_id.clone());
                state.extension_session_ids.insert(record.session_id.clone());
                state.uploads.insert(task_id, record);
            })
            .await?;

        if let Err(e) = self.backend.resume_task(session_id, task_id).await {
            self.db.remove_uploads(&[task_id]).await?;
            self.db.remove_sessions(&[session_id.to_string()]).await?;
            return Err(e);
        }

        tracing::info!(
            key = %started.key,
            task_id = %task_id,
            session_id,
            size = started.size,
            "Upload started"
        );

        Ok(StartedUpload {
            task_id,
            upload: started,
        })
    }
}
