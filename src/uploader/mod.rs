//! Background upload subsystem split into focused submodules.
//!
//! [`BackgroundUploads`] wires the pieces together:
//! - [`request`] - Request Builder (multipart copy or WebDAV `PUT`)
//! - [`session`] - Session Factory (fixed background session policy)
//! - [`coordinator`] - Transfer Coordinator (start and persist a transfer)
//! - [`timeout`] - Size-tiered timeouts
//! - [`observer`] - Session Observer (reconciliation, event correlation, handoff)
//! - [`processor`] - Finalization Processor (backend-specific completion)
//! - [`lifecycle`] - Shutdown coordination

pub mod coordinator;
mod lifecycle;
pub mod observer;
pub mod processor;
pub mod request;
pub mod session;
pub mod timeout;

pub use coordinator::{StartedUpload, TransferCoordinator};
pub use observer::{ReconcileReport, WakeupHandler};
pub use processor::FinalizationProcessor;
pub use request::{PreparedRequest, RequestBuilder, UploadParams};
pub use session::SessionFactory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::{ApiClient, HttpApiClient};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::files::{FileStorage, LocalFileStorage};
use crate::store::SerialStore;
use crate::transfer::{HttpTransferBackend, SessionEvent, TransferBackend};
use crate::types::{Event, SessionId, TaskId, Upload};
use crate::webdav::{HttpWebDavCoordinator, WebDavCoordinator};
use observer::{ObserverHandle, ObserverParts, ObserverSettings};

/// External services the uploader depends on
#[derive(Clone)]
pub struct Collaborators {
    /// Background transfer service
    pub backend: Arc<dyn TransferBackend>,
    /// Vendor API client used by finalization
    pub api: Arc<dyn ApiClient>,
    /// Local item store, accessed serially
    pub store: SerialStore,
    /// File system
    pub files: Arc<dyn FileStorage>,
    /// WebDAV coordinator used by finalization
    pub webdav: Arc<dyn WebDavCoordinator>,
}

impl Collaborators {
    /// Default wiring: in-process reqwest transfers, the HTTP API client and
    /// the local file system. `webdav_credentials` are used for metadata
    /// uploads.
    pub fn http(
        config: &Config,
        store: SerialStore,
        webdav_credentials: Option<(String, String)>,
    ) -> Result<Self> {
        let files: Arc<dyn FileStorage> = Arc::new(LocalFileStorage);
        let webdav_client = reqwest::Client::builder()
            .connect_timeout(config.transfer.request_timeout)
            .build()?;

        Ok(Self {
            backend: Arc::new(HttpTransferBackend::new()),
            api: Arc::new(HttpApiClient::new(config.api.clone())?),
            store,
            files: files.clone(),
            webdav: Arc::new(HttpWebDavCoordinator::new(
                webdav_client,
                webdav_credentials,
                files,
            )),
        })
    }
}

/// Background uploader instance (cloneable - all state is shared)
#[derive(Clone)]
pub struct BackgroundUploads {
    /// Upload context shared with the other process
    /// Public for integration tests to inspect persisted state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Builds requests outside the observer loop
    pub(crate) coordinator: TransferCoordinator,
    /// Handle to the single writer of session state
    pub(crate) observer: ObserverHandle,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl BackgroundUploads {
    /// Create a new uploader
    ///
    /// This validates the configuration, creates the temp directory, opens the
    /// shared database (running migrations) and spawns the session observer.
    /// Call [`update_sessions`](Self::update_sessions) afterwards to adopt
    /// sessions left over from earlier runs.
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        collaborators
            .files
            .create_dir_all(config.temp_dir())
            .await
            .map_err(|e| match e {
                Error::Io(io) => Error::Io(std::io::Error::new(
                    io.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.temp_dir().display(),
                        io
                    ),
                )),
                other => other,
            })?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let base_url = url::Url::parse(&config.api.base_url)?;

        let sessions = SessionFactory::new(&config.transfer);
        let coordinator = TransferCoordinator::new(
            RequestBuilder::new(
                config.temp_dir().clone(),
                config.api.api_version,
                collaborators.files.clone(),
            ),
            sessions.clone(),
            collaborators.backend.clone(),
            db.clone(),
            collaborators.files.clone(),
            config.transfer.role,
        );
        let processor = FinalizationProcessor::new(
            collaborators.api,
            collaborators.store,
            collaborators.files,
            collaborators.webdav,
            base_url,
        );

        let observer = observer::spawn(
            ObserverParts {
                db: db.clone(),
                backend: collaborators.backend,
                coordinator: coordinator.clone(),
                processor,
                sessions,
                event_tx: event_tx.clone(),
            },
            ObserverSettings {
                role: config.transfer.role,
                poll_interval: config.transfer.extension_poll_interval,
                additional_success_codes: config.transfer.additional_success_codes.clone(),
            },
        );

        tracing::info!(role = ?config.transfer.role, "Background uploads initialized");

        Ok(Self {
            db,
            event_tx,
            config: Arc::new(config),
            coordinator,
            observer,
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Start uploading `upload`
    ///
    /// Builds the request, creates a new session and records the upload
    /// durably before the transfer begins. On failure nothing is persisted
    /// and the upload's completion handler (if any) is told about the error.
    pub async fn start(&self, upload: Upload, params: UploadParams) -> Result<StartedUpload> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let prepared = match self
            .coordinator
            .prepare(&upload, &params, self.config.api.schema_version)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(key = %upload.key, error = %e, "Failed to create upload request");
                upload.notify(Err(&e));
                return Err(e);
            }
        };

        match self.observer.register(upload.clone(), prepared).await {
            Ok(started) => Ok(started),
            Err(e) => {
                upload.notify(Err(&e));
                Err(e)
            }
        }
    }

    /// Reconcile sessions with the persisted context
    ///
    /// Drops timed-out uploads, invalidates sessions without live uploads and
    /// starts observing the rest. Safe to call repeatedly; a second call with
    /// unchanged state reports nothing.
    pub async fn update_sessions(&self) -> Result<ReconcileReport> {
        self.observer.update_sessions().await
    }

    /// The platform relaunched this process to deliver events for
    /// `session_id`; `wakeup` runs once the session's work is done
    pub async fn handle_background_events(
        &self,
        session_id: impl Into<SessionId>,
        wakeup: impl FnOnce() + Send + Sync + 'static,
    ) -> Result<()> {
        self.observer
            .handle_background_events(session_id.into(), Box::new(wakeup))
            .await
    }

    /// Background time for `session_id` is about to run out: abort its
    /// finalization and hand its records back
    pub fn background_time_expiring(&self, session_id: impl Into<SessionId>) -> Result<()> {
        self.observer.deliver(SessionEvent::TimeExpiring {
            session_id: session_id.into(),
        })
    }

    /// Invalidate every known session and clear all persisted upload state
    pub async fn cancel_all_uploads(&self) -> Result<()> {
        self.observer.cancel_all().await
    }

    /// Observe a session this extension process started, so it is finalized
    /// here if it drains before the extension exits
    pub async fn start_observing_in_extension(&self, session_id: impl Into<SessionId>) -> Result<()> {
        self.observer.observe_in_extension(session_id.into()).await
    }

    /// Persisted in-flight uploads
    pub async fn uploads(&self) -> Result<BTreeMap<TaskId, Upload>> {
        self.db.uploads().await
    }

    /// Subscribe to upload events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than 1000 events receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}
