//! # attachment-transfer
//!
//! Background attachment uploads that survive app suspension, process death
//! and handoff between a main application and a short-lived extension
//! process.
//!
//! ## Design
//!
//! - **Durable first** - an upload is recorded in the shared SQLite context
//!   before its transfer starts, so a crash right after leaves a trace
//! - **Single writer** - one observer task per process owns all session
//!   state; transfer events, reconciliation and handoff timers are messages
//! - **Pluggable seams** - transfer backend, API client, item store, file
//!   system and WebDAV coordinator are traits with default implementations
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use attachment_transfer::{
//!     BackgroundUploads, Collaborators, Config, SerialQueue, SerialStore, UploadParams,
//! };
//! # use attachment_transfer::AttachmentStore;
//! # use std::sync::Arc;
//! # async fn example(store: Arc<dyn AttachmentStore>, upload: attachment_transfer::Upload)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let store = SerialStore::new(store, SerialQueue::new());
//! let uploads = BackgroundUploads::new(config.clone(), Collaborators::http(&config, store, None)?).await?;
//!
//! // Adopt sessions left over from earlier runs
//! uploads.update_sessions().await?;
//!
//! let mut events = uploads.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! uploads
//!     .start(
//!         upload,
//!         UploadParams {
//!             filename: "paper.pdf".into(),
//!             mime_type: "application/pdf".into(),
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Generic API client and vendor requests
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// File system seam
pub mod files;
/// Retry logic with exponential backoff
pub mod retry;
/// Local item store seam
pub mod store;
/// Background transfer seam
pub mod transfer;
/// Core types and events
pub mod types;
/// Background upload subsystem
pub mod uploader;
/// WebDAV coordinator seam
pub mod webdav;

// Re-export commonly used types
pub use api::{ApiClient, ApiRequest, ApiResponse, HttpApiClient};
pub use config::{ApiConfig, Config, PersistenceConfig, RetryConfig, TransferConfig};
pub use db::Database;
pub use error::{BuildError, DatabaseError, Error, FinalizeError, Result};
pub use files::{FileStorage, LocalFileStorage};
pub use store::{AttachmentStore, SerialQueue, SerialStore};
pub use transfer::{
    EventSink, HttpTransferBackend, SessionConfig, SessionEvent, TaskResult, TransferBackend,
    TransferRequest,
};
pub use types::{
    CompletionHandler, CustomLibraryType, Event, LibraryId, ProcessRole, SessionId, TaskId,
    Upload, UploadKind,
};
pub use uploader::{
    BackgroundUploads, Collaborators, ReconcileReport, StartedUpload, UploadParams,
};
pub use webdav::{HttpWebDavCoordinator, WebDavCoordinator, WebDavUploadResult};

/// Helper function to run the uploader with graceful signal handling.
///
/// Waits for a termination signal and then calls the uploader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(uploads: BackgroundUploads) -> Result<()> {
    wait_for_signal().await;
    uploads.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
