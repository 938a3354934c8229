//! Shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;

use super::BackgroundUploads;

impl BackgroundUploads {
    /// Gracefully shut down the uploader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new uploads
    /// 2. Waits (up to 30 seconds) for running finalization batches
    /// 3. In the extension role, releases still-observed sessions so the main
    ///    process adopts them on its next recheck
    /// 4. Detaches from every observed session; their transfers keep running
    ///    and later events wait for the next attach
    ///
    /// Transfers are never cancelled here. Use
    /// [`cancel_all_uploads`](Self::cancel_all_uploads) for that.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new uploads");

        if let Err(e) = self.observer.shutdown().await {
            // The observer already stopped, nothing left to hand over
            tracing::debug!(error = %e, "Session observer was not running");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
