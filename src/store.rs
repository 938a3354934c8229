//! Local persistent item store seam
//!
//! Finalization reads item state and marks attachments uploaded through
//! [`SerialStore`]. Every access is queued onto one [`SerialQueue`], which the
//! embedding application can share with its other store users so writes from
//! different subsystems never race.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::types::LibraryId;
use crate::{Error, Result};

/// Local item store used by finalization
#[async_trait]
pub trait AttachmentStore: Send + Sync + 'static {
    /// Current local version of an item, `None` if the item is unknown
    async fn item_version(&self, library_id: &LibraryId, key: &str) -> Result<Option<i64>>;

    /// Record that the attachment file is uploaded and the item is at `version`
    async fn mark_attachment_uploaded(
        &self,
        library_id: &LibraryId,
        key: &str,
        version: i64,
    ) -> Result<()>;
}

/// Serial execution context: jobs run one at a time, in submission order
#[derive(Clone)]
pub struct SerialQueue {
    jobs: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl SerialQueue {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!("Serial queue closed");
        });

        Self { jobs }
    }

    /// Run `job` after every previously submitted job has finished
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.jobs
            .send(Box::pin(async move {
                let _ = reply_tx.send(job.await);
            }))
            .map_err(|_| Error::ShuttingDown)?;

        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// [`AttachmentStore`] access funnelled through a [`SerialQueue`]
#[derive(Clone)]
pub struct SerialStore {
    store: Arc<dyn AttachmentStore>,
    queue: SerialQueue,
}

impl SerialStore {
    /// Wrap `store`, running every access on `queue`
    pub fn new(store: Arc<dyn AttachmentStore>, queue: SerialQueue) -> Self {
        Self { store, queue }
    }

    /// Read the local version of an item
    pub async fn item_version(&self, library_id: &LibraryId, key: &str) -> Result<Option<i64>> {
        let store = self.store.clone();
        let library_id = library_id.clone();
        let key = key.to_string();

        self.queue
            .run(async move { store.item_version(&library_id, &key).await })
            .await?
    }

    /// Mark an attachment uploaded at `version`
    pub async fn mark_attachment_uploaded(
        &self,
        library_id: &LibraryId,
        key: &str,
        version: i64,
    ) -> Result<()> {
        let store = self.store.clone();
        let library_id = library_id.clone();
        let key = key.to_string();

        self.queue
            .run(async move {
                store
                    .mark_attachment_uploaded(&library_id, &key, version)
                    .await
            })
            .await?
    }
}
