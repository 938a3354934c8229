//! Session Observer
//!
//! A single task owns all in-memory session state and is the only writer of
//! the upload context in this process. Commands from the public API, typed
//! [`SessionEvent`]s from the transfer backend and its own timers all arrive
//! as messages and are handled one at a time.
//!
//! Finalization is the only work that leaves the loop. Each drained session
//! gets one spawned batch that runs the processor for its buffered results
//! and reports back to the loop when done; records are only
//! removed once the loop receives that message (or the batch is aborted).

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::coordinator::{StartedUpload, TransferCoordinator};
use super::processor::FinalizationProcessor;
use super::request::PreparedRequest;
use super::session::SessionFactory;
use super::timeout;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::transfer::{EventSink, SessionEvent, TaskResult, TransferBackend};
use crate::types::{CompletionHandler, Event, ProcessRole, SessionId, TaskId, Upload};

/// How long shutdown waits for running finalization batches
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Callback telling the platform that background work for a session is done
pub type WakeupHandler = Box<dyn FnOnce() + Send + Sync + 'static>;

/// What one reconciliation pass changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Uploads dropped because they exceeded their size-tier timeout
    pub timed_out: Vec<TaskId>,
    /// Sessions invalidated because no live upload references them
    pub invalidated: Vec<SessionId>,
    /// Sessions this process started observing
    pub observed: Vec<SessionId>,
}

impl ReconcileReport {
    /// Whether the pass changed nothing
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.invalidated.is_empty() && self.observed.is_empty()
    }
}

pub(crate) enum Command {
    UpdateSessions {
        reply: oneshot::Sender<Result<ReconcileReport>>,
    },
    Register {
        upload: Upload,
        prepared: PreparedRequest,
        reply: oneshot::Sender<Result<StartedUpload>>,
    },
    HandleBackgroundEvents {
        session_id: SessionId,
        wakeup: WakeupHandler,
        reply: oneshot::Sender<Result<()>>,
    },
    ObserveInExtension {
        session_id: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelAll {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Messages the loop sends itself
enum Internal {
    Recheck {
        captured: BTreeSet<SessionId>,
    },
    FinalizationFinished {
        session_id: SessionId,
        outcomes: Vec<Result<()>>,
    },
}

/// Cloneable handle to the observer task
#[derive(Clone)]
pub(crate) struct ObserverHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: EventSink,
}

impl ObserverHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub(crate) async fn update_sessions(&self) -> Result<ReconcileReport> {
        self.request(|reply| Command::UpdateSessions { reply })
            .await?
    }

    pub(crate) async fn register(
        &self,
        upload: Upload,
        prepared: PreparedRequest,
    ) -> Result<StartedUpload> {
        self.request(|reply| Command::Register {
            upload,
            prepared,
            reply,
        })
        .await?
    }

    pub(crate) async fn handle_background_events(
        &self,
        session_id: SessionId,
        wakeup: WakeupHandler,
    ) -> Result<()> {
        self.request(|reply| Command::HandleBackgroundEvents {
            session_id,
            wakeup,
            reply,
        })
        .await?
    }

    pub(crate) async fn observe_in_extension(&self, session_id: SessionId) -> Result<()> {
        self.request(|reply| Command::ObserveInExtension { session_id, reply })
            .await?
    }

    pub(crate) async fn cancel_all(&self) -> Result<()> {
        self.request(|reply| Command::CancelAll { reply }).await?
    }

    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Inject a platform event, e.g. background time running out
    pub(crate) fn deliver(&self, event: SessionEvent) -> Result<()> {
        self.events.emit(event).map_err(|_| Error::ShuttingDown)
    }
}

/// Settings the loop needs besides its collaborators
#[derive(Clone, Debug)]
pub(crate) struct ObserverSettings {
    pub(crate) role: ProcessRole,
    pub(crate) poll_interval: Duration,
    pub(crate) additional_success_codes: Vec<u16>,
}

struct FinishedTask {
    task_id: TaskId,
    upload: Upload,
    /// Transfer failure, `None` if the transfer succeeded
    failure: Option<Error>,
}

struct Finalization {
    tasks: Vec<FinishedTask>,
    cancel: CancellationToken,
}

struct Observer {
    settings: ObserverSettings,
    db: Arc<Database>,
    backend: Arc<dyn TransferBackend>,
    coordinator: TransferCoordinator,
    processor: FinalizationProcessor,
    sessions: SessionFactory,
    event_tx: broadcast::Sender<Event>,
    sink: EventSink,
    internal: mpsc::UnboundedSender<Internal>,

    observed: HashSet<SessionId>,
    finished: HashMap<SessionId, Vec<FinishedTask>>,
    finalizing: HashMap<SessionId, Finalization>,
    wakeups: HashMap<SessionId, WakeupHandler>,
    completions: HashMap<TaskId, CompletionHandler>,
    recheck_scheduled: bool,
    shutdown: Option<(Instant, oneshot::Sender<()>)>,
}

/// Collaborators of the observer loop
pub(crate) struct ObserverParts {
    pub(crate) db: Arc<Database>,
    pub(crate) backend: Arc<dyn TransferBackend>,
    pub(crate) coordinator: TransferCoordinator,
    pub(crate) processor: FinalizationProcessor,
    pub(crate) sessions: SessionFactory,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// Spawn the observer loop. Must be called inside a tokio runtime.
pub(crate) fn spawn(parts: ObserverParts, settings: ObserverSettings) -> ObserverHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let sink = EventSink::new(events_tx);

    let observer = Observer {
        settings,
        db: parts.db,
        backend: parts.backend,
        coordinator: parts.coordinator,
        processor: parts.processor,
        sessions: parts.sessions,
        event_tx: parts.event_tx,
        sink: sink.clone(),
        internal: internal_tx,
        observed: HashSet::new(),
        finished: HashMap::new(),
        finalizing: HashMap::new(),
        wakeups: HashMap::new(),
        completions: HashMap::new(),
        recheck_scheduled: false,
        shutdown: None,
    };

    tokio::spawn(observer.run(commands_rx, events_rx, internal_rx));

    ObserverHandle {
        commands: commands_tx,
        events: sink,
    }
}

fn classify(result: &TaskResult, additional_success_codes: &[u16]) -> Option<Error> {
    if let Some(error) = &result.error {
        return Some(Error::Transport(error.clone()));
    }
    match result.status {
        Some(code) if !(200..300).contains(&code) && !additional_success_codes.contains(&code) => {
            Some(Error::UnacceptableStatus { code })
        }
        _ => None,
    }
}

impl Observer {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        tracing::debug!(role = ?self.settings.role, "Session observer started");

        loop {
            let deadline = self.shutdown.as_ref().map(|(deadline, _)| *deadline);

            tokio::select! {
                command = commands.recv(), if self.shutdown.is_none() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Every handle is gone; nobody can wait for a reply
                        let (reply, _) = oneshot::channel();
                        self.shutdown = Some((Instant::now() + SHUTDOWN_GRACE, reply));
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(message) = internal.recv() => self.handle_internal(message).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::warn!(
                        sessions = self.finalizing.len(),
                        "Timed out waiting for finalization during shutdown"
                    );
                    for finalization in self.finalizing.values() {
                        finalization.cancel.cancel();
                    }
                    self.finalizing.clear();
                }
            }

            if self.shutdown.is_some() && self.finalizing.is_empty() {
                self.finish_shutdown().await;
                break;
            }
        }

        tracing::debug!("Session observer stopped");
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::UpdateSessions { reply } => {
                let _ = reply.send(self.update_sessions().await);
            }
            Command::Register {
                upload,
                prepared,
                reply,
            } => {
                let _ = reply.send(self.register(upload, prepared).await);
            }
            Command::HandleBackgroundEvents {
                session_id,
                wakeup,
                reply,
            } => {
                tracing::info!(session_id, "Handling events for background session");
                self.wakeups.insert(session_id.clone(), wakeup);
                let _ = reply.send(self.observe(&session_id).await);
            }
            Command::ObserveInExtension { session_id, reply } => {
                let _ = reply.send(self.observe(&session_id).await);
            }
            Command::CancelAll { reply } => {
                let _ = reply.send(self.cancel_all().await);
            }
            Command::Shutdown { reply } => {
                tracing::info!(
                    finalizing = self.finalizing.len(),
                    "Session observer shutting down"
                );
                self.shutdown = Some((Instant::now() + SHUTDOWN_GRACE, reply));
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TaskCompleted {
                session_id,
                task_id,
                result,
            } => self.task_completed(session_id, task_id, result).await,
            SessionEvent::SessionDrained { session_id } => self.session_drained(session_id).await,
            SessionEvent::TimeExpiring { session_id } => self.time_expiring(session_id).await,
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Recheck { captured } => self.recheck(captured).await,
            Internal::FinalizationFinished {
                session_id,
                outcomes,
            } => self.finalization_finished(session_id, outcomes).await,
        }
    }

    /// Attach to a session with this loop as the event sink
    async fn observe(&mut self, session_id: &str) -> Result<()> {
        self.backend
            .attach(self.sessions.create(session_id), self.sink.clone())
            .await?;
        if self.observed.insert(session_id.to_string()) {
            tracing::info!(session_id, "Start observing session");
            self.emit(Event::SessionObserved {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn register(&mut self, upload: Upload, prepared: PreparedRequest) -> Result<StartedUpload> {
        let started = self
            .coordinator
            .register(&upload, prepared, self.sink.clone())
            .await?;

        if self.settings.role == ProcessRole::Main {
            self.observed.insert(started.upload.session_id.clone());
        }
        if let Some(completion) = &upload.completion {
            self.completions.insert(started.task_id, completion.clone());
        }

        self.emit(Event::UploadStarted {
            task_id: started.task_id,
            session_id: started.upload.session_id.clone(),
            key: started.upload.key.clone(),
        });

        Ok(started)
    }

    /// Reconcile in-memory sessions with the persisted context
    async fn update_sessions(&mut self) -> Result<ReconcileReport> {
        let now = Utc::now();

        // Records with a buffered result or a running batch belong to their
        // drain; the timeout path must not finalize them a second time
        let owned: HashSet<TaskId> = self
            .finished
            .values()
            .flatten()
            .chain(self.finalizing.values().flat_map(|f| f.tasks.iter()))
            .map(|task| task.task_id)
            .collect();
        let finalizing: HashSet<SessionId> = self.finalizing.keys().cloned().collect();

        let (timed_out, remaining, remaining_extension, stale) = self
            .db
            .update_context(|state| {
                let timed_out: Vec<(TaskId, Upload)> = state
                    .uploads
                    .iter()
                    .filter(|(task_id, upload)| {
                        !owned.contains(*task_id)
                            && timeout::is_timed_out(upload.size, timeout::age(upload.created_at, now))
                    })
                    .map(|(task_id, upload)| (*task_id, upload.clone()))
                    .collect();
                for (task_id, _) in &timed_out {
                    state.uploads.remove(task_id);
                }

                let remaining: BTreeSet<SessionId> = state
                    .uploads
                    .values()
                    .map(|upload| upload.session_id.clone())
                    .filter(|session_id| !session_id.is_empty())
                    .collect();
                let remaining_extension: BTreeSet<SessionId> = remaining
                    .intersection(&state.extension_session_ids)
                    .cloned()
                    .collect();
                let stale: Vec<SessionId> = state
                    .session_ids
                    .difference(&remaining)
                    .filter(|session_id| !finalizing.contains(*session_id))
                    .cloned()
                    .collect();

                state.session_ids.retain(|id| remaining.contains(id) || finalizing.contains(id));
                state
                    .extension_session_ids
                    .retain(|id| remaining_extension.contains(id) || finalizing.contains(id));

                (timed_out, remaining, remaining_extension, stale)
            })
            .await?;

        tracing::info!(
            active = remaining.len(),
            extension = remaining_extension.len(),
            timed_out = timed_out.len(),
            "Reconciling upload sessions"
        );

        let mut report = ReconcileReport {
            timed_out: timed_out.iter().map(|(task_id, _)| *task_id).collect(),
            ..ReconcileReport::default()
        };

        for session_id in stale {
            self.invalidate(&session_id).await;
            self.observed.remove(&session_id);
            self.finished.remove(&session_id);
            report.invalidated.push(session_id);
        }

        if self.settings.role == ProcessRole::Main {
            for session_id in &remaining {
                if self.observed.contains(session_id) || self.finalizing.contains_key(session_id) {
                    continue;
                }
                match self.observe(session_id).await {
                    Ok(()) => report.observed.push(session_id.clone()),
                    Err(e) => tracing::error!(session_id, error = %e, "Failed to observe session"),
                }
            }

            if !remaining_extension.is_empty() {
                self.schedule_recheck(remaining_extension);
            }
        }

        self.release_timed_out(timed_out);

        Ok(report)
    }

    async fn invalidate(&self, session_id: &str) {
        tracing::info!(session_id, "Invalidating session");
        if let Err(e) = self.backend.cancel_session(session_id).await {
            tracing::error!(session_id, error = %e, "Failed to invalidate session");
        }
        self.emit(Event::SessionInvalidated {
            session_id: session_id.to_string(),
        });
    }

    fn schedule_recheck(&mut self, captured: BTreeSet<SessionId>) {
        if self.recheck_scheduled {
            return;
        }
        self.recheck_scheduled = true;

        let internal = self.internal.clone();
        let delay = self.settings.poll_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::Recheck { captured });
        });
    }

    /// Compare the extension-observed set with the one captured when the
    /// recheck was scheduled; released sessions are adopted
    async fn recheck(&mut self, captured: BTreeSet<SessionId>) {
        self.recheck_scheduled = false;

        let current = match self.db.extension_session_ids().await {
            Ok(current) => current,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read extension sessions");
                self.schedule_recheck(captured);
                return;
            }
        };

        let active = match self.db.session_ids().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read sessions");
                self.schedule_recheck(captured);
                return;
            }
        };

        // Sessions that left both sets were completed, not handed over
        let released: Vec<SessionId> = captured
            .difference(&current)
            .filter(|session_id| active.contains(*session_id))
            .cloned()
            .collect();
        if released.is_empty() {
            if !current.is_empty() {
                self.schedule_recheck(current);
            }
            return;
        }

        for session_id in &released {
            tracing::info!(session_id, "Extension released session");
            // Re-attach on the next pass; buffered results stay untouched
            self.observed.remove(session_id);
            self.emit(Event::SessionHandedOff {
                session_id: session_id.clone(),
            });
        }

        if let Err(e) = self.update_sessions().await {
            tracing::error!(error = %e, "Reconciliation after handoff failed");
        }
    }

    /// Delete the files of timed-out uploads in the background
    fn release_timed_out(&mut self, timed_out: Vec<(TaskId, Upload)>) {
        if timed_out.is_empty() {
            return;
        }

        for (task_id, upload) in &timed_out {
            tracing::warn!(task_id = %task_id, key = %upload.key, size = upload.size, "Upload timed out");
            self.emit(Event::UploadTimedOut {
                task_id: *task_id,
                key: upload.key.clone(),
            });
            if let Some(completion) = self.completions.remove(task_id) {
                completion.notify(Err(&Error::TimedOut { task_id: *task_id }));
            }
        }

        let processor = self.processor.clone();
        tokio::spawn(async move {
            for (task_id, upload) in timed_out {
                if let Err(e) = processor.finish(&upload, false).await {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to release timed out upload");
                }
            }
        });
    }

    async fn task_completed(&mut self, session_id: SessionId, task_id: TaskId, result: TaskResult) {
        let upload = match self.db.upload(task_id).await {
            Ok(Some(upload)) => upload,
            Ok(None) => {
                tracing::debug!(task_id = %task_id, session_id, "Finished task has no upload record");
                return;
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to load upload of finished task");
                return;
            }
        };

        let failure = classify(&result, &self.settings.additional_success_codes);
        match &failure {
            None => tracing::info!(
                task_id = %task_id,
                key = %upload.key,
                status = ?result.status,
                "Finished background task"
            ),
            Some(e) => tracing::error!(
                task_id = %task_id,
                key = %upload.key,
                status = ?result.status,
                error = %e,
                "Background task failed"
            ),
        }

        self.emit(Event::TaskFinished {
            task_id,
            session_id: session_id.clone(),
            key: upload.key.clone(),
            success: failure.is_none(),
        });

        self.finished.entry(session_id).or_default().push(FinishedTask {
            task_id,
            upload,
            failure,
        });
    }

    async fn session_drained(&mut self, session_id: SessionId) {
        if self.finalizing.contains_key(&session_id) {
            tracing::debug!(session_id, "Session is already being finalized");
            return;
        }

        let tasks = self.finished.remove(&session_id).unwrap_or_default();
        tracing::info!(session_id, tasks = tasks.len(), "Session finished events");

        if tasks.is_empty() {
            self.complete_session(&session_id, &[]).await;
            return;
        }

        let cancel = CancellationToken::new();
        let batch: Vec<(Upload, bool)> = tasks
            .iter()
            .map(|task| (task.upload.clone(), task.failure.is_none()))
            .collect();

        let processor = self.processor.clone();
        let internal = self.internal.clone();
        let token = cancel.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(batch.len());
            for (upload, successful) in &batch {
                tokio::select! {
                    _ = token.cancelled() => return,
                    outcome = processor.finish(upload, *successful) => outcomes.push(outcome),
                }
            }
            let _ = internal.send(Internal::FinalizationFinished {
                session_id: id,
                outcomes,
            });
        });

        self.finalizing
            .insert(session_id, Finalization { tasks, cancel });
    }

    async fn finalization_finished(&mut self, session_id: SessionId, outcomes: Vec<Result<()>>) {
        let Some(finalization) = self.finalizing.remove(&session_id) else {
            // Aborted; records were already handed back
            return;
        };

        let task_ids: Vec<TaskId> = finalization.tasks.iter().map(|task| task.task_id).collect();

        for (task, outcome) in finalization.tasks.into_iter().zip(outcomes) {
            let result = match task.failure {
                Some(failure) => Err(failure),
                None => outcome,
            };

            match &result {
                Ok(()) => tracing::info!(key = %task.upload.key, "Upload finalized"),
                Err(e) => tracing::error!(key = %task.upload.key, error = %e, "Failed to finish upload"),
            }
            self.emit(Event::UploadFinalized {
                key: task.upload.key.clone(),
                success: result.is_ok(),
            });

            if let Some(completion) = self.completions.remove(&task.task_id) {
                match &result {
                    Ok(()) => completion.notify(Ok(&task.upload)),
                    Err(e) => completion.notify(Err(e)),
                }
            }
        }

        self.complete_session(&session_id, &task_ids).await;
    }

    /// Drop a drained session: records, both id sets, the backend session and
    /// the pending wakeup
    async fn complete_session(&mut self, session_id: &str, task_ids: &[TaskId]) {
        if let Err(e) = self.db.remove_uploads(task_ids).await {
            tracing::error!(session_id, error = %e, "Failed to remove finished uploads");
        }
        if let Err(e) = self.db.remove_sessions(&[session_id.to_string()]).await {
            tracing::error!(session_id, error = %e, "Failed to remove finished session");
        }

        self.invalidate(session_id).await;
        self.observed.remove(session_id);
        self.wake(session_id);
    }

    async fn time_expiring(&mut self, session_id: SessionId) {
        tracing::warn!(session_id, "Background time expiring");

        let task_ids: Vec<TaskId> = if let Some(finalization) = self.finalizing.remove(&session_id) {
            finalization.cancel.cancel();
            finalization.tasks.iter().map(|task| task.task_id).collect()
        } else if let Some(tasks) = self.finished.remove(&session_id) {
            tasks.iter().map(|task| task.task_id).collect()
        } else {
            Vec::new()
        };

        if !task_ids.is_empty()
            && let Err(e) = self.db.remove_uploads(&task_ids).await
        {
            tracing::error!(session_id, error = %e, "Failed to remove expiring uploads");
        }

        self.wake(&session_id);
    }

    fn wake(&mut self, session_id: &str) {
        if let Some(wakeup) = self.wakeups.remove(session_id) {
            wakeup();
        }
    }

    async fn cancel_all(&mut self) -> Result<()> {
        let uploads = self.db.uploads().await?;
        let mut session_ids: BTreeSet<SessionId> = self.db.session_ids().await?;
        session_ids.extend(self.observed.drain());

        for session_id in &session_ids {
            self.invalidate(session_id).await;
        }

        for (_, finalization) in self.finalizing.drain() {
            finalization.cancel.cancel();
        }
        self.finished.clear();
        self.completions.clear();

        self.db.clear_context().await?;

        // Best-effort removal of the copies handed to the cancelled transfers
        let processor = self.processor.clone();
        tokio::spawn(async move {
            for (task_id, upload) in uploads {
                if let Err(e) = processor.finish(&upload, false).await {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to release cancelled upload");
                }
            }
        });

        let wakeups: Vec<SessionId> = self.wakeups.keys().cloned().collect();
        for session_id in wakeups {
            self.wake(&session_id);
        }

        tracing::info!(sessions = session_ids.len(), "Cancelled all uploads");
        self.emit(Event::AllUploadsCancelled);
        Ok(())
    }

    async fn finish_shutdown(&mut self) {
        let observed: Vec<SessionId> = self.observed.drain().collect();

        if self.settings.role == ProcessRole::Extension && !observed.is_empty() {
            // Hand remaining sessions to the main process
            if let Err(e) = self.db.release_extension_sessions(&observed).await {
                tracing::error!(error = %e, "Failed to release extension sessions");
            }
        }

        for session_id in &observed {
            if let Err(e) = self.backend.detach(session_id).await {
                tracing::warn!(session_id, error = %e, "Failed to detach session");
            }
        }

        self.emit(Event::Shutdown);
        if let Some((_, reply)) = self.shutdown.take() {
            let _ = reply.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(classify(&TaskResult::status(200), &[]).is_none());
        assert!(classify(&TaskResult::status(299), &[]).is_none());
        assert!(classify(&TaskResult::default(), &[]).is_none());
        assert!(matches!(
            classify(&TaskResult::status(300), &[]),
            Some(Error::UnacceptableStatus { code: 300 })
        ));
        assert!(classify(&TaskResult::status(412), &[412]).is_none());
        assert!(matches!(
            classify(&TaskResult::error("reset"), &[]),
            Some(Error::Transport(_))
        ));
        let both = TaskResult {
            status: Some(201),
            error: Some("lost".into()),
        };
        assert!(classify(&both, &[]).is_some());
    }

    #[test]
    fn empty_report() {
        assert!(ReconcileReport::default().is_empty());
        assert!(
            !ReconcileReport {
                observed: vec!["s".into()],
                ..ReconcileReport::default()
            }
            .is_empty()
        );
    }
}
