//! Upload context: uploads by task id, active session ids and the session ids
//! still observed by the extension process.
//!
//! Each collection is one JSON value under a logical key. Writers always
//! replace whole collections inside a single `BEGIN IMMEDIATE` transaction
//! that also performs the read, so a read-modify-write from one process can
//! never interleave with one from the other.

use crate::error::DatabaseError;
use crate::types::{SessionId, TaskId, Upload};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};

use super::Database;

/// Logical key of the `task id -> upload` collection
pub const UPLOADS_KEY: &str = "uploadsByTaskId";
/// Logical key of the active session id set
pub const SESSION_IDS_KEY: &str = "sessionIds";
/// Logical key of the extension-observed session id set
pub const EXTENSION_SESSION_IDS_KEY: &str = "shareExtensionSessionIds";

/// Format written by this version.
///
/// Format 1 predates tagged upload kinds: records carry a flat `uploadKey`
/// and may lack `sessionId`, `size` and `date`. Both decode through the same
/// path.
pub const CURRENT_FORMAT: i64 = 2;

/// Snapshot of all three persisted collections
#[derive(Clone, Debug, Default)]
pub struct ContextState {
    /// One entry per active transfer task
    pub uploads: BTreeMap<TaskId, Upload>,
    /// Sessions carrying at least one live upload
    pub session_ids: BTreeSet<SessionId>,
    /// Subset of `session_ids` still observed by the extension process
    pub extension_session_ids: BTreeSet<SessionId>,
}

impl ContextState {
    /// Task ids of uploads belonging to `session_id`
    pub fn task_ids_in_session(&self, session_id: &str) -> Vec<TaskId> {
        self.uploads
            .iter()
            .filter(|(_, upload)| upload.session_id == session_id)
            .map(|(task_id, _)| *task_id)
            .collect()
    }
}

impl Database {
    /// Load all three collections in one consistent read
    pub async fn load_context(&self) -> Result<ContextState> {
        let mut conn = self.acquire().await?;
        read_state(&mut conn).await
    }

    /// All persisted uploads keyed by task id
    pub async fn uploads(&self) -> Result<BTreeMap<TaskId, Upload>> {
        Ok(self.load_context().await?.uploads)
    }

    /// Look up a single upload
    pub async fn upload(&self, task_id: TaskId) -> Result<Option<Upload>> {
        Ok(self.load_context().await?.uploads.remove(&task_id))
    }

    /// Active session ids
    pub async fn session_ids(&self) -> Result<BTreeSet<SessionId>> {
        Ok(self.load_context().await?.session_ids)
    }

    /// Session ids still observed by the extension process
    pub async fn extension_session_ids(&self) -> Result<BTreeSet<SessionId>> {
        Ok(self.load_context().await?.extension_session_ids)
    }

    /// Atomically read, mutate and write back the whole context
    ///
    /// After `mutate` runs, extension-observed ids that are no longer active
    /// are dropped so the subset relation always holds on disk.
    pub async fn update_context<R>(&self, mutate: impl FnOnce(&mut ContextState) -> R) -> Result<R> {
        let mut conn = self.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin context transaction: {}",
                    e
                )))
            })?;

        let result = async {
            let mut state = read_state(&mut conn).await?;
            let output = mutate(&mut state);

            let ContextState {
                uploads,
                session_ids,
                extension_session_ids,
            } = &mut state;
            extension_session_ids.retain(|id| session_ids.contains(id));

            let encoded: BTreeMap<String, &Upload> = uploads
                .iter()
                .map(|(task_id, upload)| (task_id.to_string(), upload))
                .collect();
            write_value(&mut conn, UPLOADS_KEY, &encoded).await?;
            write_value(&mut conn, SESSION_IDS_KEY, &*session_ids).await?;
            write_value(&mut conn, EXTENSION_SESSION_IDS_KEY, &*extension_session_ids).await?;

            Ok::<R, Error>(output)
        }
        .await;

        match result {
            Ok(output) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to commit context transaction: {}",
                            e
                        )))
                    })?;
                Ok(output)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Persist an upload under its task id
    pub async fn save_upload(&self, task_id: TaskId, upload: &Upload) -> Result<()> {
        self.update_context(|state| {
            state.uploads.insert(task_id, upload.clone());
        })
        .await
    }

    /// Remove uploads by task id; unknown ids are ignored
    pub async fn remove_uploads(&self, task_ids: &[TaskId]) -> Result<()> {
        self.update_context(|state| {
            for task_id in task_ids {
                state.uploads.remove(task_id);
            }
        })
        .await
    }

    /// Record a new session as active and, optionally, as extension-observed
    pub async fn register_session(&self, session_id: &str, extension_observed: bool) -> Result<()> {
        self.update_context(|state| {
            state.session_ids.insert(session_id.to_string());
            if extension_observed {
                state.extension_session_ids.insert(session_id.to_string());
            }
        })
        .await
    }

    /// Forget sessions entirely (both sets)
    pub async fn remove_sessions(&self, session_ids: &[SessionId]) -> Result<()> {
        self.update_context(|state| {
            for session_id in session_ids {
                state.session_ids.remove(session_id);
                state.extension_session_ids.remove(session_id);
            }
        })
        .await
    }

    /// Stop marking sessions as extension-observed, leaving them active
    pub async fn release_extension_sessions(&self, session_ids: &[SessionId]) -> Result<()> {
        self.update_context(|state| {
            for session_id in session_ids {
                state.extension_session_ids.remove(session_id);
            }
        })
        .await
    }

    /// Remove every upload and session id
    pub async fn clear_context(&self) -> Result<()> {
        self.update_context(|state| *state = ContextState::default())
            .await
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })
    }
}

async fn read_state(conn: &mut SqliteConnection) -> Result<ContextState> {
    let uploads = match read_value(conn, UPLOADS_KEY).await? {
        Some((value, format)) => decode_uploads(&value, format)?,
        None => BTreeMap::new(),
    };
    let session_ids = read_id_set(conn, SESSION_IDS_KEY).await?;
    let extension_session_ids = read_id_set(conn, EXTENSION_SESSION_IDS_KEY).await?;

    Ok(ContextState {
        uploads,
        session_ids,
        extension_session_ids,
    })
}

async fn read_id_set(conn: &mut SqliteConnection, key: &str) -> Result<BTreeSet<SessionId>> {
    match read_value(conn, key).await? {
        Some((value, _)) => decode(key, &value),
        None => Ok(BTreeSet::new()),
    }
}

async fn read_value(conn: &mut SqliteConnection, key: &str) -> Result<Option<(String, i64)>> {
    sqlx::query_as("SELECT value, format FROM upload_context WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read {}: {}",
                key, e
            )))
        })
}

async fn write_value<T: Serialize + ?Sized>(
    conn: &mut SqliteConnection,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO upload_context (key, value, format, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, format = excluded.format,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(json)
    .bind(CURRENT_FORMAT)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to write {}: {}",
            key, e
        )))
    })?;

    Ok(())
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_str(value).map_err(|e| {
        Error::Database(DatabaseError::CorruptValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}

/// Decode the uploads collection record by record.
///
/// A record that no known format can decode is skipped rather than failing
/// the whole collection; it is dropped on the next write.
fn decode_uploads(value: &str, format: i64) -> Result<BTreeMap<TaskId, Upload>> {
    if format > CURRENT_FORMAT {
        tracing::debug!(format, "Reading upload context written by a newer version");
    }

    let raw: BTreeMap<String, serde_json::Value> = decode(UPLOADS_KEY, value)?;
    let mut uploads = BTreeMap::new();

    for (raw_task_id, record) in raw {
        let Ok(task_id) = raw_task_id.parse::<TaskId>() else {
            tracing::warn!(task_id = %raw_task_id, "Skipping upload with malformed task id");
            continue;
        };

        match serde_json::from_value::<Upload>(record) {
            Ok(upload) => {
                uploads.insert(task_id, upload);
            }
            Err(e) => {
                tracing::warn!(task_id = task_id.0, format, error = %e, "Skipping undecodable upload record");
            }
        }
    }

    Ok(uploads)
}
