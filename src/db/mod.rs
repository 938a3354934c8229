//! Database layer for attachment-transfer
//!
//! Handles SQLite persistence of the upload context shared by the main and the
//! extension process. Both processes open the same file inside the shared
//! container; every write is one transaction, so each process always sees a
//! whole collection.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`context`] - Uploads by task id, active and extension-observed session ids

use sqlx::sqlite::SqlitePool;

mod context;
mod migrations;

pub use context::{
    CURRENT_FORMAT, ContextState, EXTENSION_SESSION_IDS_KEY, SESSION_IDS_KEY, UPLOADS_KEY,
};

/// Database handle for attachment-transfer
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
