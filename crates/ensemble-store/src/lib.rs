//! # ensemble-store
//!
//! SQLite-backed persistence for Ensemble.
//!
//! Provides the [`Database`] handle (WAL mode, pragmas, async access
//! via `spawn_blocking`), versioned transactional migrations, and the
//! [`SessionStore`] over the `sessions` and `session_log` tables.
//!
//! ## Quick start
//!
//! ```ignore
//! use ensemble_store::{Database, SessionStore};
//!
//! let db = Database::open_and_migrate("data/ensemble.db").await?;
//! let sessions = SessionStore::new(db);
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod session_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use session_store::{SessionLogEntry, SessionStore, StoredSession};
