//! Schema migration system.
//!
//! Migrations are static SQL strings keyed by version number.  Applied
//! versions are tracked in a `_migrations` table, so running the set is
//! idempotent.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL, possibly several statements.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema — sessions and session_log",
        sql: r#"
            CREATE TABLE sessions (
                id            TEXT PRIMARY KEY,
                kind          TEXT NOT NULL CHECK(kind IN ('general','conversational','workflow')),
                parent_id     TEXT REFERENCES sessions(id),
                state         TEXT NOT NULL CHECK(state IN ('active','completed','timed_out','cancelled')),
                context       TEXT NOT NULL DEFAULT '{}',
                current_step  TEXT,
                created_at    INTEGER NOT NULL,
                last_activity INTEGER NOT NULL,
                ended_at      INTEGER
            );
            CREATE INDEX idx_sessions_parent ON sessions(parent_id);
            CREATE INDEX idx_sessions_state ON sessions(state);

            CREATE TABLE session_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                entry      TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_session_log_session ON session_log(session_id);
        "#,
    },
    Migration {
        version: 2,
        description: "end-of-session summaries and retention index",
        sql: r#"
            ALTER TABLE sessions ADD COLUMN summary TEXT;
            CREATE INDEX idx_sessions_ended ON sessions(ended_at);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function — call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `conn.transaction()` needs `&mut Connection`, so the transaction
    // is managed manually here.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// The expected latest migration version (update when adding migrations).
    const LATEST_VERSION: u32 = 2;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "migration versions must be strictly increasing: {} >= {}",
                window[0].version,
                window[1].version,
            );
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"session_log".to_string()));
    }

    #[test]
    fn kind_and_state_checks_are_enforced() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (id, kind, state, created_at, last_activity) \
             VALUES ('s1', 'general', 'active', 0, 0)",
            [],
        )
        .unwrap();

        let bad_kind = conn.execute(
            "INSERT INTO sessions (id, kind, state, created_at, last_activity) \
             VALUES ('s2', 'mystery', 'active', 0, 0)",
            [],
        );
        assert!(bad_kind.is_err());

        let bad_state = conn.execute(
            "INSERT INTO sessions (id, kind, state, created_at, last_activity) \
             VALUES ('s3', 'general', 'sleeping', 0, 0)",
            [],
        );
        assert!(bad_state.is_err());
    }

    #[test]
    fn v2_adds_summary_column() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (id, kind, state, created_at, last_activity, summary) \
             VALUES ('s1', 'workflow', 'completed', 0, 0, '{\"ok\":true}')",
            [],
        )
        .unwrap();

        let summary: String = conn
            .query_row("SELECT summary FROM sessions WHERE id = 's1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(summary, "{\"ok\":true}");
    }

    #[test]
    fn session_log_cascades_on_delete() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (id, kind, state, created_at, last_activity) \
             VALUES ('s1', 'general', 'active', 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO session_log (session_id, entry, created_at) VALUES ('s1', '{}', 0)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM sessions WHERE id = 's1'", []).unwrap();

        let count: i64 = conn
            .query_row("SELECT count(*) FROM session_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
