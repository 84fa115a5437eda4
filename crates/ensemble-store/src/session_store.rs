//! Persistent session records.
//!
//! The store speaks in strings and JSON; the session layer maps these
//! rows to its typed model.  JSON columns are parsed outside the
//! rusqlite closures so parse failures surface as [`StoreError::Json`]
//! rather than being squeezed through `rusqlite::Error`.

use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A session row as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: String,
    /// `general`, `conversational` or `workflow`.
    pub kind: String,
    pub parent_id: Option<String>,
    /// `active`, `completed`, `timed_out` or `cancelled`.
    pub state: String,
    /// Kind-specific context: trigger, identity context, task
    /// definition, workflow variable bag.
    pub context: Value,
    pub current_step: Option<String>,
    pub created_at: i64,
    pub last_activity: i64,
    pub ended_at: Option<i64>,
    pub summary: Option<Value>,
}

/// An append-only log entry attached to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLogEntry {
    pub entry: Value,
    pub created_at: i64,
}

/// Raw row with JSON still as text; converted fallibly afterwards.
struct SessionRow {
    id: String,
    kind: String,
    parent_id: Option<String>,
    state: String,
    context: String,
    current_step: Option<String>,
    created_at: i64,
    last_activity: i64,
    ended_at: Option<i64>,
    summary: Option<String>,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            parent_id: row.get(2)?,
            state: row.get(3)?,
            context: row.get(4)?,
            current_step: row.get(5)?,
            created_at: row.get(6)?,
            last_activity: row.get(7)?,
            ended_at: row.get(8)?,
            summary: row.get(9)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredSession> {
        Ok(StoredSession {
            context: serde_json::from_str(&self.context)?,
            summary: self.summary.as_deref().map(serde_json::from_str).transpose()?,
            id: self.id,
            kind: self.kind,
            parent_id: self.parent_id,
            state: self.state,
            current_step: self.current_step,
            created_at: self.created_at,
            last_activity: self.last_activity,
            ended_at: self.ended_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, kind, parent_id, state, context, current_step, \
                              created_at, last_activity, ended_at, summary";

/// CRUD access to the `sessions` and `session_log` tables.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a freshly started session in `active` state.
    #[instrument(skip(self, context))]
    pub async fn insert(
        &self,
        id: String,
        kind: &'static str,
        parent_id: Option<String>,
        context: Value,
    ) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        let context = serde_json::to_string(&context)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, kind, parent_id, state, context, created_at, last_activity) \
                     VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?5)",
                    params![id, kind, parent_id, context, now],
                )?;
                debug!(session_id = %id, kind, "session row inserted");
                Ok(())
            })
            .await
    }

    /// Fetch a session by id.
    pub async fn get(&self, id: &str) -> StoreResult<StoredSession> {
        let id = id.to_owned();
        let row = self
            .db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE id = ?1"),
                        params![&id],
                        SessionRow::from_row,
                    )
                    .optional()?;
                row.ok_or(StoreError::NotFound {
                    entity: "session",
                    id,
                })
            })
            .await?;
        row.into_stored()
    }

    /// Transition a session to a terminal state, recording the summary.
    #[instrument(skip(self, summary))]
    pub async fn mark_ended(
        &self,
        id: &str,
        state: &'static str,
        summary: Value,
        ended_at: i64,
    ) -> StoreResult<()> {
        let id = id.to_owned();
        let summary = serde_json::to_string(&summary)?;

        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE sessions SET state = ?2, summary = ?3, ended_at = ?4 WHERE id = ?1",
                    params![id, state, summary, ended_at],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound {
                        entity: "session",
                        id,
                    });
                }
                debug!(session_id = %id, state, "session row ended");
                Ok(())
            })
            .await
    }

    /// Bump a session's last-activity timestamp.
    pub async fn touch(&self, id: &str, at: i64) -> StoreResult<()> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
                    params![id, at],
                )?;
                Ok(())
            })
            .await
    }

    /// Persist a workflow session's progress: current step and variable
    /// bag (stored inside the context JSON by the caller).
    #[instrument(skip(self, context))]
    pub async fn update_progress(
        &self,
        id: &str,
        current_step: Option<String>,
        context: Value,
    ) -> StoreResult<()> {
        let id = id.to_owned();
        let now = chrono::Utc::now().timestamp();
        let context = serde_json::to_string(&context)?;

        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE sessions SET current_step = ?2, context = ?3, last_activity = ?4 \
                     WHERE id = ?1",
                    params![id, current_step, context, now],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound {
                        entity: "session",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// The active child session of `parent_id`, if any.
    pub async fn active_child(&self, parent_id: &str) -> StoreResult<Option<StoredSession>> {
        let parent_id = parent_id.to_owned();
        let row = self
            .db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {SELECT_COLUMNS} FROM sessions \
                             WHERE parent_id = ?1 AND state = 'active' \
                             ORDER BY created_at DESC LIMIT 1"
                        ),
                        params![parent_id],
                        SessionRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(SessionRow::into_stored).transpose()
    }

    /// All active sessions, oldest first.
    pub async fn list_active(&self) -> StoreResult<Vec<StoredSession>> {
        let rows = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM sessions WHERE state = 'active' \
                     ORDER BY created_at ASC"
                ))?;
                let rows = stmt
                    .query_map([], SessionRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(SessionRow::into_stored).collect()
    }

    /// Append an entry to a session's log.
    pub async fn append_log(&self, session_id: &str, entry: Value) -> StoreResult<()> {
        let session_id = session_id.to_owned();
        let entry = serde_json::to_string(&entry)?;
        let now = chrono::Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO session_log (session_id, entry, created_at) VALUES (?1, ?2, ?3)",
                    params![session_id, entry, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Append a log entry and bump the session's last-activity stamp in
    /// one transaction, so a failure leaves neither half behind.
    #[instrument(skip(self, entry))]
    pub async fn append_interaction(
        &self,
        session_id: &str,
        entry: Value,
        at: i64,
    ) -> StoreResult<()> {
        let session_id = session_id.to_owned();
        let entry = serde_json::to_string(&entry)?;

        self.db
            .execute(move |conn| {
                // `conn.transaction()` needs `&mut Connection`, so the
                // transaction is managed manually here.
                conn.execute_batch("BEGIN IMMEDIATE;")?;

                let result = (|| -> StoreResult<()> {
                    conn.execute(
                        "INSERT INTO session_log (session_id, entry, created_at) \
                         VALUES (?1, ?2, ?3)",
                        params![session_id, entry, at],
                    )?;
                    let changed = conn.execute(
                        "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
                        params![session_id, at],
                    )?;
                    if changed == 0 {
                        return Err(StoreError::NotFound {
                            entity: "session",
                            id: session_id.clone(),
                        });
                    }
                    Ok(())
                })();

                match &result {
                    Ok(()) => conn.execute_batch("COMMIT;")?,
                    Err(_) => {
                        let _ = conn.execute_batch("ROLLBACK;");
                    }
                }
                result
            })
            .await
    }

    /// A session's log entries, oldest first.
    pub async fn log_for(&self, session_id: &str, limit: usize) -> StoreResult<Vec<SessionLogEntry>> {
        let session_id = session_id.to_owned();
        let raw: Vec<(String, i64)> = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT entry, created_at FROM session_log WHERE session_id = ?1 \
                     ORDER BY id ASC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![session_id, limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        raw.into_iter()
            .map(|(entry, created_at)| {
                Ok(SessionLogEntry {
                    entry: serde_json::from_str(&entry)?,
                    created_at,
                })
            })
            .collect()
    }

    /// Delete ended sessions (and their logs, via cascade) whose
    /// `ended_at` is older than `cutoff`.  A child row is only eligible
    /// once its general session has ended too, so the history of a live
    /// session stays intact.  Children go first so root rows never
    /// orphan a remaining child.
    #[instrument(skip(self))]
    pub async fn compact_ended(&self, cutoff: i64) -> StoreResult<usize> {
        self.db
            .execute(move |conn| {
                let children = conn.execute(
                    "DELETE FROM sessions \
                     WHERE ended_at IS NOT NULL AND ended_at < ?1 AND parent_id IS NOT NULL \
                     AND parent_id NOT IN (SELECT id FROM sessions WHERE ended_at IS NULL)",
                    params![cutoff],
                )?;
                let roots = conn.execute(
                    "DELETE FROM sessions \
                     WHERE ended_at IS NOT NULL AND ended_at < ?1 AND parent_id IS NULL \
                     AND id NOT IN (SELECT DISTINCT parent_id FROM sessions \
                                    WHERE parent_id IS NOT NULL)",
                    params![cutoff],
                )?;
                let total = children + roots;
                if total > 0 {
                    debug!(deleted = total, "compacted ended sessions");
                }
                Ok(total)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
