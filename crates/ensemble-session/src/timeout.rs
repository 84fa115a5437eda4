//! Background session maintenance.
//!
//! Periodically asks the [`SessionManager`] to end sessions idle past
//! their kind-specific timeout, then compacts ended sessions older than
//! the retention window.  Each timed-out session goes through the
//! normal end path, so persistence and lifecycle events behave exactly
//! as for an explicit end.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::manager::SessionManager;

/// Spawn the sweep loop.  Drop or abort the handle to stop it.
///
/// `log_retention` bounds how long ended sessions (and their logs) are
/// kept before compaction removes them.
pub fn spawn_timeout_sweep(
    manager: Arc<SessionManager>,
    interval: Duration,
    log_retention: Duration,
) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        retention_secs = log_retention.as_secs(),
        "session timeout sweep started"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh start
        // never sweeps before anything could go idle.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            match manager.check_timeouts(now).await {
                Ok(ended) if !ended.is_empty() => {
                    info!(count = ended.len(), "sessions timed out");
                }
                Ok(_) => {}
                Err(err) => error!(%err, "timeout sweep failed"),
            }

            let cutoff = now - log_retention.as_secs() as i64;
            match manager.compact_ended(cutoff).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "old ended sessions compacted"),
                Err(err) => error!(%err, "session compaction failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use ensemble_bus::EventBus;
    use ensemble_store::{Database, SessionStore};
    use serde_json::json;

    use crate::types::SessionTimeouts;

    use super::*;

    #[tokio::test]
    async fn sweep_task_starts_and_stops() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let manager = Arc::new(
            SessionManager::new(
                EventBus::default(),
                SessionStore::new(db),
                SessionTimeouts::default(),
            )
            .unwrap(),
        );

        let handle = spawn_timeout_sweep(
            Arc::clone(&manager),
            Duration::from_secs(60),
            Duration::from_secs(7 * 86_400),
        );
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn sweep_compacts_old_ended_sessions() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = SessionStore::new(db);
        store
            .insert("gs-old".into(), "general", None, json!({}))
            .await
            .unwrap();
        store
            .mark_ended("gs-old", "completed", json!({}), 100)
            .await
            .unwrap();

        let manager = Arc::new(
            SessionManager::new(EventBus::default(), store.clone(), SessionTimeouts::default())
                .unwrap(),
        );

        let handle = spawn_timeout_sweep(
            Arc::clone(&manager),
            Duration::from_millis(10),
            Duration::ZERO,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.get("gs-old").await.is_err());
    }
}
