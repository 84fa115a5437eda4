//! The session manager.
//!
//! Owns the three-tier session hierarchy: one general session (GS) at a
//! time, with at most one active child — conversational (CS) or
//! workflow (WS) — under it.  Every lifecycle transition is an
//! all-or-nothing unit: in-memory mutation, then persistence, then
//! exactly one bus event.  If persistence fails the in-memory change is
//! rolled back and no event is published.
//!
//! Ends are idempotent: the summary produced by the first end is cached
//! and returned unchanged on repeat calls.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ensemble_bus::{Component, EventBus, EventKind};
use ensemble_store::SessionStore;

use crate::error::{SessionError, SessionResult};
use crate::types::{
    ConversationalSession, GeneralSession, Interaction, SessionKind, SessionState,
    SessionSummary, SessionTimeouts, Trigger, WorkflowOutcome, WorkflowSession,
};

#[derive(Default)]
struct Table {
    current_general: Option<Uuid>,
    general: HashMap<Uuid, GeneralSession>,
    conversational: HashMap<Uuid, ConversationalSession>,
    workflow: HashMap<Uuid, WorkflowSession>,
    /// Summaries of ended sessions, keyed by session id.
    summaries: HashMap<Uuid, SessionSummary>,
}

/// Manages session lifecycles and enforces the hierarchy rules.
pub struct SessionManager {
    bus: EventBus,
    store: SessionStore,
    timeouts: SessionTimeouts,
    inner: Mutex<Table>,
}

impl SessionManager {
    /// Create the manager and claim the session lifecycle events on the
    /// bus.
    pub fn new(bus: EventBus, store: SessionStore, timeouts: SessionTimeouts) -> SessionResult<Self> {
        bus.declare_producer(EventKind::SessionStarted, Component::SessionManager)?;
        bus.declare_producer(EventKind::SessionEnded, Component::SessionManager)?;

        Ok(Self {
            bus,
            store,
            timeouts,
            inner: Mutex::new(Table::default()),
        })
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    // ── general sessions ─────────────────────────────────────────────

    /// Start a general session.
    ///
    /// If one is already active, only [`Trigger::Replace`] may start a
    /// new one; the old session (and its child) is ended first.
    #[instrument(skip(self))]
    pub async fn start_general_session(&self, trigger: Trigger) -> SessionResult<Uuid> {
        let mut table = self.inner.lock().await;

        if let Some(active) = table.current_general {
            if trigger != Trigger::Replace {
                return Err(SessionError::InvalidTrigger { trigger, active });
            }
            self.end_general_locked(&mut table, active, SessionState::Completed, "replaced")
                .await?;
        }

        let id = Uuid::now_v7();
        let now = chrono::Utc::now().timestamp();
        table.general.insert(
            id,
            GeneralSession {
                id,
                trigger,
                started_at: now,
                last_activity: now,
                interactions: Vec::new(),
                active_child: None,
            },
        );
        table.current_general = Some(id);

        if let Err(err) = self
            .store
            .insert(id.to_string(), "general", None, json!({ "trigger": trigger }))
            .await
        {
            table.general.remove(&id);
            table.current_general = None;
            return Err(err.into());
        }

        self.bus.publish(
            Component::SessionManager,
            EventKind::SessionStarted,
            json!({ "session_id": id, "kind": "general", "trigger": trigger }),
        )?;

        info!(session_id = %id, ?trigger, "general session started");
        Ok(id)
    }

    /// End a general session, ending its active child first.
    pub async fn end_general_session(&self, gs: Uuid) -> SessionResult<SessionSummary> {
        let mut table = self.inner.lock().await;
        self.end_general_locked(&mut table, gs, SessionState::Completed, "ended")
            .await
    }

    /// Append an interaction to a general session's history and log.
    pub async fn record_interaction(
        &self,
        gs: Uuid,
        role: &str,
        content: &str,
    ) -> SessionResult<()> {
        let mut table = self.inner.lock().await;
        let now = chrono::Utc::now().timestamp();

        let session = table
            .general
            .get_mut(&gs)
            .ok_or(SessionError::NotFound { id: gs })?;
        let previous_activity = session.last_activity;
        session.interactions.push(Interaction {
            role: role.to_owned(),
            content: content.to_owned(),
            at: now,
        });
        session.last_activity = now;

        // One transactional write: the log row and the activity bump
        // land together or not at all.
        let entry = json!({ "role": role, "content": content, "at": now });
        let persisted = self
            .store
            .append_interaction(&gs.to_string(), entry, now)
            .await;

        if let Err(err) = persisted {
            let session = table.general.get_mut(&gs).expect("session vanished under lock");
            session.interactions.pop();
            session.last_activity = previous_activity;
            return Err(err.into());
        }
        Ok(())
    }

    // ── child sessions ───────────────────────────────────────────────

    /// Open a conversational session under `gs`.
    ///
    /// Fails with [`SessionError::SessionConflict`] if the GS already
    /// has an active child; the existing child is left untouched.
    #[instrument(skip(self, identity))]
    pub async fn create_conversational_session(
        &self,
        gs: Uuid,
        identity: Value,
    ) -> SessionResult<Uuid> {
        let mut table = self.inner.lock().await;
        Self::check_no_active_child(&table, gs)?;

        let id = Uuid::now_v7();
        let now = chrono::Utc::now().timestamp();
        table.conversational.insert(
            id,
            ConversationalSession {
                id,
                parent: gs,
                identity: identity.clone(),
                started_at: now,
                last_activity: now,
                turns: 0,
            },
        );
        Self::set_active_child(&mut table, gs, Some((SessionKind::Conversational, id)));

        if let Err(err) = self
            .store
            .insert(
                id.to_string(),
                "conversational",
                Some(gs.to_string()),
                json!({ "identity": identity }),
            )
            .await
        {
            table.conversational.remove(&id);
            Self::set_active_child(&mut table, gs, None);
            return Err(err.into());
        }

        self.bus.publish(
            Component::SessionManager,
            EventKind::SessionStarted,
            json!({ "session_id": id, "kind": "conversational", "parent_id": gs }),
        )?;

        info!(session_id = %id, general = %gs, "conversational session started");
        Ok(id)
    }

    /// Open a workflow session under `gs`.
    #[instrument(skip(self, initial))]
    pub async fn create_workflow_session(
        &self,
        gs: Uuid,
        workflow_type: &str,
        command: &str,
        initial: Map<String, Value>,
    ) -> SessionResult<Uuid> {
        let mut table = self.inner.lock().await;
        Self::check_no_active_child(&table, gs)?;

        let id = Uuid::now_v7();
        let now = chrono::Utc::now().timestamp();
        table.workflow.insert(
            id,
            WorkflowSession {
                id,
                parent: gs,
                workflow_type: workflow_type.to_owned(),
                command: command.to_owned(),
                started_at: now,
                last_activity: now,
                current_step: None,
                bag: initial.clone(),
            },
        );
        Self::set_active_child(&mut table, gs, Some((SessionKind::Workflow, id)));

        let context = json!({
            "workflow_type": workflow_type,
            "command": command,
            "bag": Value::Object(initial),
        });
        if let Err(err) = self
            .store
            .insert(id.to_string(), "workflow", Some(gs.to_string()), context)
            .await
        {
            table.workflow.remove(&id);
            Self::set_active_child(&mut table, gs, None);
            return Err(err.into());
        }

        self.bus.publish(
            Component::SessionManager,
            EventKind::SessionStarted,
            json!({
                "session_id": id,
                "kind": "workflow",
                "parent_id": gs,
                "workflow_type": workflow_type,
            }),
        )?;

        info!(session_id = %id, general = %gs, workflow_type, "workflow session started");
        Ok(id)
    }

    /// Record a dialogue turn on a conversational session.
    pub async fn record_turn(&self, cs: Uuid) -> SessionResult<()> {
        let mut table = self.inner.lock().await;
        let now = chrono::Utc::now().timestamp();

        let session = table
            .conversational
            .get_mut(&cs)
            .ok_or(SessionError::NotFound { id: cs })?;
        session.turns += 1;
        session.last_activity = now;

        if let Err(err) = self.store.touch(&cs.to_string(), now).await {
            let session = table.conversational.get_mut(&cs).expect("session vanished under lock");
            session.turns -= 1;
            return Err(err.into());
        }
        Ok(())
    }

    /// Persist a workflow session's progress: current step and variable
    /// bag.  Called after each engine operation so WS records survive a
    /// restart.
    pub async fn record_workflow_progress(
        &self,
        ws: Uuid,
        current_step: Option<String>,
        bag: Map<String, Value>,
    ) -> SessionResult<()> {
        let mut table = self.inner.lock().await;
        let now = chrono::Utc::now().timestamp();

        let session = table
            .workflow
            .get_mut(&ws)
            .ok_or(SessionError::NotFound { id: ws })?;
        let previous = (session.current_step.clone(), session.bag.clone(), session.last_activity);
        session.current_step = current_step.clone();
        session.bag = bag.clone();
        session.last_activity = now;

        let context = json!({
            "workflow_type": session.workflow_type,
            "command": session.command,
            "bag": Value::Object(bag),
        });
        if let Err(err) = self
            .store
            .update_progress(&ws.to_string(), current_step, context)
            .await
        {
            let session = table.workflow.get_mut(&ws).expect("session vanished under lock");
            (session.current_step, session.bag, session.last_activity) = previous;
            return Err(err.into());
        }
        Ok(())
    }

    /// End a conversational session.
    pub async fn end_conversational_session(
        &self,
        cs: Uuid,
        save_memory: bool,
    ) -> SessionResult<SessionSummary> {
        let mut table = self.inner.lock().await;
        self.end_conversational_locked(&mut table, cs, SessionState::Completed, save_memory)
            .await
    }

    /// End a workflow session with the given outcome.
    pub async fn end_workflow_session(
        &self,
        ws: Uuid,
        outcome: WorkflowOutcome,
    ) -> SessionResult<SessionSummary> {
        let mut table = self.inner.lock().await;
        let state = match outcome {
            WorkflowOutcome::Completed | WorkflowOutcome::Failed => SessionState::Completed,
            WorkflowOutcome::Cancelled => SessionState::Cancelled,
        };
        self.end_workflow_locked(&mut table, ws, state, outcome.as_str())
            .await
    }

    // ── queries ──────────────────────────────────────────────────────

    /// The currently active general session, if any.
    pub async fn current_general(&self) -> Option<Uuid> {
        self.inner.lock().await.current_general
    }

    /// The active child of `gs`, if any.
    pub async fn get_active_child(&self, gs: Uuid) -> SessionResult<Option<(SessionKind, Uuid)>> {
        let table = self.inner.lock().await;
        let session = table.general.get(&gs).ok_or(SessionError::NotFound { id: gs })?;
        Ok(session.active_child)
    }

    /// Snapshot of a workflow session.
    pub async fn workflow_session(&self, ws: Uuid) -> Option<WorkflowSession> {
        self.inner.lock().await.workflow.get(&ws).cloned()
    }

    /// Snapshots of all active workflow sessions.
    pub async fn list_active_workflows(&self) -> Vec<WorkflowSession> {
        self.inner.lock().await.workflow.values().cloned().collect()
    }

    /// Cached summary of an ended session.
    pub async fn summary_of(&self, id: Uuid) -> Option<SessionSummary> {
        self.inner.lock().await.summaries.get(&id).cloned()
    }

    /// The durable store record for a session.
    pub async fn session_record(&self, id: Uuid) -> SessionResult<ensemble_store::StoredSession> {
        Ok(self.store.get(&id.to_string()).await?)
    }

    // ── timeouts ─────────────────────────────────────────────────────

    /// End every session idle past its kind's timeout, children before
    /// parents.  A GS with an active child is never timed out directly;
    /// its clock matters only once it is childless.
    ///
    /// `now` is a Unix timestamp, passed in for testability.
    pub async fn check_timeouts(&self, now: i64) -> SessionResult<Vec<SessionSummary>> {
        let mut table = self.inner.lock().await;
        let mut ended = Vec::new();

        let idle_cs: Vec<Uuid> = table
            .conversational
            .values()
            .filter(|s| now - s.last_activity > self.timeouts.conversational_secs)
            .map(|s| s.id)
            .collect();
        for cs in idle_cs {
            warn!(session_id = %cs, "conversational session timed out");
            ended.push(
                self.end_conversational_locked(&mut table, cs, SessionState::TimedOut, false)
                    .await?,
            );
        }

        let idle_ws: Vec<Uuid> = table
            .workflow
            .values()
            .filter(|s| now - s.last_activity > self.timeouts.workflow_secs)
            .map(|s| s.id)
            .collect();
        for ws in idle_ws {
            warn!(session_id = %ws, "workflow session timed out");
            ended.push(
                self.end_workflow_locked(&mut table, ws, SessionState::TimedOut, "timed_out")
                    .await?,
            );
        }

        let idle_gs: Vec<Uuid> = table
            .general
            .values()
            .filter(|s| s.active_child.is_none() && now - s.last_activity > self.timeouts.general_secs)
            .map(|s| s.id)
            .collect();
        for gs in idle_gs {
            warn!(session_id = %gs, "general session timed out");
            ended.push(
                self.end_general_locked(&mut table, gs, SessionState::TimedOut, "timed_out")
                    .await?,
            );
        }

        Ok(ended)
    }

    /// Delete ended sessions (and their logs) from the store whose end
    /// is older than `cutoff`.  Children of a still-active general
    /// session are kept.  Returns the number of rows removed.
    pub async fn compact_ended(&self, cutoff: i64) -> SessionResult<usize> {
        Ok(self.store.compact_ended(cutoff).await?)
    }

    // ── internals ────────────────────────────────────────────────────

    fn check_no_active_child(table: &Table, gs: Uuid) -> SessionResult<()> {
        let session = table.general.get(&gs).ok_or(SessionError::NotFound { id: gs })?;
        match session.active_child {
            Some((existing_kind, existing)) => Err(SessionError::SessionConflict {
                general: gs,
                existing_kind,
                existing,
            }),
            None => Ok(()),
        }
    }

    fn set_active_child(table: &mut Table, gs: Uuid, child: Option<(SessionKind, Uuid)>) {
        if let Some(session) = table.general.get_mut(&gs) {
            session.active_child = child;
            session.last_activity = chrono::Utc::now().timestamp();
        }
    }

    async fn end_general_locked(
        &self,
        table: &mut Table,
        gs: Uuid,
        state: SessionState,
        reason: &str,
    ) -> SessionResult<SessionSummary> {
        if let Some(summary) = table.summaries.get(&gs) {
            return Ok(summary.clone());
        }
        let session = table.general.get(&gs).ok_or(SessionError::NotFound { id: gs })?;

        // Children never outlive their parent.
        match session.active_child {
            Some((SessionKind::Conversational, cs)) => {
                self.end_conversational_locked(table, cs, SessionState::Completed, true)
                    .await?;
            }
            Some((SessionKind::Workflow, ws)) => {
                self.end_workflow_locked(table, ws, SessionState::Cancelled, "parent_ended")
                    .await?;
            }
            _ => {}
        }

        let session = table.general.remove(&gs).expect("session vanished under lock");
        let now = chrono::Utc::now().timestamp();
        let summary = SessionSummary {
            session_id: gs,
            kind: SessionKind::General,
            state,
            started_at: session.started_at,
            ended_at: now,
            duration_secs: now - session.started_at,
            detail: json!({
                "trigger": session.trigger,
                "interactions": session.interactions.len(),
                "end_reason": reason,
            }),
        };

        if let Err(err) = self
            .store
            .mark_ended(&gs.to_string(), state.as_str(), summary.detail.clone(), now)
            .await
        {
            table.general.insert(gs, session);
            return Err(err.into());
        }

        if table.current_general == Some(gs) {
            table.current_general = None;
        }
        table.summaries.insert(gs, summary.clone());
        self.publish_ended(&summary)?;
        info!(session_id = %gs, state = state.as_str(), reason, "general session ended");
        Ok(summary)
    }

    async fn end_conversational_locked(
        &self,
        table: &mut Table,
        cs: Uuid,
        state: SessionState,
        save_memory: bool,
    ) -> SessionResult<SessionSummary> {
        if let Some(summary) = table.summaries.get(&cs) {
            debug!(session_id = %cs, "end of already-ended session, returning cached summary");
            return Ok(summary.clone());
        }
        let session = table
            .conversational
            .remove(&cs)
            .ok_or(SessionError::NotFound { id: cs })?;

        let now = chrono::Utc::now().timestamp();
        let summary = SessionSummary {
            session_id: cs,
            kind: SessionKind::Conversational,
            state,
            started_at: session.started_at,
            ended_at: now,
            duration_secs: now - session.started_at,
            detail: json!({ "turns": session.turns, "save_memory": save_memory }),
        };

        if let Err(err) = self
            .store
            .mark_ended(&cs.to_string(), state.as_str(), summary.detail.clone(), now)
            .await
        {
            // The active_child link was not cleared yet, so reinserting
            // the record restores the previous state completely.
            table.conversational.insert(cs, session);
            return Err(err.into());
        }

        Self::set_active_child(table, session.parent, None);
        table.summaries.insert(cs, summary.clone());
        self.publish_ended(&summary)?;
        info!(session_id = %cs, state = state.as_str(), save_memory, "conversational session ended");
        Ok(summary)
    }

    async fn end_workflow_locked(
        &self,
        table: &mut Table,
        ws: Uuid,
        state: SessionState,
        outcome: &str,
    ) -> SessionResult<SessionSummary> {
        if let Some(summary) = table.summaries.get(&ws) {
            debug!(session_id = %ws, "end of already-ended session, returning cached summary");
            return Ok(summary.clone());
        }
        let session = table
            .workflow
            .remove(&ws)
            .ok_or(SessionError::NotFound { id: ws })?;

        let now = chrono::Utc::now().timestamp();
        let steps_completed = session
            .bag
            .get("step_history")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let summary = SessionSummary {
            session_id: ws,
            kind: SessionKind::Workflow,
            state,
            started_at: session.started_at,
            ended_at: now,
            duration_secs: now - session.started_at,
            detail: json!({
                "workflow_type": session.workflow_type,
                "command": session.command,
                "outcome": outcome,
                "steps_completed": steps_completed,
                "current_step": session.current_step,
            }),
        };

        if let Err(err) = self
            .store
            .mark_ended(&ws.to_string(), state.as_str(), summary.detail.clone(), now)
            .await
        {
            table.workflow.insert(ws, session);
            return Err(err.into());
        }

        Self::set_active_child(table, session.parent, None);
        table.summaries.insert(ws, summary.clone());
        self.publish_ended(&summary)?;
        info!(session_id = %ws, state = state.as_str(), outcome, "workflow session ended");
        Ok(summary)
    }

    fn publish_ended(&self, summary: &SessionSummary) -> SessionResult<()> {
        self.bus.publish(
            Component::SessionManager,
            EventKind::SessionEnded,
            json!({
                "session_id": summary.session_id,
                "kind": summary.kind,
                "state": summary.state,
                "summary": summary,
            }),
        )?;
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use ensemble_store::Database;

    use super::*;

    async fn manager() -> SessionManager {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SessionManager::new(
            EventBus::default(),
            SessionStore::new(db),
            SessionTimeouts::default(),
        )
        .unwrap()
    }

    fn collect_events(bus: &EventBus, kind: EventKind) -> Arc<StdMutex<Vec<Value>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(kind, move |event| {
            seen_clone.lock().unwrap().push(event.payload.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn start_general_session_publishes_and_persists() {
        let mgr = manager().await;
        let bus = mgr.bus.clone();
        let started = collect_events(&bus, EventKind::SessionStarted);

        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();

        assert_eq!(mgr.current_general().await, Some(gs));
        let record = mgr.session_record(gs).await.unwrap();
        assert_eq!(record.kind, "general");
        assert_eq!(record.state, "active");

        let events = started.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["kind"], "general");
    }

    #[tokio::test]
    async fn second_general_session_requires_replace() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();

        let err = mgr.start_general_session(Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTrigger { .. }));
        assert_eq!(mgr.current_general().await, Some(gs));

        let replacement = mgr.start_general_session(Trigger::Replace).await.unwrap();
        assert_ne!(replacement, gs);
        assert_eq!(mgr.current_general().await, Some(replacement));
        // The replaced session was properly ended.
        assert!(mgr.summary_of(gs).await.is_some());
    }

    #[tokio::test]
    async fn child_mutual_exclusion_leaves_existing_untouched() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let ws = mgr
            .create_workflow_session(gs, "timer", "set a timer", Map::new())
            .await
            .unwrap();

        let err = mgr
            .create_conversational_session(gs, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::SessionConflict {
                existing_kind: SessionKind::Workflow,
                ..
            }
        ));

        // Existing workflow session is untouched.
        assert_eq!(
            mgr.get_active_child(gs).await.unwrap(),
            Some((SessionKind::Workflow, ws))
        );
        assert!(mgr.workflow_session(ws).await.is_some());
    }

    #[tokio::test]
    async fn conversational_session_roundtrip() {
        let mgr = manager().await;
        let bus = mgr.bus.clone();
        let ended = collect_events(&bus, EventKind::SessionEnded);

        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let cs = mgr
            .create_conversational_session(gs, json!({"speaker": "primary"}))
            .await
            .unwrap();
        mgr.record_turn(cs).await.unwrap();
        mgr.record_turn(cs).await.unwrap();

        let summary = mgr.end_conversational_session(cs, true).await.unwrap();
        assert_eq!(summary.kind, SessionKind::Conversational);
        assert_eq!(summary.state, SessionState::Completed);
        assert_eq!(summary.detail["turns"], 2);
        assert_eq!(summary.detail["save_memory"], true);

        // GS is free for a new child again.
        assert_eq!(mgr.get_active_child(gs).await.unwrap(), None);
        assert_eq!(ended.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ending_twice_returns_cached_summary_without_second_event() {
        let mgr = manager().await;
        let bus = mgr.bus.clone();
        let ended = collect_events(&bus, EventKind::SessionEnded);

        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let cs = mgr.create_conversational_session(gs, json!({})).await.unwrap();

        let first = mgr.end_conversational_session(cs, false).await.unwrap();
        let second = mgr.end_conversational_session(cs, true).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ended.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ending_general_ends_child_first() {
        let mgr = manager().await;
        let bus = mgr.bus.clone();
        let ended = collect_events(&bus, EventKind::SessionEnded);

        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let ws = mgr
            .create_workflow_session(gs, "timer", "set a timer", Map::new())
            .await
            .unwrap();

        mgr.end_general_session(gs).await.unwrap();

        let ws_summary = mgr.summary_of(ws).await.unwrap();
        assert_eq!(ws_summary.state, SessionState::Cancelled);
        assert_eq!(ws_summary.detail["outcome"], "parent_ended");

        // Child end event precedes the parent's.
        let events = ended.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["kind"], "workflow");
        assert_eq!(events[1]["kind"], "general");
        assert_eq!(mgr.current_general().await, None);
    }

    #[tokio::test]
    async fn workflow_outcome_is_reflected_in_summary() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let ws = mgr
            .create_workflow_session(gs, "timer", "set a timer", Map::new())
            .await
            .unwrap();

        let summary = mgr
            .end_workflow_session(ws, WorkflowOutcome::Cancelled)
            .await
            .unwrap();
        assert_eq!(summary.state, SessionState::Cancelled);
        assert_eq!(summary.detail["outcome"], "cancelled");

        let record = mgr.session_record(ws).await.unwrap();
        assert_eq!(record.state, "cancelled");
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back_and_publishes_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = SessionStore::new(db.clone());
        let bus = EventBus::default();
        let mgr = SessionManager::new(bus.clone(), store, SessionTimeouts::default()).unwrap();
        let started = collect_events(&bus, EventKind::SessionStarted);

        // Break the schema so the insert fails.
        db.execute(|conn| {
            conn.execute_batch("ALTER TABLE sessions RENAME TO sessions_gone;")?;
            Ok(())
        })
        .await
        .unwrap();

        let err = mgr.start_general_session(Trigger::WakeWord).await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(mgr.current_general().await, None);
        assert!(started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_workflow_progress_persists_bag() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let ws = mgr
            .create_workflow_session(gs, "timer", "set a timer", Map::new())
            .await
            .unwrap();

        let mut bag = Map::new();
        bag.insert("duration".into(), json!(300));
        mgr.record_workflow_progress(ws, Some("confirm".into()), bag)
            .await
            .unwrap();

        let record = mgr.session_record(ws).await.unwrap();
        assert_eq!(record.current_step.as_deref(), Some("confirm"));
        assert_eq!(record.context["bag"]["duration"], 300);

        let snapshot = mgr.workflow_session(ws).await.unwrap();
        assert_eq!(snapshot.current_step.as_deref(), Some("confirm"));
    }

    #[tokio::test]
    async fn timeouts_end_children_before_general() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let cs = mgr.create_conversational_session(gs, json!({})).await.unwrap();

        let now = chrono::Utc::now().timestamp();

        // Nothing is idle yet.
        assert!(mgr.check_timeouts(now).await.unwrap().is_empty());

        // Far enough in the future, the CS times out; the GS only once
        // it is childless and idle past its own window.
        let ended = mgr.check_timeouts(now + 301).await.unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].session_id, cs);
        assert_eq!(ended[0].state, SessionState::TimedOut);

        let ended = mgr.check_timeouts(now + 1000).await.unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].session_id, gs);
        assert_eq!(mgr.current_general().await, None);
    }

    #[tokio::test]
    async fn interactions_are_logged() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();

        mgr.record_interaction(gs, "user", "what time is it").await.unwrap();
        mgr.record_interaction(gs, "assistant", "half past nine").await.unwrap();

        let summary = mgr.end_general_session(gs).await.unwrap();
        assert_eq!(summary.detail["interactions"], 2);
    }

    #[tokio::test]
    async fn failed_interaction_write_leaves_no_partial_state() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = SessionStore::new(db.clone());
        let mgr = SessionManager::new(EventBus::default(), store.clone(), SessionTimeouts::default())
            .unwrap();

        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let before = store.get(&gs.to_string()).await.unwrap().last_activity;

        // Break the log table so the interaction write fails.
        db.execute(|conn| {
            conn.execute_batch("ALTER TABLE session_log RENAME TO session_log_gone;")?;
            Ok(())
        })
        .await
        .unwrap();

        let err = mgr.record_interaction(gs, "user", "hello").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));

        // Neither the in-memory history nor the persisted activity moved.
        assert_eq!(store.get(&gs.to_string()).await.unwrap().last_activity, before);
        let summary = mgr.end_general_session(gs).await.unwrap();
        assert_eq!(summary.detail["interactions"], 0);
    }

    #[tokio::test]
    async fn compaction_keeps_children_of_the_live_general() {
        let mgr = manager().await;
        let gs = mgr.start_general_session(Trigger::WakeWord).await.unwrap();
        let cs = mgr.create_conversational_session(gs, json!({})).await.unwrap();
        mgr.end_conversational_session(cs, false).await.unwrap();

        // The CS ended, but its GS is still live: nothing is removed
        // even far past the cutoff.
        let now = chrono::Utc::now().timestamp();
        assert_eq!(mgr.compact_ended(now + 1_000_000).await.unwrap(), 0);
        assert!(mgr.session_record(cs).await.is_ok());

        mgr.end_general_session(gs).await.unwrap();
        assert_eq!(mgr.compact_ended(now + 1_000_000).await.unwrap(), 2);
        assert!(mgr.session_record(cs).await.is_err());
    }
}
