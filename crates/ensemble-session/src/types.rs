//! Session model: kinds, states, triggers, per-kind records, summaries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The three tiers of the session hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Root umbrella session for one user engagement.
    General,
    /// Free-form dialogue child session.
    Conversational,
    /// Structured multi-step task child session.
    Workflow,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Conversational => "conversational",
            Self::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Completed,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started (or wants to start) a general session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    WakeWord,
    Manual,
    Api,
    /// End the currently active general session and start fresh.
    Replace,
}

/// One logged exchange inside a general session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub role: String,
    pub content: String,
    pub at: i64,
}

/// In-memory record of a general session.
#[derive(Debug, Clone)]
pub struct GeneralSession {
    pub id: Uuid,
    pub trigger: Trigger,
    pub started_at: i64,
    pub last_activity: i64,
    pub interactions: Vec<Interaction>,
    /// The one active child session, if any (mutual exclusion).
    pub active_child: Option<(SessionKind, Uuid)>,
}

/// In-memory record of a conversational session.
#[derive(Debug, Clone)]
pub struct ConversationalSession {
    pub id: Uuid,
    pub parent: Uuid,
    /// Caller-provided identity context (speaker, locale, ...).
    pub identity: Value,
    pub started_at: i64,
    pub last_activity: i64,
    pub turns: u32,
}

/// In-memory record of a workflow session.
#[derive(Debug, Clone)]
pub struct WorkflowSession {
    pub id: Uuid,
    pub parent: Uuid,
    /// Name of the workflow definition driving this session.
    pub workflow_type: String,
    /// The user command that started the workflow.
    pub command: String,
    pub started_at: i64,
    pub last_activity: i64,
    pub current_step: Option<String>,
    /// Accumulated step data, persisted with the session record.
    pub bag: Map<String, Value>,
}

/// Why a workflow session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// The durable record handed back when a session ends.
///
/// Ends are idempotent: ending an already-ended session returns the
/// cached summary unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub kind: SessionKind,
    pub state: SessionState,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_secs: i64,
    /// Kind-specific detail: turn counts, workflow outcome, end reason.
    pub detail: Value,
}

/// Idle timeouts per session kind, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionTimeouts {
    pub general_secs: i64,
    pub conversational_secs: i64,
    pub workflow_secs: i64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            general_secs: 600,
            conversational_secs: 300,
            workflow_secs: 300,
        }
    }
}

impl SessionTimeouts {
    pub fn for_kind(&self, kind: SessionKind) -> i64 {
        match kind {
            SessionKind::General => self.general_secs,
            SessionKind::Conversational => self.conversational_secs,
            SessionKind::Workflow => self.workflow_secs,
        }
    }
}
