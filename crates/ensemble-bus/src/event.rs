//! Event types that flow through the bus.
//!
//! The set of event kinds is closed: adding a new kind means adding a
//! variant here, which forces every exhaustive `match` in the system to
//! be revisited.  Payloads are JSON so producers can attach structured
//! context without the bus knowing their schemas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Every kind of event the system can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionStarted,
    SessionEnded,
    WorkflowStarted,
    WorkflowStepAdvanced,
    WorkflowAwaitingReview,
    WorkflowCompleted,
    WorkflowCancelled,
    WorkflowFailed,
    InputReceived,
}

impl EventKind {
    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "SESSION_STARTED",
            Self::SessionEnded => "SESSION_ENDED",
            Self::WorkflowStarted => "WORKFLOW_STARTED",
            Self::WorkflowStepAdvanced => "WORKFLOW_STEP_ADVANCED",
            Self::WorkflowAwaitingReview => "WORKFLOW_AWAITING_REVIEW",
            Self::WorkflowCompleted => "WORKFLOW_COMPLETED",
            Self::WorkflowCancelled => "WORKFLOW_CANCELLED",
            Self::WorkflowFailed => "WORKFLOW_FAILED",
            Self::InputReceived => "INPUT_RECEIVED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Components that can produce events.  Each [`EventKind`] is owned by
/// exactly one component, registered up front on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    SessionManager,
    WorkflowEngine,
    ToolBridge,
    Coordinator,
    /// Stand-in producer for unit tests.
    Test,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SessionManager => "session_manager",
            Self::WorkflowEngine => "workflow_engine",
            Self::ToolBridge => "tool_bridge",
            Self::Coordinator => "coordinator",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// A single published event.  Immutable after publication; subscribers
/// share one allocation via `Arc<Event>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: Uuid,
    pub kind: EventKind,
    /// The component that published the event.
    pub source: Component,
    /// Structured, producer-defined context.
    pub payload: Value,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub(crate) fn new(kind: EventKind, source: Component, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            source,
            payload,
            timestamp: Utc::now(),
        }
    }
}
