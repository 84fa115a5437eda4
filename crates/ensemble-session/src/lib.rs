//! # ensemble-session
//!
//! Three-tier session hierarchy for Ensemble.
//!
//! A **general session** (GS) is the umbrella for one user engagement.
//! Under it lives at most one active child at a time: a
//! **conversational session** (CS) for free-form dialogue or a
//! **workflow session** (WS) for a structured task.  Children never
//! outlive their parent.
//!
//! Every lifecycle transition is an all-or-nothing unit — in-memory
//! mutation, persistence through [`ensemble_store`], and exactly one
//! lifecycle event on the bus.  If persistence fails, memory is rolled
//! back and no event is published.

pub mod error;
pub mod manager;
pub mod timeout;
pub mod types;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{SessionError, SessionResult};
pub use manager::SessionManager;
pub use timeout::spawn_timeout_sweep;
pub use types::{
    ConversationalSession, GeneralSession, Interaction, SessionKind, SessionState,
    SessionSummary, SessionTimeouts, Trigger, WorkflowOutcome, WorkflowSession,
};
