//! # ensemble-coordinator
//!
//! The orchestration layer of Ensemble: runtime [`config`], intent
//! [`routing`], and the [`Coordinator`] that turns raw user input into
//! session and workflow activity while keeping their lifecycles
//! converged.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod routing;

// ── re-exports ───────────────────────────────────────────────────────

pub use config::{BusConfig, CoreConfig, LogConfig, SessionConfig};
pub use coordinator::{ConversationalReply, Coordinator, InputOutcome};
pub use error::{CoordError, CoordResult};
pub use routing::{IntentClassifier, KeywordClassifier, RouteDecision};
