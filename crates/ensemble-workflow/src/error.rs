//! Error types for the ensemble-workflow crate.

use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineState;

/// Alias for `Result<T, WorkflowError>`.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors that can occur while building or running workflows.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow definition is structurally invalid.
    #[error("invalid workflow definition: {0}")]
    Definition(String),

    /// A non-terminal step matched none of its transition predicates.
    #[error("no transition matched from step '{step}'")]
    NoTransitionMatched { step: String },

    /// The operation is not valid in the engine's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    /// Too many consecutive automatic steps; the definition likely loops.
    #[error("automatic step limit of {limit} exceeded")]
    StepLimitExceeded { limit: usize },

    /// No workflow definition registered under this name.
    #[error("unknown workflow type: {name}")]
    UnknownWorkflowType { name: String },

    /// A background run reached a step that needs a human.
    #[error("step '{step}' requires interaction, cannot run in background")]
    InteractiveStep { step: String },

    /// No engine registered for this workflow session.
    #[error("no engine for workflow session {session}")]
    EngineNotFound { session: Uuid },

    /// Event publication failed.
    #[error(transparent)]
    Bus(#[from] ensemble_bus::BusError),
}
