//! Error types for the ensemble-coordinator crate.

use thiserror::Error;

/// Alias for `Result<T, CoordError>`.
pub type CoordResult<T> = Result<T, CoordError>;

/// Errors that can occur in the coordinator.
#[derive(Debug, Error)]
pub enum CoordError {
    /// A classifier pattern failed to compile.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Could not read a configuration file.
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Could not parse a configuration file.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The conversational collaborator failed to produce a reply.
    #[error("conversational reply failed: {0}")]
    Conversation(#[source] anyhow::Error),

    /// Session operation failed.
    #[error(transparent)]
    Session(#[from] ensemble_session::SessionError),

    /// Workflow operation failed.
    #[error(transparent)]
    Workflow(#[from] ensemble_workflow::WorkflowError),

    /// Event publication failed.
    #[error(transparent)]
    Bus(#[from] ensemble_bus::BusError),
}
