//! Error types for the ensemble-bridge crate.

use thiserror::Error;

/// Alias for `Result<T, BridgeError>`.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while handling tool requests.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The requested tool is not in the catalog.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// The arguments do not match the tool's parameter schema.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Workflow tools need an active general session to attach to.
    #[error("no active general session")]
    NoGeneralSession,

    /// Session operation failed.
    #[error(transparent)]
    Session(#[from] ensemble_session::SessionError),

    /// Workflow operation failed.
    #[error(transparent)]
    Workflow(#[from] ensemble_workflow::WorkflowError),
}
