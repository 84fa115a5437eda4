//! Error types for the ensemble-session crate.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{SessionKind, Trigger};

/// Alias for `Result<T, SessionError>`.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A general session is already active and the trigger does not
    /// allow replacing it.
    #[error("general session {active} is already active; trigger {trigger:?} cannot replace it")]
    InvalidTrigger { trigger: Trigger, active: Uuid },

    /// The general session already has an active child session.
    #[error("general session {general} already has an active {existing_kind} session {existing}")]
    SessionConflict {
        general: Uuid,
        existing_kind: SessionKind,
        existing: Uuid,
    },

    /// The requested session does not exist (and has no cached summary).
    #[error("session not found: {id}")]
    NotFound { id: Uuid },

    /// The operation is not valid for the session's current state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Persistence failed; the in-memory mutation was rolled back.
    #[error(transparent)]
    Store(#[from] ensemble_store::StoreError),

    /// Event publication failed.
    #[error(transparent)]
    Bus(#[from] ensemble_bus::BusError),
}
