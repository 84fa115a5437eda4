//! Error types for the ensemble-bus crate.

use thiserror::Error;

use crate::event::{Component, EventKind};

/// Alias for `Result<T, BusError>`.
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur on the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A component tried to publish an event kind it does not own.
    #[error("{source_component} is not the registered producer for {kind} (registered: {registered})")]
    UnauthorizedProducer {
        kind: EventKind,
        source_component: Component,
        registered: Component,
    },

    /// An event kind was published before any producer was registered for it.
    #[error("no producer registered for {kind}")]
    UnknownProducer { kind: EventKind },

    /// A second component tried to register as producer for an already-owned kind.
    #[error("{kind} is already owned by {registered}, cannot re-register for {attempted}")]
    ProducerConflict {
        kind: EventKind,
        registered: Component,
        attempted: Component,
    },
}
