//! # ensemble-bus
//!
//! In-process event bus for Ensemble.
//!
//! Design points:
//!
//! - **Closed event vocabulary** — [`EventKind`] is an enum, so the set
//!   of event types is known at compile time.
//! - **Single authorized producer** — each kind is owned by exactly one
//!   [`Component`]; a publish from anyone else is rejected before any
//!   subscriber runs.
//! - **Synchronous, ordered delivery** — `publish` calls every handler
//!   in subscription order before returning; a failing or panicking
//!   handler is logged and skipped, never fatal.  Panic isolation
//!   relies on unwinding and is inert under `panic = "abort"`.
//! - **Bounded history** — a ring of recent events for diagnostics,
//!   separate from delivery.

pub mod bus;
pub mod error;
pub mod event;

// ── re-exports ───────────────────────────────────────────────────────

pub use bus::{DEFAULT_HISTORY_CAPACITY, EventBus, HandlerResult, KindStats, SubscriptionToken};
pub use error::{BusError, BusResult};
pub use event::{Component, Event, EventKind};
