//! # ensemble-workflow
//!
//! Workflow definitions and the execution engine for Ensemble.
//!
//! A [`WorkflowDefinition`] is a validated graph of typed steps (input,
//! processing, review) with ordered, guarded transitions; resolution is
//! first-match-wins in declaration order, and a step with no outgoing
//! transitions is terminal.  A [`WorkflowEngine`] drives one workflow
//! session through that graph, publishing every state change on the
//! event bus and applying step results idempotently.
//!
//! Supporting pieces: reusable step [`templates`], the
//! [`WorkflowCatalog`] of named definitions, the per-session
//! [`EngineRegistry`], and the background [`runner`].

pub mod catalog;
pub mod definition;
pub mod engine;
pub mod error;
pub mod registry;
pub mod result;
pub mod runner;
pub mod step;
pub mod templates;

// ── re-exports ───────────────────────────────────────────────────────

pub use catalog::WorkflowCatalog;
pub use definition::{DefinitionBuilder, Predicate, StepId, WorkflowDefinition, always, when_eq};
pub use engine::{EngineState, MAX_AUTO_STEPS, WorkflowEngine};
pub use error::{WorkflowError, WorkflowResult};
pub use registry::{EngineHandle, EngineRegistry};
pub use result::{StepResult, VarBag};
pub use runner::{MAX_BACKGROUND_ITERATIONS, run_to_completion, spawn_background};
pub use step::{Step, StepAction, StepKind};
