//! Step outcomes.
//!
//! Every step execution produces exactly one [`StepResult`].  The
//! engine applies results through a sequence number so a result
//! delivered twice changes state only once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The variable bag a workflow accumulates as it runs.
pub type VarBag = Map<String, Value>;

/// Outcome of running one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepResult {
    /// The step finished; `data` is merged into the variable bag before
    /// the transition is evaluated.
    Success { message: String, data: VarBag },
    /// The step could not complete with the given input.  The workflow
    /// stays on the current step so the user can retry.
    Failure { message: String },
    /// Abort the whole workflow.
    CancelWorkflow { reason: String },
    /// Finish the whole workflow early, skipping remaining steps.
    CompleteWorkflow { summary: String },
    /// Jump to a named step, bypassing transition predicates.
    SkipTo { step: String, message: String },
}

impl StepResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
            data: VarBag::new(),
        }
    }

    pub fn success_with(message: impl Into<String>, data: VarBag) -> Self {
        Self::Success {
            message: message.into(),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::CancelWorkflow {
            reason: reason.into(),
        }
    }

    pub fn complete(summary: impl Into<String>) -> Self {
        Self::CompleteWorkflow {
            summary: summary.into(),
        }
    }

    pub fn skip_to(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SkipTo {
            step: step.into(),
            message: message.into(),
        }
    }

    /// The human-readable message carried by any variant.
    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. }
            | Self::Failure { message }
            | Self::SkipTo { message, .. } => message,
            Self::CancelWorkflow { reason } => reason,
            Self::CompleteWorkflow { summary } => summary,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}
