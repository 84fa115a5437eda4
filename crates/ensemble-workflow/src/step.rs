//! Workflow steps.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::result::{StepResult, VarBag};

/// How a step interacts with the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Suspends the workflow until user input arrives.
    Input,
    /// Runs to completion without suspension.
    Processing,
    /// Suspends the workflow until an explicit approve/modify/reject.
    Review,
}

/// The logic a step executes.  Receives the variable bag and, for input
/// steps, the user's text.
pub type StepAction = Arc<dyn Fn(&mut VarBag, Option<&str>) -> StepResult + Send + Sync>;

/// One step in a workflow definition.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    /// What to show the user when the workflow suspends on this step.
    pub prompt: Option<String>,
    action: StepAction,
}

impl Step {
    pub fn new(
        name: impl Into<String>,
        kind: StepKind,
        prompt: Option<String>,
        action: StepAction,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            prompt,
            action,
        }
    }

    pub(crate) fn run(&self, bag: &mut VarBag, input: Option<&str>) -> StepResult {
        (self.action)(bag, input)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}
