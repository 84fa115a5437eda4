//! Workflow definitions.
//!
//! A definition is an arena of steps plus, per step, an ordered list of
//! guarded transitions.  Built once through [`DefinitionBuilder`] and
//! validated before use; after that it is immutable and shared.
//!
//! Transition resolution is first-match-wins in declaration order.  A
//! step with no outgoing transitions is terminal.

use std::sync::Arc;

use crate::error::{WorkflowError, WorkflowResult};
use crate::result::VarBag;
use crate::step::Step;

/// Index into a definition's step arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

/// Guard on a transition, evaluated against the variable bag.
pub type Predicate = Arc<dyn Fn(&VarBag) -> bool + Send + Sync>;

/// A predicate that always matches — the unconditional "next" edge.
pub fn always() -> Predicate {
    Arc::new(|_| true)
}

/// Matches when `bag[key] == value`.
pub fn when_eq(key: impl Into<String>, value: serde_json::Value) -> Predicate {
    let key = key.into();
    Arc::new(move |bag| bag.get(&key) == Some(&value))
}

struct Transition {
    when: Predicate,
    to: StepId,
}

/// An immutable, validated workflow definition.
pub struct WorkflowDefinition {
    workflow_type: String,
    description: String,
    steps: Vec<Step>,
    /// Outgoing transitions per step, in declaration order.
    transitions: Vec<Vec<Transition>>,
    entry: StepId,
}

impl WorkflowDefinition {
    pub fn builder(workflow_type: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder {
            workflow_type: workflow_type.into(),
            description: String::new(),
            steps: Vec::new(),
            transitions: Vec::new(),
            entry: None,
        }
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[id.0]
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step_by_name(&self, name: &str) -> Option<StepId> {
        self.steps.iter().position(|s| s.name == name).map(StepId)
    }

    /// A terminal step has no outgoing transitions.
    pub fn is_terminal(&self, id: StepId) -> bool {
        self.transitions[id.0].is_empty()
    }

    /// First transition whose predicate matches the bag, in declaration
    /// order.  `None` means no predicate matched (a definition error
    /// for non-terminal steps — terminal steps have no transitions to
    /// match).
    pub fn next_step(&self, from: StepId, bag: &VarBag) -> Option<StepId> {
        self.transitions[from.0]
            .iter()
            .find(|t| (t.when)(bag))
            .map(|t| t.to)
    }

    fn validate(&self) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::Definition("definition has no steps".into()));
        }

        // Duplicate names would make SkipTo and status reporting ambiguous.
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(WorkflowError::Definition(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        // Some terminal step must be reachable from the entry, otherwise
        // the workflow can never complete.
        let mut visited = vec![false; self.steps.len()];
        let mut stack = vec![self.entry.0];
        let mut terminal_reachable = false;
        while let Some(ix) = stack.pop() {
            if visited[ix] {
                continue;
            }
            visited[ix] = true;
            if self.transitions[ix].is_empty() {
                terminal_reachable = true;
            }
            for t in &self.transitions[ix] {
                stack.push(t.to.0);
            }
        }
        if !terminal_reachable {
            return Err(WorkflowError::Definition(format!(
                "no terminal step reachable from entry '{}'",
                self.steps[self.entry.0].name
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("workflow_type", &self.workflow_type)
            .field("steps", &self.steps.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`WorkflowDefinition`].
pub struct DefinitionBuilder {
    workflow_type: String,
    description: String,
    steps: Vec<Step>,
    transitions: Vec<Vec<Transition>>,
    entry: Option<StepId>,
}

impl DefinitionBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a step, returning its id for wiring transitions.  The first
    /// step added becomes the entry unless [`Self::entry`] overrides it.
    pub fn step(&mut self, step: Step) -> StepId {
        let id = StepId(self.steps.len());
        self.steps.push(step);
        self.transitions.push(Vec::new());
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    pub fn entry(&mut self, id: StepId) {
        self.entry = Some(id);
    }

    /// Add a guarded transition.  Declaration order is evaluation order.
    pub fn transition(&mut self, from: StepId, to: StepId, when: Predicate) {
        self.transitions[from.0].push(Transition { when, to });
    }

    /// Unconditional transition, usually declared last.
    pub fn next(&mut self, from: StepId, to: StepId) {
        self.transition(from, to, always());
    }

    pub fn build(self) -> WorkflowResult<WorkflowDefinition> {
        let entry = self
            .entry
            .ok_or_else(|| WorkflowError::Definition("definition has no entry step".into()))?;
        let definition = WorkflowDefinition {
            workflow_type: self.workflow_type,
            description: self.description,
            steps: self.steps,
            transitions: self.transitions,
            entry,
        };
        definition.validate()?;
        Ok(definition)
    }
}

// ── tests ────────────────────────────────────────────────────────────
