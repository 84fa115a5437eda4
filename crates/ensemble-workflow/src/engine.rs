//! The workflow execution engine.
//!
//! One engine drives one workflow session.  It owns the variable bag,
//! executes step actions, applies transitions, and publishes every
//! state change as a bus event.
//!
//! Results are applied through a sequence number: the engine remembers
//! the last applied sequence, and a result at or below it is a no-op.
//! A result delivered twice therefore changes state exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ensemble_bus::{Component, EventBus, EventKind};

use crate::definition::{StepId, WorkflowDefinition};
use crate::error::{WorkflowError, WorkflowResult};
use crate::result::{StepResult, VarBag};
use crate::step::StepKind;

/// Upper bound on consecutive automatic (processing) steps, so a
/// mis-declared loop cannot spin forever.
pub const MAX_AUTO_STEPS: usize = 50;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Created,
    AwaitingInput,
    Processing,
    AwaitingReview,
    Completed,
    Cancelled,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingInput => "awaiting_input",
            Self::Processing => "processing",
            Self::AwaitingReview => "awaiting_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one workflow session from entry step to a terminal state.
pub struct WorkflowEngine {
    definition: Arc<WorkflowDefinition>,
    session_id: Uuid,
    bus: EventBus,
    state: EngineState,
    current: StepId,
    bag: VarBag,
    next_seq: u64,
    last_applied: u64,
}

impl WorkflowEngine {
    /// Build an engine for `session_id` and immediately move it to the
    /// entry step's required state, running any leading processing
    /// chain.
    #[instrument(skip(definition, bus), fields(workflow_type = definition.workflow_type()))]
    pub fn start(
        definition: Arc<WorkflowDefinition>,
        session_id: Uuid,
        bus: EventBus,
    ) -> WorkflowResult<Self> {
        for kind in [
            EventKind::WorkflowStarted,
            EventKind::WorkflowStepAdvanced,
            EventKind::WorkflowAwaitingReview,
            EventKind::WorkflowCompleted,
            EventKind::WorkflowCancelled,
            EventKind::WorkflowFailed,
        ] {
            bus.declare_producer(kind, Component::WorkflowEngine)?;
        }

        let mut engine = Self {
            current: definition.entry(),
            definition,
            session_id,
            bus,
            state: EngineState::Created,
            bag: VarBag::new(),
            next_seq: 0,
            last_applied: 0,
        };

        engine.publish(
            EventKind::WorkflowStarted,
            json!({
                "session_id": engine.session_id,
                "workflow_type": engine.definition.workflow_type(),
                "entry_step": engine.definition.step(engine.current).name,
            }),
        )?;

        engine.enter_current()?;
        info!(session_id = %engine.session_id, state = %engine.state, "workflow engine started");
        Ok(engine)
    }

    // ── operations ───────────────────────────────────────────────────

    /// Run the current input step with `input` and apply its result.
    ///
    /// Returns the result produced for this step (not any processing
    /// step that may have run afterwards).
    #[instrument(skip(self, input), fields(session_id = %self.session_id))]
    pub fn process_input(&mut self, input: Option<&str>) -> WorkflowResult<StepResult> {
        if self.state != EngineState::AwaitingInput {
            return Err(WorkflowError::InvalidState {
                operation: "process input",
                state: self.state,
            });
        }

        let step = self.definition.step(self.current).clone();
        let seq = self.allocate_seq();
        let result = step.run(&mut self.bag, input);
        self.apply(seq, result.clone())?;
        if self.state == EngineState::Processing {
            self.run_processing()?;
        }
        Ok(result)
    }

    /// Read-only look at where the current step's transitions would go
    /// with the bag as it stands.  `None` for terminal positions; an
    /// error when a non-terminal step matches no predicate, which is a
    /// definition bug the caller must surface.
    pub fn peek_next_step(&self) -> WorkflowResult<Option<String>> {
        if self.state.is_terminal() || self.definition.is_terminal(self.current) {
            return Ok(None);
        }
        match self.definition.next_step(self.current, &self.bag) {
            Some(next) => Ok(Some(self.definition.step(next).name.clone())),
            None => Err(WorkflowError::NoTransitionMatched {
                step: self.definition.step(self.current).name.clone(),
            }),
        }
    }

    /// Cancel from any non-terminal state; returns the final summary.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn cancel(&mut self, reason: &str) -> WorkflowResult<Value> {
        if self.state.is_terminal() {
            return Err(WorkflowError::InvalidState {
                operation: "cancel",
                state: self.state,
            });
        }
        let seq = self.allocate_seq();
        self.apply(seq, StepResult::cancel(reason))?;
        Ok(self.summary())
    }

    /// Accept the step under review and continue.
    pub fn approve_step(&mut self) -> WorkflowResult<StepResult> {
        self.resolve_review("approve step", None)
    }

    /// Replace the reviewed step's data, then continue.
    pub fn modify_step(&mut self, new_data: VarBag) -> WorkflowResult<StepResult> {
        self.resolve_review("modify step", Some(new_data))
    }

    /// Reject the step under review, failing the workflow with the
    /// rejection reason preserved.
    pub fn reject_step(&mut self, reason: &str) -> WorkflowResult<StepResult> {
        if self.state != EngineState::AwaitingReview {
            return Err(WorkflowError::InvalidState {
                operation: "reject step",
                state: self.state,
            });
        }
        let step = self.current_step_name().to_owned();
        let result = StepResult::failure(format!("rejected: {reason}"));
        self.record_history(&step, &result);
        self.state = EngineState::Failed;
        warn!(session_id = %self.session_id, step = %step, reason, "review rejected");
        self.publish(
            EventKind::WorkflowFailed,
            json!({
                "session_id": self.session_id,
                "error": format!("rejected: {reason}"),
                "step": step,
            }),
        )?;
        Ok(result)
    }

    /// Mark the workflow failed from outside (e.g. a background run
    /// hitting an interactive step).
    pub fn fail(&mut self, error: &str) -> WorkflowResult<()> {
        if self.state.is_terminal() {
            return Err(WorkflowError::InvalidState {
                operation: "fail",
                state: self.state,
            });
        }
        self.state = EngineState::Failed;
        self.publish(
            EventKind::WorkflowFailed,
            json!({ "session_id": self.session_id, "error": error }),
        )
    }

    // ── accessors ────────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn workflow_type(&self) -> &str {
        self.definition.workflow_type()
    }

    pub fn current_step_name(&self) -> &str {
        &self.definition.step(self.current).name
    }

    /// Prompt to show the user when suspended on an input/review step.
    pub fn prompt(&self) -> Option<&str> {
        self.definition.step(self.current).prompt.as_deref()
    }

    pub fn bag(&self) -> &VarBag {
        &self.bag
    }

    fn steps_completed(&self) -> usize {
        self.bag
            .get("step_history")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// Status snapshot for tooling.
    pub fn status(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "workflow_type": self.definition.workflow_type(),
            "state": self.state,
            "current_step": self.current_step_name(),
            "prompt": self.prompt(),
            "steps_completed": self.steps_completed(),
        })
    }

    /// Final summary: state, progress, and the collected data.
    pub fn summary(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "workflow_type": self.definition.workflow_type(),
            "state": self.state,
            "steps_completed": self.steps_completed(),
            "data": Value::Object(self.bag.clone()),
        })
    }

    // ── internals ────────────────────────────────────────────────────

    fn allocate_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Set the suspension state required by the current step, running a
    /// processing chain to its end.
    fn enter_current(&mut self) -> WorkflowResult<()> {
        match self.definition.step(self.current).kind {
            StepKind::Input => {
                self.state = EngineState::AwaitingInput;
                Ok(())
            }
            StepKind::Review => self.suspend_for_review(),
            StepKind::Processing => {
                self.state = EngineState::Processing;
                self.run_processing()
            }
        }
    }

    /// Execute processing steps until the workflow suspends or ends.
    fn run_processing(&mut self) -> WorkflowResult<()> {
        let mut steps = 0usize;
        while self.state == EngineState::Processing {
            steps += 1;
            if steps > MAX_AUTO_STEPS {
                warn!(session_id = %self.session_id, limit = MAX_AUTO_STEPS,
                      "automatic step limit exceeded");
                self.state = EngineState::Failed;
                self.publish(
                    EventKind::WorkflowFailed,
                    json!({
                        "session_id": self.session_id,
                        "error": format!("automatic step limit of {MAX_AUTO_STEPS} exceeded"),
                    }),
                )?;
                return Err(WorkflowError::StepLimitExceeded {
                    limit: MAX_AUTO_STEPS,
                });
            }

            let step = self.definition.step(self.current).clone();
            let seq = self.allocate_seq();
            let result = step.run(&mut self.bag, None);
            self.apply(seq, result)?;
        }
        Ok(())
    }

    /// Apply a sequenced step result: record it, merge data, resolve
    /// the transition.  Duplicate sequences are ignored.
    fn apply(&mut self, seq: u64, result: StepResult) -> WorkflowResult<()> {
        if seq <= self.last_applied {
            debug!(session_id = %self.session_id, seq, "duplicate step result ignored");
            return Ok(());
        }
        self.last_applied = seq;

        let step_name = self.current_step_name().to_owned();
        self.record_history(&step_name, &result);

        match result {
            StepResult::Success { message, data } => {
                for (key, value) in data {
                    self.bag.insert(key, value);
                }
                if self.definition.is_terminal(self.current) {
                    return self.finish_completed(&message);
                }
                match self.definition.next_step(self.current, &self.bag) {
                    Some(next) => self.advance_to(next, &message),
                    None => {
                        warn!(session_id = %self.session_id, step = %step_name,
                              "no transition matched");
                        self.state = EngineState::Failed;
                        self.publish(
                            EventKind::WorkflowFailed,
                            json!({
                                "session_id": self.session_id,
                                "error": format!("no transition matched from step '{step_name}'"),
                            }),
                        )
                    }
                }
            }
            StepResult::Failure { message } => {
                match self.definition.step(self.current).kind {
                    // Interactive steps stay put so the user can retry.
                    StepKind::Input => {
                        debug!(session_id = %self.session_id, step = %step_name, %message,
                               "step failed, awaiting retry");
                        self.state = EngineState::AwaitingInput;
                        Ok(())
                    }
                    StepKind::Review => {
                        self.state = EngineState::AwaitingReview;
                        Ok(())
                    }
                    // Nobody can retry a processing step.
                    StepKind::Processing => {
                        self.state = EngineState::Failed;
                        self.publish(
                            EventKind::WorkflowFailed,
                            json!({
                                "session_id": self.session_id,
                                "error": message,
                                "step": step_name,
                            }),
                        )
                    }
                }
            }
            StepResult::CancelWorkflow { reason } => {
                self.state = EngineState::Cancelled;
                info!(session_id = %self.session_id, %reason, "workflow cancelled");
                self.publish(
                    EventKind::WorkflowCancelled,
                    json!({
                        "session_id": self.session_id,
                        "reason": reason,
                        "summary": self.summary(),
                    }),
                )
            }
            StepResult::CompleteWorkflow { summary } => self.finish_completed(&summary),
            StepResult::SkipTo { step, message } => match self.definition.step_by_name(&step) {
                Some(target) => self.advance_to(target, &message),
                None => {
                    self.state = EngineState::Failed;
                    self.publish(
                        EventKind::WorkflowFailed,
                        json!({
                            "session_id": self.session_id,
                            "error": format!("skip target '{step}' does not exist"),
                        }),
                    )
                }
            },
        }
    }

    fn advance_to(&mut self, next: StepId, message: &str) -> WorkflowResult<()> {
        let from = self.current_step_name().to_owned();
        self.current = next;
        let to = self.current_step_name().to_owned();

        self.publish(
            EventKind::WorkflowStepAdvanced,
            json!({
                "session_id": self.session_id,
                "from": from,
                "to": to,
                "message": message,
            }),
        )?;

        match self.definition.step(self.current).kind {
            StepKind::Input => {
                self.state = EngineState::AwaitingInput;
                Ok(())
            }
            StepKind::Review => self.suspend_for_review(),
            StepKind::Processing => {
                // The caller's processing loop picks this up.
                self.state = EngineState::Processing;
                Ok(())
            }
        }
    }

    fn suspend_for_review(&mut self) -> WorkflowResult<()> {
        self.state = EngineState::AwaitingReview;
        self.publish(
            EventKind::WorkflowAwaitingReview,
            json!({
                "session_id": self.session_id,
                "step": self.current_step_name(),
                "prompt": self.prompt(),
                "data": Value::Object(self.bag.clone()),
            }),
        )
    }

    fn finish_completed(&mut self, summary_message: &str) -> WorkflowResult<()> {
        self.state = EngineState::Completed;
        info!(session_id = %self.session_id, "workflow completed");
        self.publish(
            EventKind::WorkflowCompleted,
            json!({
                "session_id": self.session_id,
                "message": summary_message,
                "summary": self.summary(),
            }),
        )
    }

    fn resolve_review(
        &mut self,
        operation: &'static str,
        new_data: Option<VarBag>,
    ) -> WorkflowResult<StepResult> {
        if self.state != EngineState::AwaitingReview {
            return Err(WorkflowError::InvalidState {
                operation,
                state: self.state,
            });
        }

        let seq = self.allocate_seq();
        let result = match new_data {
            Some(data) => StepResult::success_with("step modified", data),
            None => {
                let step = self.definition.step(self.current).clone();
                step.run(&mut self.bag, None)
            }
        };
        self.apply(seq, result.clone())?;
        if self.state == EngineState::Processing {
            self.run_processing()?;
        }
        Ok(result)
    }

    fn record_history(&mut self, step: &str, result: &StepResult) {
        let outcome = match result {
            StepResult::Success { .. } => "success",
            StepResult::Failure { .. } => "failure",
            StepResult::CancelWorkflow { .. } => "cancel",
            StepResult::CompleteWorkflow { .. } => "complete",
            StepResult::SkipTo { .. } => "skip",
        };
        let entry = json!({
            "step": step,
            "outcome": outcome,
            "message": result.message(),
            "at": chrono::Utc::now().timestamp(),
        });
        match self.bag.get_mut("step_history").and_then(Value::as_array_mut) {
            Some(history) => history.push(entry),
            None => {
                self.bag.insert("step_history".into(), json!([entry]));
            }
        }
    }

    fn publish(&self, kind: EventKind, payload: Value) -> WorkflowResult<()> {
        self.bus.publish(Component::WorkflowEngine, kind, payload)?;
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("session_id", &self.session_id)
            .field("workflow_type", &self.definition.workflow_type())
            .field("state", &self.state)
            .field("current_step", &self.current_step_name())
            .finish_non_exhaustive()
    }
}

// ── tests ────────────────────────────────────────────────────────────
