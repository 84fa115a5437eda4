//! Background workflow execution.
//!
//! Non-interactive workflows can run unattended: processing chains
//! execute inside the engine as usual, and the runner only checks that
//! the workflow never stops to ask a human anything.  Hitting an input
//! or review step in background mode fails the run.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::engine::EngineState;
use crate::error::{WorkflowError, WorkflowResult};
use crate::registry::EngineHandle;

/// Bound on observation iterations before giving up on a run that
/// never reaches a terminal state.
pub const MAX_BACKGROUND_ITERATIONS: usize = 100;

/// Drive `engine` to a terminal state without user interaction.
#[instrument(skip(engine))]
pub async fn run_to_completion(engine: EngineHandle) -> WorkflowResult<EngineState> {
    for _ in 0..MAX_BACKGROUND_ITERATIONS {
        {
            let mut engine = engine.lock().await;
            let state = engine.state();
            match state {
                EngineState::Completed | EngineState::Cancelled | EngineState::Failed => {
                    info!(session_id = %engine.session_id(), state = %state,
                          "background workflow finished");
                    return Ok(state);
                }
                EngineState::AwaitingInput | EngineState::AwaitingReview => {
                    let step = engine.current_step_name().to_owned();
                    warn!(session_id = %engine.session_id(), %step,
                          "background workflow reached an interactive step");
                    engine.fail(&format!(
                        "step '{step}' requires interaction, cannot run in background"
                    ))?;
                    return Err(WorkflowError::InteractiveStep { step });
                }
                // Transient; the engine is being driven elsewhere.
                EngineState::Created | EngineState::Processing => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(WorkflowError::StepLimitExceeded {
        limit: MAX_BACKGROUND_ITERATIONS,
    })
}

/// Spawn [`run_to_completion`] on its own task.
pub fn spawn_background(engine: EngineHandle) -> JoinHandle<WorkflowResult<EngineState>> {
    tokio::spawn(run_to_completion(engine))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ensemble_bus::{EventBus, EventKind};
    use serde_json::json;
    use uuid::Uuid;

    use crate::definition::WorkflowDefinition;
    use crate::engine::WorkflowEngine;
    use crate::registry::EngineRegistry;
    use crate::result::StepResult;
    use crate::templates::{compute, computed_value, prompt_input};

    use super::*;

    #[tokio::test]
    async fn processing_only_workflow_completes_in_background() {
        let mut builder = WorkflowDefinition::builder("batch");
        let first = builder.step(compute("first", |_| {
            computed_value("partial", json!(1), "first done")
        }));
        let second = builder.step(compute("second", |_| StepResult::complete("all done")));
        builder.next(first, second);
        let definition = Arc::new(builder.build().unwrap());

        let session_id = Uuid::now_v7();
        let engine =
            WorkflowEngine::start(definition, session_id, EventBus::default()).unwrap();
        let registry = EngineRegistry::new();
        let handle = registry.insert(session_id, engine);

        let state = run_to_completion(handle).await.unwrap();
        assert_eq!(state, EngineState::Completed);
    }

    #[tokio::test]
    async fn interactive_step_fails_the_background_run() {
        let mut builder = WorkflowDefinition::builder("needs_human");
        let ask = builder.step(prompt_input("ask", "Tell me something", "text"));
        let done = builder.step(compute("done", |_| StepResult::complete("done")));
        builder.next(ask, done);
        let definition = Arc::new(builder.build().unwrap());

        let bus = EventBus::default();
        let failed = Arc::new(std::sync::Mutex::new(0u32));
        {
            let failed = Arc::clone(&failed);
            bus.subscribe(EventKind::WorkflowFailed, move |_| {
                *failed.lock().unwrap() += 1;
                Ok(())
            });
        }

        let session_id = Uuid::now_v7();
        let engine = WorkflowEngine::start(definition, session_id, bus).unwrap();
        let registry = EngineRegistry::new();
        let handle = registry.insert(session_id, engine);

        let err = run_to_completion(Arc::clone(&handle)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InteractiveStep { .. }));
        assert_eq!(handle.lock().await.state(), EngineState::Failed);
        assert_eq!(*failed.lock().unwrap(), 1);
    }
}
