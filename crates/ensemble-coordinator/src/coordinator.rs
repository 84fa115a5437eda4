//! The orchestration coordinator.
//!
//! One entry point for user input: publish `INPUT_RECEIVED`, then route.
//! An active workflow session gets the input as a step answer; an active
//! conversational session gets a dialogue turn; otherwise the classifier
//! decides which kind of child session to open under the current (or a
//! fresh) general session.
//!
//! The coordinator also keeps session and workflow lifecycles converged:
//! terminal workflow events end the matching workflow session.  The bus
//! handler only hands the event to an async task over a channel, so bus
//! delivery stays synchronous and short.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ensemble_bridge::ToolServer;
use ensemble_bus::{Component, EventBus, EventKind};
use ensemble_session::{SessionError, SessionKind, SessionManager, Trigger, WorkflowOutcome};
use ensemble_workflow::{
    EngineRegistry, EngineState, StepResult, VarBag, WorkflowCatalog, WorkflowEngine,
};

use crate::config::CoreConfig;
use crate::error::{CoordError, CoordResult};
use crate::routing::{IntentClassifier, RouteDecision};

/// Produces the reply for conversational turns.  The real collaborator
/// talks to a language model; tests use a canned implementation.
#[async_trait]
pub trait ConversationalReply: Send + Sync {
    async fn reply(&self, cs: Uuid, input: &str) -> anyhow::Result<String>;
}

/// What one call to [`Coordinator::handle_input`] produced.
#[derive(Debug)]
pub enum InputOutcome {
    /// A conversational reply from the dialogue path.
    Reply { session_id: Uuid, text: String },
    /// A new workflow session was opened for the input.
    WorkflowStarted {
        session_id: Uuid,
        state: EngineState,
        step: String,
        prompt: Option<String>,
    },
    /// The input was fed to an already-running workflow.
    WorkflowAdvanced {
        session_id: Uuid,
        state: EngineState,
        result: StepResult,
        prompt: Option<String>,
    },
}

/// Wires the bus, sessions, workflows and the tool bridge together.
pub struct Coordinator {
    bus: EventBus,
    sessions: Arc<SessionManager>,
    workflows: Arc<WorkflowCatalog>,
    engines: Arc<EngineRegistry>,
    server: Arc<ToolServer>,
    classifier: Box<dyn IntentClassifier>,
    conversation: Box<dyn ConversationalReply>,
}

impl Coordinator {
    /// Build the coordinator, claim `INPUT_RECEIVED` on the bus, and
    /// spawn the lifecycle-convergence task.  Must be called from within
    /// a tokio runtime.
    pub fn new(
        bus: EventBus,
        sessions: Arc<SessionManager>,
        workflows: Arc<WorkflowCatalog>,
        engines: Arc<EngineRegistry>,
        classifier: Box<dyn IntentClassifier>,
        conversation: Box<dyn ConversationalReply>,
    ) -> CoordResult<Self> {
        bus.declare_producer(EventKind::InputReceived, Component::Coordinator)?;

        let server = Arc::new(ToolServer::new(
            bus.clone(),
            Arc::clone(&sessions),
            Arc::clone(&engines),
            Arc::clone(&workflows),
        ));

        Self::spawn_convergence(&bus, Arc::clone(&sessions), Arc::clone(&engines));

        Ok(Self {
            bus,
            sessions,
            workflows,
            engines,
            server,
            classifier,
            conversation,
        })
    }

    /// The tool surface for an advisor, sharing this coordinator's
    /// sessions and engines.
    pub fn tool_server(&self) -> Arc<ToolServer> {
        Arc::clone(&self.server)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    /// Spawn the background session sweep: idle sessions time out and
    /// old ended sessions are compacted per the retention window.
    pub fn spawn_maintenance(&self, config: &CoreConfig) -> tokio::task::JoinHandle<()> {
        ensemble_session::spawn_timeout_sweep(
            Arc::clone(&self.sessions),
            config.sweep_interval(),
            config.log_retention(),
        )
    }

    // ── input handling ───────────────────────────────────────────────

    /// Route one piece of user input.
    #[instrument(skip(self, input))]
    pub async fn handle_input(&self, input: &str) -> CoordResult<InputOutcome> {
        self.bus.publish(
            Component::Coordinator,
            EventKind::InputReceived,
            json!({ "text": input }),
        )?;

        let gs = match self.sessions.current_general().await {
            Some(gs) => gs,
            None => self.sessions.start_general_session(Trigger::Manual).await?,
        };
        self.sessions.record_interaction(gs, "user", input).await?;

        match self.sessions.get_active_child(gs).await? {
            Some((SessionKind::Workflow, ws)) => self.continue_workflow(ws, input).await,
            Some((SessionKind::Conversational, cs)) => self.converse(gs, cs, input).await,
            // A general session is never its own child; treat like no child.
            Some((SessionKind::General, _)) | None => match self.classifier.classify(input) {
                RouteDecision::Conversation => {
                    let cs = self
                        .sessions
                        .create_conversational_session(gs, json!({}))
                        .await?;
                    self.converse(gs, cs, input).await
                }
                RouteDecision::Task { workflow_type } => {
                    self.start_task(gs, &workflow_type, input).await
                }
            },
        }
    }

    async fn continue_workflow(&self, ws: Uuid, input: &str) -> CoordResult<InputOutcome> {
        let handle = self.engines.get(ws)?;
        let (result, state, step, prompt, bag) = {
            let mut engine = handle.lock().await;
            let result = engine.process_input(Some(input))?;
            (
                result,
                engine.state(),
                engine.current_step_name().to_owned(),
                engine.prompt().map(str::to_owned),
                engine.bag().clone(),
            )
        };
        self.persist_progress(ws, step, bag).await?;

        debug!(session_id = %ws, %state, "workflow consumed input");
        Ok(InputOutcome::WorkflowAdvanced {
            session_id: ws,
            state,
            result,
            prompt,
        })
    }

    async fn converse(&self, gs: Uuid, cs: Uuid, input: &str) -> CoordResult<InputOutcome> {
        self.sessions.record_turn(cs).await?;
        let text = self
            .conversation
            .reply(cs, input)
            .await
            .map_err(CoordError::Conversation)?;
        self.sessions.record_interaction(gs, "assistant", &text).await?;
        Ok(InputOutcome::Reply {
            session_id: cs,
            text,
        })
    }

    async fn start_task(
        &self,
        gs: Uuid,
        workflow_type: &str,
        command: &str,
    ) -> CoordResult<InputOutcome> {
        let definition = self.workflows.get(workflow_type)?;
        let ws = self
            .sessions
            .create_workflow_session(gs, workflow_type, command, VarBag::new())
            .await?;

        let engine = match WorkflowEngine::start(definition, ws, self.bus.clone()) {
            Ok(engine) => engine,
            Err(err) => {
                let _ = self
                    .sessions
                    .end_workflow_session(ws, WorkflowOutcome::Failed)
                    .await;
                return Err(err.into());
            }
        };

        let state = engine.state();
        let step = engine.current_step_name().to_owned();
        let prompt = engine.prompt().map(str::to_owned);
        let bag = engine.bag().clone();
        self.engines.insert(ws, engine);
        if state.is_terminal() {
            self.engines.remove(ws);
        }
        self.persist_progress(ws, step.clone(), bag).await?;

        info!(session_id = %ws, %workflow_type, %state, "workflow routed from input");
        Ok(InputOutcome::WorkflowStarted {
            session_id: ws,
            state,
            step,
            prompt,
        })
    }

    /// The session may already be ended by the convergence task when the
    /// workflow just reached a terminal state; that is not an error.
    async fn persist_progress(&self, ws: Uuid, step: String, bag: VarBag) -> CoordResult<()> {
        match self
            .sessions
            .record_workflow_progress(ws, Some(step), bag)
            .await
        {
            Ok(()) | Err(SessionError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    // ── lifecycle convergence ────────────────────────────────────────

    fn spawn_convergence(
        bus: &EventBus,
        sessions: Arc<SessionManager>,
        engines: Arc<EngineRegistry>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(EventKind, Uuid)>();

        for kind in [
            EventKind::WorkflowCompleted,
            EventKind::WorkflowCancelled,
            EventKind::WorkflowFailed,
        ] {
            let tx = tx.clone();
            bus.subscribe(kind, move |event| {
                let ws = event
                    .payload
                    .get("session_id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok());
                if let Some(ws) = ws {
                    let _ = tx.send((event.kind, ws));
                }
                Ok(())
            });
        }

        tokio::spawn(async move {
            while let Some((kind, ws)) = rx.recv().await {
                let outcome = match kind {
                    EventKind::WorkflowCompleted => WorkflowOutcome::Completed,
                    EventKind::WorkflowCancelled => WorkflowOutcome::Cancelled,
                    _ => WorkflowOutcome::Failed,
                };
                engines.remove(ws);
                match sessions.end_workflow_session(ws, outcome).await {
                    Ok(summary) => {
                        debug!(session_id = %ws, ?outcome, state = %summary.state,
                               "workflow session converged");
                    }
                    // Already ended elsewhere, or never made it to a session.
                    Err(SessionError::NotFound { .. }) => {}
                    Err(err) => {
                        warn!(session_id = %ws, %err, "failed to end workflow session");
                    }
                }
            }
        });
    }
}

// ── tests ────────────────────────────────────────────────────────────
