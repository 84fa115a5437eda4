//! The tool server.
//!
//! Owns the immutable tool catalog, validates every request against its
//! schema before touching anything, and dispatches valid calls into the
//! session manager and the engine registry.  A validation failure
//! produces an error response and zero side effects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use ensemble_bus::EventBus;
use ensemble_session::{SessionError, SessionManager, WorkflowOutcome};
use ensemble_workflow::{EngineRegistry, VarBag, WorkflowCatalog, WorkflowEngine};

use crate::error::{BridgeError, BridgeResult};
use crate::tool::{Tool, ToolName, ToolRequest, ToolResponse, catalog};

/// How many recent calls the diagnostic ring keeps.
const RECENT_CALLS: usize = 50;

/// One entry in the recent-call ring.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub tool: String,
    pub success: bool,
    pub at: i64,
}

/// Serves the tool catalog over whatever transport the caller wires up.
pub struct ToolServer {
    tools: Vec<Tool>,
    bus: EventBus,
    sessions: Arc<SessionManager>,
    engines: Arc<EngineRegistry>,
    workflows: Arc<WorkflowCatalog>,
    recent: Mutex<VecDeque<CallRecord>>,
}

impl ToolServer {
    pub fn new(
        bus: EventBus,
        sessions: Arc<SessionManager>,
        engines: Arc<EngineRegistry>,
        workflows: Arc<WorkflowCatalog>,
    ) -> Self {
        Self {
            tools: catalog(),
            bus,
            sessions,
            engines,
            workflows,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CALLS)),
        }
    }

    /// Advisor-facing specs for every tool.
    pub fn list_tools(&self) -> Vec<Value> {
        self.tools.iter().map(Tool::to_advisor_spec).collect()
    }

    /// Validate and execute one tool request.
    ///
    /// Never panics and never returns a transport-level error: every
    /// outcome is a [`ToolResponse`].
    #[instrument(skip(self, request), fields(tool = %request.tool))]
    pub async fn handle_request(&self, request: ToolRequest) -> ToolResponse {
        let Some(tool) = self.tools.iter().find(|t| t.name.as_str() == request.tool) else {
            warn!(tool = %request.tool, "unknown tool requested");
            self.record(&request.tool, false);
            let err = BridgeError::UnknownTool {
                name: request.tool.clone(),
            };
            return ToolResponse::err(err.to_string());
        };

        if let Err(message) = tool.validate(&request.arguments) {
            debug!(tool = %request.tool, %message, "tool request failed validation");
            self.record(&request.tool, false);
            return ToolResponse::err(message);
        }

        let response = match self.dispatch(tool.name, &request.arguments).await {
            Ok(value) => ToolResponse::ok(value),
            Err(err) => {
                warn!(tool = %request.tool, %err, "tool dispatch failed");
                ToolResponse::err(err.to_string())
            }
        };
        self.record(&request.tool, response.success);
        response
    }

    /// Recent calls, oldest first.
    pub fn recent_calls(&self) -> Vec<CallRecord> {
        self.recent.lock().expect("recent lock poisoned").iter().cloned().collect()
    }

    // ── dispatch ─────────────────────────────────────────────────────

    async fn dispatch(&self, name: ToolName, args: &Map<String, Value>) -> BridgeResult<Value> {
        match name {
            ToolName::StartWorkflow => self.start_workflow(args).await,
            ToolName::ProvideWorkflowInput => self.provide_workflow_input(args).await,
            ToolName::GetWorkflowStatus => self.get_workflow_status(args).await,
            ToolName::CancelWorkflow => self.cancel_workflow(args).await,
            ToolName::ReviewStep => self.review_step(args).await,
            ToolName::ListActiveWorkflows => self.list_active_workflows().await,
        }
    }

    async fn start_workflow(&self, args: &Map<String, Value>) -> BridgeResult<Value> {
        let workflow_type = get_str(args, "workflow_type")?;
        let command = get_str(args, "command")?;
        let initial: VarBag = args
            .get("initial_data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let definition = self.workflows.get(workflow_type)?;
        let gs = self
            .sessions
            .current_general()
            .await
            .ok_or(BridgeError::NoGeneralSession)?;
        let ws = self
            .sessions
            .create_workflow_session(gs, workflow_type, command, initial)
            .await?;

        let engine = match WorkflowEngine::start(definition, ws, self.bus.clone()) {
            Ok(engine) => engine,
            Err(err) => {
                // The session must not outlive its failed engine.
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

        Ok(json!({
            "session_id": ws,
            "state": state,
            "current_step": step,
            "prompt": prompt,
        }))
    }

    async fn provide_workflow_input(&self, args: &Map<String, Value>) -> BridgeResult<Value> {
        let ws = get_session_id(args)?;
        let input = get_str(args, "user_input")?;

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
        self.persist_progress(ws, step.clone(), bag).await?;

        Ok(json!({
            "result": result,
            "state": state,
            "current_step": step,
            "prompt": prompt,
        }))
    }

    async fn get_workflow_status(&self, args: &Map<String, Value>) -> BridgeResult<Value> {
        let ws = get_session_id(args)?;
        let handle = self.engines.get(ws)?;
        let status = handle.lock().await.status();
        Ok(status)
    }

    async fn cancel_workflow(&self, args: &Map<String, Value>) -> BridgeResult<Value> {
        let ws = get_session_id(args)?;
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("cancelled via tool");

        let handle = self.engines.get(ws)?;
        let summary = handle.lock().await.cancel(reason)?;
        Ok(json!({ "session_id": ws, "summary": summary }))
    }

    async fn review_step(&self, args: &Map<String, Value>) -> BridgeResult<Value> {
        let ws = get_session_id(args)?;
        let decision = get_str(args, "decision")?;

        let handle = self.engines.get(ws)?;
        let (result, state, step, bag) = {
            let mut engine = handle.lock().await;
            let result = match decision {
                "approve" => engine.approve_step()?,
                "modify" => {
                    let modifications: VarBag = args
                        .get("modifications")
                        .and_then(Value::as_object)
                        .cloned()
                        .ok_or_else(|| {
                            BridgeError::InvalidParams(
                                "decision 'modify' requires 'modifications'".into(),
                            )
                        })?;
                    engine.modify_step(modifications)?
                }
                "reject" => {
                    let reason = args
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("rejected in review");
                    engine.reject_step(reason)?
                }
                // The schema's enum check makes this unreachable.
                other => {
                    return Err(BridgeError::InvalidParams(format!(
                        "unsupported decision '{other}'"
                    )));
                }
            };
            (
                result,
                engine.state(),
                engine.current_step_name().to_owned(),
                engine.bag().clone(),
            )
        };
        self.persist_progress(ws, step.clone(), bag).await?;

        Ok(json!({
            "result": result,
            "state": state,
            "current_step": step,
        }))
    }

    async fn list_active_workflows(&self) -> BridgeResult<Value> {
        let mut workflows = Vec::new();
        for ws in self.engines.active_sessions() {
            if let Ok(handle) = self.engines.get(ws) {
                workflows.push(handle.lock().await.status());
            }
        }
        Ok(json!({ "count": workflows.len(), "workflows": workflows }))
    }

    // ── helpers ──────────────────────────────────────────────────────

    /// Persist engine progress onto the workflow session.  The session
    /// may already be gone if the workflow just ended and the
    /// coordinator beat us to it; that is not an error.
    async fn persist_progress(&self, ws: Uuid, step: String, bag: VarBag) -> BridgeResult<()> {
        match self
            .sessions
            .record_workflow_progress(ws, Some(step), bag)
            .await
        {
            Ok(()) | Err(SessionError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn record(&self, tool: &str, success: bool) {
        let mut recent = self.recent.lock().expect("recent lock poisoned");
        if recent.len() == RECENT_CALLS {
            recent.pop_front();
        }
        recent.push_back(CallRecord {
            tool: tool.to_owned(),
            success,
            at: chrono::Utc::now().timestamp(),
        });
    }
}

fn get_str<'a>(args: &'a Map<String, Value>, key: &str) -> BridgeResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::InvalidParams(format!("missing string parameter '{key}'")))
}

fn get_session_id(args: &Map<String, Value>) -> BridgeResult<Uuid> {
    let raw = get_str(args, "session_id")?;
    Uuid::parse_str(raw)
        .map_err(|_| BridgeError::InvalidParams(format!("'{raw}' is not a valid session id")))
}

// ── tests ────────────────────────────────────────────────────────────
