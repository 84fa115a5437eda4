//! Live engine registry.
//!
//! One engine per workflow session, behind a `tokio::sync::Mutex` so
//! there is exactly one writer per session while different sessions
//! proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::{WorkflowError, WorkflowResult};

/// Shared handle to a registered engine.
pub type EngineHandle = Arc<Mutex<WorkflowEngine>>;

/// Maps workflow session ids to their running engines.
#[derive(Default)]
pub struct EngineRegistry {
    engines: DashMap<Uuid, EngineHandle>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: Uuid, engine: WorkflowEngine) -> EngineHandle {
        let handle = Arc::new(Mutex::new(engine));
        self.engines.insert(session_id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, session_id: Uuid) -> WorkflowResult<EngineHandle> {
        self.engines
            .get(&session_id)
            .map(|e| Arc::clone(&e))
            .ok_or(WorkflowError::EngineNotFound {
                session: session_id,
            })
    }

    /// Remove an engine once its session ends.  Removing twice is fine.
    pub fn remove(&self, session_id: Uuid) {
        self.engines.remove(&session_id);
    }

    pub fn active_sessions(&self) -> Vec<Uuid> {
        self.engines.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use ensemble_bus::EventBus;

    use crate::definition::WorkflowDefinition;
    use crate::result::StepResult;
    use crate::templates::prompt_input;

    use super::*;

    fn engine(session_id: Uuid) -> WorkflowEngine {
        let mut builder = WorkflowDefinition::builder("ask_only");
        let ask = builder.step(prompt_input("ask", "Say something", "text"));
        let done = builder.step(crate::templates::compute("done", |_| {
            StepResult::complete("done")
        }));
        builder.next(ask, done);
        let definition = Arc::new(builder.build().unwrap());
        WorkflowEngine::start(definition, session_id, EventBus::default()).unwrap()
    }

    #[tokio::test]
    async fn insert_get_remove() {
        let registry = EngineRegistry::new();
        let session_id = Uuid::now_v7();
        registry.insert(session_id, engine(session_id));

        let handle = registry.get(session_id).unwrap();
        assert_eq!(handle.lock().await.session_id(), session_id);
        assert_eq!(registry.active_sessions(), vec![session_id]);

        registry.remove(session_id);
        registry.remove(session_id);
        assert!(matches!(
            registry.get(session_id).unwrap_err(),
            WorkflowError::EngineNotFound { .. }
        ));
        assert!(registry.is_empty());
    }
}
