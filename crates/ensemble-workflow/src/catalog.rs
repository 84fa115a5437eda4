//! Named workflow definitions.
//!
//! Tools start workflows by type name; the catalog maps those names to
//! shared, validated definitions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::WorkflowDefinition;
use crate::error::{WorkflowError, WorkflowResult};

/// Registry of workflow definitions keyed by their type name.
#[derive(Default)]
pub struct WorkflowCatalog {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its own `workflow_type`.  The last
    /// registration for a name wins.
    pub fn register(&mut self, definition: WorkflowDefinition) {
        self.definitions
            .insert(definition.workflow_type().to_owned(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> WorkflowResult<Arc<WorkflowDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflowType {
                name: name.to_owned(),
            })
    }

    /// Registered type names, sorted for stable listings.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::result::StepResult;
    use crate::templates::compute;

    use super::*;

    fn trivial(name: &str) -> WorkflowDefinition {
        let mut builder = WorkflowDefinition::builder(name);
        builder.step(compute("only", |_| StepResult::complete("done")));
        builder.build().unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut catalog = WorkflowCatalog::new();
        catalog.register(trivial("timer"));
        catalog.register(trivial("reminder"));

        assert_eq!(catalog.names(), vec!["reminder", "timer"]);
        assert_eq!(catalog.get("timer").unwrap().workflow_type(), "timer");
    }

    #[test]
    fn unknown_type_is_an_error() {
        let catalog = WorkflowCatalog::new();
        let err = catalog.get("missing").unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownWorkflowType { .. }));
    }
}
