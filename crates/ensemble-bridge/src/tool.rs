//! The tool catalog.
//!
//! Tools are a closed enum, not a string-keyed lookup: an advisor can
//! only ever invoke what is declared here, and every parameter carries
//! a typed schema that is checked before dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Every tool the bridge exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    StartWorkflow,
    ProvideWorkflowInput,
    GetWorkflowStatus,
    CancelWorkflow,
    ReviewStep,
    ListActiveWorkflows,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartWorkflow => "start_workflow",
            Self::ProvideWorkflowInput => "provide_workflow_input",
            Self::GetWorkflowStatus => "get_workflow_status",
            Self::CancelWorkflow => "cancel_workflow",
            Self::ReviewStep => "review_step",
            Self::ListActiveWorkflows => "list_active_workflows",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "start_workflow" => Some(Self::StartWorkflow),
            "provide_workflow_input" => Some(Self::ProvideWorkflowInput),
            "get_workflow_status" => Some(Self::GetWorkflowStatus),
            "cancel_workflow" => Some(Self::CancelWorkflow),
            "review_step" => Some(Self::ReviewStep),
            "list_active_workflows" => Some(Self::ListActiveWorkflows),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON parameter types the schemas can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    /// The JSON-Schema type name used in advisor specs.
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// One parameter in a tool's schema.
#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
    /// Optional closed value set (strings only).
    pub allowed: Option<&'static [&'static str]>,
}

impl ToolParam {
    const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
            allowed: None,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
            allowed: None,
        }
    }

    const fn with_allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    fn validate(&self, args: &Map<String, Value>) -> Result<(), String> {
        let Some(value) = args.get(self.name) else {
            if self.required {
                return Err(format!("missing required parameter '{}'", self.name));
            }
            return Ok(());
        };
        if !self.kind.matches(value) {
            return Err(format!(
                "parameter '{}' must be of type {}",
                self.name,
                self.kind.json_type()
            ));
        }
        if let Some(allowed) = self.allowed {
            let ok = value.as_str().is_some_and(|s| allowed.contains(&s));
            if !ok {
                return Err(format!(
                    "parameter '{}' must be one of: {}",
                    self.name,
                    allowed.join(", ")
                ));
            }
        }
        Ok(())
    }
}

/// A tool definition: name, description, parameter schema.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: ToolName,
    pub description: &'static str,
    pub params: Vec<ToolParam>,
}

impl Tool {
    /// Check `args` against the schema.  Unknown extra arguments are
    /// tolerated; missing/mistyped/out-of-range ones are not.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), String> {
        for param in &self.params {
            param.validate(args)?;
        }
        Ok(())
    }

    /// Render the advisor-facing JSON spec for this tool.
    pub fn to_advisor_spec(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut schema = Map::new();
            schema.insert("type".into(), json!(param.kind.json_type()));
            schema.insert("description".into(), json!(param.description));
            if let Some(allowed) = param.allowed {
                schema.insert("enum".into(), json!(allowed));
            }
            properties.insert(param.name.to_owned(), Value::Object(schema));
            if param.required {
                required.push(param.name);
            }
        }
        json!({
            "name": self.name.as_str(),
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        })
    }
}

/// Build the full tool catalog.
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool {
            name: ToolName::StartWorkflow,
            description: "Start a structured workflow for the user's command",
            params: vec![
                ToolParam::required(
                    "workflow_type",
                    ParamKind::String,
                    "Registered workflow type to run",
                ),
                ToolParam::required(
                    "command",
                    ParamKind::String,
                    "The user command that motivated the workflow",
                ),
                ToolParam::optional(
                    "initial_data",
                    ParamKind::Object,
                    "Values to seed the workflow's variable bag",
                ),
            ],
        },
        Tool {
            name: ToolName::ProvideWorkflowInput,
            description: "Provide user input to a workflow waiting on its current step",
            params: vec![
                ToolParam::required("session_id", ParamKind::String, "Workflow session id"),
                ToolParam::required("user_input", ParamKind::String, "The user's answer"),
            ],
        },
        Tool {
            name: ToolName::GetWorkflowStatus,
            description: "Get the current state, step and progress of a workflow",
            params: vec![ToolParam::required(
                "session_id",
                ParamKind::String,
                "Workflow session id",
            )],
        },
        Tool {
            name: ToolName::CancelWorkflow,
            description: "Cancel a running workflow",
            params: vec![
                ToolParam::required("session_id", ParamKind::String, "Workflow session id"),
                ToolParam::optional("reason", ParamKind::String, "Why the workflow is cancelled"),
            ],
        },
        Tool {
            name: ToolName::ReviewStep,
            description: "Resolve a workflow step that is awaiting review",
            params: vec![
                ToolParam::required("session_id", ParamKind::String, "Workflow session id"),
                ToolParam::required(
                    "decision",
                    ParamKind::String,
                    "What to do with the reviewed step",
                )
                .with_allowed(&["approve", "modify", "reject"]),
                ToolParam::optional(
                    "modifications",
                    ParamKind::Object,
                    "Replacement data, required when decision is 'modify'",
                ),
                ToolParam::optional(
                    "reason",
                    ParamKind::String,
                    "Rejection reason, used when decision is 'reject'",
                ),
            ],
        },
        Tool {
            name: ToolName::ListActiveWorkflows,
            description: "List all currently running workflows",
            params: vec![],
        },
    ]
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// What the bridge hands back for every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: ToolName) -> Tool {
        catalog().into_iter().find(|t| t.name == name).unwrap()
    }

    #[test]
    fn advisor_spec_has_expected_shape() {
        let spec = tool(ToolName::StartWorkflow).to_advisor_spec();
        assert_eq!(spec["name"], json!("start_workflow"));
        assert_eq!(spec["parameters"]["type"], json!("object"));
        assert_eq!(
            spec["parameters"]["properties"]["workflow_type"]["type"],
            json!("string")
        );
        assert_eq!(
            spec["parameters"]["required"],
            json!(["workflow_type", "command"])
        );
    }

    #[test]
    fn enum_constrained_params_render_and_validate() {
        let review = tool(ToolName::ReviewStep);
        let spec = review.to_advisor_spec();
        assert_eq!(
            spec["parameters"]["properties"]["decision"]["enum"],
            json!(["approve", "modify", "reject"])
        );

        let mut args = Map::new();
        args.insert("session_id".into(), json!("abc"));
        args.insert("decision".into(), json!("shrug"));
        let err = review.validate(&args).unwrap_err();
        assert!(err.contains("one of"));

        args.insert("decision".into(), json!("approve"));
        review.validate(&args).unwrap();
    }

    #[test]
    fn missing_required_and_wrong_types_are_rejected() {
        let provide = tool(ToolName::ProvideWorkflowInput);

        let err = provide.validate(&Map::new()).unwrap_err();
        assert!(err.contains("session_id"));

        let mut args = Map::new();
        args.insert("session_id".into(), json!(42));
        args.insert("user_input".into(), json!("hi"));
        let err = provide.validate(&args).unwrap_err();
        assert!(err.contains("type string"));
    }

    #[test]
    fn optional_params_may_be_absent() {
        let cancel = tool(ToolName::CancelWorkflow);
        let mut args = Map::new();
        args.insert("session_id".into(), json!("abc"));
        cancel.validate(&args).unwrap();
    }

    #[test]
    fn tool_names_roundtrip() {
        for tool in catalog() {
            assert_eq!(ToolName::parse(tool.name.as_str()), Some(tool.name));
        }
        assert_eq!(ToolName::parse("resolve_path"), None);
    }
}
