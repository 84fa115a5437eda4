//! Advisor output parsing and relay.
//!
//! The advisor (a language model) answers either with plain text for
//! the user or with a JSON tool invocation.  Parsing is forgiving in
//! exactly one direction: anything that is not a well-formed tool call
//! degrades to plain text, never to an error.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::server::ToolServer;
use crate::tool::{ToolRequest, ToolResponse};

/// What the advisor's raw output turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvisorReply {
    /// Plain conversational text, to be spoken or shown as-is.
    Text(String),
    /// A structured tool invocation.
    ToolCall(ToolRequest),
}

/// Outcome of relaying one advisor reply through the tool server.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Nothing to execute; pass the text on.
    Say(String),
    /// The tool ran (or was rejected); here is its response.
    ToolResult(ToolResponse),
}

/// Parse raw advisor output into text or a tool call.
///
/// A tool call is a JSON object with a string `"tool"` field, optionally
/// wrapped in a markdown code fence.  Everything else is text.
pub fn parse_advisor_output(raw: &str) -> AdvisorReply {
    let candidate = strip_fence(raw.trim());
    if !candidate.starts_with('{') {
        return AdvisorReply::Text(raw.trim().to_owned());
    }

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) if object.get("tool").is_some_and(Value::is_string) => {
            match serde_json::from_value::<ToolRequest>(Value::Object(object)) {
                Ok(request) => AdvisorReply::ToolCall(request),
                Err(err) => {
                    debug!(%err, "tool-shaped output failed to deserialize, treating as text");
                    AdvisorReply::Text(raw.trim().to_owned())
                }
            }
        }
        _ => AdvisorReply::Text(raw.trim().to_owned()),
    }
}

/// Peel one ```...``` fence off, if present.
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    // The opening fence may carry a language tag ("```json").
    match rest.split_once('\n') {
        Some((first_line, body)) if !first_line.trim_start().starts_with('{') => body.trim(),
        _ => rest.trim(),
    }
}

/// Bridges advisor output to the tool server.
pub struct AdvisorClient {
    server: Arc<ToolServer>,
}

impl AdvisorClient {
    pub fn new(server: Arc<ToolServer>) -> Self {
        Self { server }
    }

    /// Parse one advisor reply and execute it if it is a tool call.
    pub async fn relay(&self, raw: &str) -> RelayOutcome {
        match parse_advisor_output(raw) {
            AdvisorReply::Text(text) => RelayOutcome::Say(text),
            AdvisorReply::ToolCall(request) => {
                RelayOutcome::ToolResult(self.server.handle_request(request).await)
            }
        }
    }

    pub fn server(&self) -> &Arc<ToolServer> {
        &self.server
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_text_stays_text() {
        let reply = parse_advisor_output("Sure, I can help with that.");
        assert_eq!(
            reply,
            AdvisorReply::Text("Sure, I can help with that.".into())
        );
    }

    #[test]
    fn bare_json_tool_call_is_parsed() {
        let reply = parse_advisor_output(
            r#"{"tool": "start_workflow", "arguments": {"workflow_type": "timer", "command": "set a timer"}}"#,
        );
        match reply {
            AdvisorReply::ToolCall(request) => {
                assert_eq!(request.tool, "start_workflow");
                assert_eq!(request.arguments["workflow_type"], json!("timer"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn fenced_json_tool_call_is_parsed() {
        let raw = "```json\n{\"tool\": \"list_active_workflows\"}\n```";
        match parse_advisor_output(raw) {
            AdvisorReply::ToolCall(request) => {
                assert_eq!(request.tool, "list_active_workflows");
                assert!(request.arguments.is_empty());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn malformed_structures_degrade_to_text() {
        // Broken JSON.
        assert!(matches!(
            parse_advisor_output(r#"{"tool": "start_workflow""#),
            AdvisorReply::Text(_)
        ));
        // Object without a tool field.
        assert!(matches!(
            parse_advisor_output(r#"{"answer": 42}"#),
            AdvisorReply::Text(_)
        ));
        // Tool field that is not a string.
        assert!(matches!(
            parse_advisor_output(r#"{"tool": 7}"#),
            AdvisorReply::Text(_)
        ));
        // JSON that is not an object at all.
        assert!(matches!(
            parse_advisor_output(r#"["tool", "call"]"#),
            AdvisorReply::Text(_)
        ));
    }
}
