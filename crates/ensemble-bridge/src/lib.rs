//! # ensemble-bridge
//!
//! The tool bridge between an advisor (language model) and the Ensemble
//! core.
//!
//! The bridge exposes a closed, typed [`tool`] catalog; the
//! [`ToolServer`] validates every request against its schema before
//! dispatching into the session manager and workflow engines, and the
//! [`AdvisorClient`] turns raw advisor output into either plain text or
//! a validated tool call.  Every invocation gets a [`ToolResponse`],
//! never a transport error.

pub mod client;
pub mod error;
pub mod server;
pub mod tool;

// ── re-exports ───────────────────────────────────────────────────────

pub use client::{AdvisorClient, AdvisorReply, RelayOutcome, parse_advisor_output};
pub use error::{BridgeError, BridgeResult};
pub use server::{CallRecord, ToolServer};
pub use tool::{ParamKind, Tool, ToolName, ToolParam, ToolRequest, ToolResponse, catalog};
