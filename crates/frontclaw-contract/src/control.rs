//! Tool control envelope.
//!
//! A tool or skill may end the LLM loop outright and dictate the final
//! assistant text. On the wire (from a sandboxed plugin) that decision is the
//! shape `{"__frontclaw": {"mode": "end_request", "response": "..."}}`; the
//! host models it as an explicit variant rather than passing the marker
//! object around.

use serde_json::Value;

/// Host-side view of a tool result's control effect.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolControl {
    /// Normal handoff: the value is fed back to the LLM loop.
    Handoff(Value),
    /// Terminate the request with this text as the assistant reply.
    EndRequest(String),
}

impl ToolControl {
    /// Classify a raw tool result value.
    pub fn from_value(value: Value) -> Self {
        if let Some(ctl) = value.get("__frontclaw") {
            if ctl.get("mode").and_then(Value::as_str) == Some("end_request") {
                let response = ctl
                    .get("response")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return ToolControl::EndRequest(response);
            }
        }
        ToolControl::Handoff(value)
    }

    pub fn is_end_request(&self) -> bool {
        matches!(self, ToolControl::EndRequest(_))
    }
}
