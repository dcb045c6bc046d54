//! Tool lifecycle events emitted onto a chat response stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a namespaced invocation was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Tool,
    Skill,
}

/// Maximum characters of a tool result shown on the event stream. Full
/// results still flow to the LLM loop.
pub const RESULT_PREVIEW_MAX: usize = 400;

/// Truncate a rendered result for stream display.
pub fn preview(rendered: &str) -> String {
    if rendered.chars().count() <= RESULT_PREVIEW_MAX {
        return rendered.to_string();
    }
    let cut: String = rendered.chars().take(RESULT_PREVIEW_MAX).collect();
    format!("{cut}…")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ToolEvent {
    ToolStart {
        tool_name: String,
        args: Value,
        started_at: i64,
    },
    ToolResult {
        tool_name: String,
        source: ToolSource,
        duration_ms: u64,
        result_preview: String,
    },
    ToolError {
        tool_name: String,
        duration_ms: u64,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_passes_short_results_through() {
        assert_eq!(preview("ok"), "ok");
    }

    #[test]
    fn preview_truncates_at_limit() {
        let long = "x".repeat(1000);
        let p = preview(&long);
        assert_eq!(p.chars().count(), RESULT_PREVIEW_MAX + 1);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn events_tag_with_snake_case() {
        let ev = ToolEvent::ToolStart {
            tool_name: "web__search".into(),
            args: serde_json::json!({"q": "rust"}),
            started_at: 1,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "tool_start");
    }
}
