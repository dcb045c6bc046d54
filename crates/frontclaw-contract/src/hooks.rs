//! Hook method names and reply shapes.
//!
//! Hook names are the `method` strings of HOOK envelopes. They mirror the
//! plugin-facing API, so they stay camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ON_LOAD: &str = "onLoad";
pub const ON_UNLOAD: &str = "onUnload";
pub const ON_PROMPT_RECEIVED: &str = "onPromptReceived";
pub const TRANSFORM_SYSTEM_MESSAGE: &str = "transformSystemMessage";
pub const BEFORE_LLM_CALL: &str = "beforeLLMCall";
pub const AFTER_LLM_CALL: &str = "afterLLMCall";
pub const GET_TOOLS: &str = "getTools";
pub const EXECUTE_TOOL: &str = "executeTool";
pub const GET_SKILLS: &str = "getSkills";
pub const EXECUTE_SKILL: &str = "executeSkill";
pub const ON_SEARCH: &str = "onSearch";
pub const ON_SOCKET_CONNECT: &str = "onSocketConnect";
pub const ON_SOCKET_MESSAGE: &str = "onSocketMessage";
pub const ON_SOCKET_DISCONNECT: &str = "onSocketDisconnect";
pub const ON_HTTP_REQUEST: &str = "onHTTPRequest";

/// What a pipeline hook handed back.
///
/// The RESPONSE result for interception-capable hooks is either absent (the
/// plugin passes), a tagged `continue` with a replacement value, or a tagged
/// `intercept` that ends the pipeline. The tag is explicit on the wire; no
/// magic marker fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HookReply {
    Continue(Value),
    Intercept(Value),
}

impl HookReply {
    /// Interpret a raw RESPONSE result. `None`/null means the plugin passed.
    /// A bare (untagged) value is treated as a `continue` replacement, so
    /// simple plugins can return plain values.
    pub fn from_result(result: Option<Value>) -> Option<Self> {
        let value = result?;
        if value.is_null() {
            return None;
        }
        if let Ok(reply) = serde_json::from_value::<HookReply>(value.clone()) {
            return Some(reply);
        }
        Some(HookReply::Continue(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_absent_mean_pass() {
        assert!(HookReply::from_result(None).is_none());
        assert!(HookReply::from_result(Some(Value::Null)).is_none());
    }

    #[test]
    fn tagged_intercept_is_recognized() {
        let raw = json!({"kind": "intercept", "value": "cached answer"});
        assert_eq!(
            HookReply::from_result(Some(raw)),
            Some(HookReply::Intercept(json!("cached answer")))
        );
    }

    #[test]
    fn bare_value_is_a_continue() {
        let raw = json!("rewritten prompt");
        assert_eq!(
            HookReply::from_result(Some(raw)),
            Some(HookReply::Continue(json!("rewritten prompt")))
        );
    }

    #[test]
    fn tagged_continue_roundtrips() {
        let reply = HookReply::Continue(json!({"a": 1}));
        let raw = serde_json::to_value(&reply).unwrap();
        assert_eq!(raw["kind"], "continue");
        assert_eq!(HookReply::from_result(Some(raw)), Some(reply));
    }
}
