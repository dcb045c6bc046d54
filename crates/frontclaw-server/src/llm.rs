//! The LLM provider contract the chat driver consumes.
//!
//! Providers (Anthropic, OpenAI, …) live outside this crate; they implement
//! [`ChatModel`] by translating these shared shapes into their own wire
//! format. The driver only relies on non-streaming completion and a delta
//! stream that can carry tool calls.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("no LLM provider configured")]
    Unconfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set on `Tool` messages: which call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool as advertised to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One step of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    /// A text fragment of the assistant reply.
    Text(String),
    /// The model requests a tool invocation.
    ToolCall(ToolCallRequest),
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<u32>,
}

impl ModelRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Abstraction over LLM backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Non-streaming completion; returns the final text.
    async fn complete(&self, request: ModelRequest) -> Result<String, LlmError>;

    /// Streamed completion with tool calling.
    fn stream(&self, request: ModelRequest) -> BoxStream<'static, Result<ChatDelta, LlmError>>;

    /// Human-readable provider description for status output.
    fn description(&self) -> String;
}

/// Development provider: completes by echoing the last user message. Keeps
/// the host runnable end-to-end without external credentials.
pub struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(&self, request: ModelRequest) -> Result<String, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("echo: {last_user}"))
    }

    fn stream(&self, request: ModelRequest) -> BoxStream<'static, Result<ChatDelta, LlmError>> {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Box::pin(async_stream::stream! {
            yield Ok(ChatDelta::Text("echo: ".to_string()));
            yield Ok(ChatDelta::Text(text));
        })
    }

    fn description(&self) -> String {
        "echo (development)".to_string()
    }
}
