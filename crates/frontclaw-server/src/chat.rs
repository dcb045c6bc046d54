//! The chat driver.
//!
//! One run per inbound chat request: persist the user message, thread the
//! prompt through the orchestrator pipelines, drive the LLM stream with the
//! tool executor, and persist the assistant reply. Progress is emitted as
//! [`ChatEvent`]s; the HTTP layer decides whether they become SSE frames or
//! are discarded for the JSON mode.

use crate::llm::{ChatDelta, ChatMessage, ChatModel, ModelRequest, ToolSpec};
use crate::persistence::{ConversationStore, StoreError};
use crate::title::derive_title;
use frontclaw_contract::{preview, ErrorObject, PipelineOutcome, ToolControl, ToolEvent, ToolSource};
use frontclaw_orchestrator::Orchestrator;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Ceiling on LLM round-trips per request; each round may carry several tool
/// calls.
const MAX_TOOL_ROUNDS: usize = 8;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when they help you answer.";

#[derive(Debug, Clone)]
pub struct ChatRequestOptions {
    pub message: String,
    pub conversation_id: Option<String>,
    pub profile_id: Option<String>,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSummary {
    pub name: String,
    pub source: ToolSource,
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub conversation_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intercepted_by: Option<String>,
    pub tool_calls: Vec<ToolCallSummary>,
}

/// Stream-visible progress of one chat run.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Meta {
        conversation_id: String,
        user_message_id: String,
    },
    Delta(String),
    Tool(ToolEvent),
    Done(ChatSummary),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("blocked by plugin '{plugin_id}': {error}")]
    Blocked {
        plugin_id: String,
        error: ErrorObject,
        conversation_id: String,
        user_message_id: String,
    },

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("llm error: {0}")]
    Llm(String),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ChatError::NotFound(id),
            StoreError::Backend(msg) => ChatError::Store(msg),
        }
    }
}

struct LoopResult {
    text: String,
    summaries: Vec<ToolCallSummary>,
    outputs: Vec<Value>,
    messages: Vec<ChatMessage>,
    ended_by_control: bool,
}

/// Glues orchestrator, LLM provider, and persistence for chat requests.
pub struct ChatDriver {
    orchestrator: Arc<Orchestrator>,
    model: Arc<dyn ChatModel>,
    store: Arc<dyn ConversationStore>,
}

impl ChatDriver {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        model: Arc<dyn ChatModel>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            orchestrator,
            model,
            store,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run one chat request. Events stream out as the run progresses; the
    /// summary is also returned for the non-streaming mode.
    pub async fn run(
        &self,
        options: ChatRequestOptions,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<ChatSummary, ChatError> {
        let started = Instant::now();
        let conversation = self
            .store
            .get_or_create(options.conversation_id.as_deref())
            .await?;
        let user_message = self
            .store
            .append_message(
                &conversation.id,
                "user",
                &options.message,
                match &options.profile_id {
                    Some(profile) => json!({ "profileId": profile }),
                    None => Value::Null,
                },
            )
            .await?;

        let _ = events.send(ChatEvent::Meta {
            conversation_id: conversation.id.clone(),
            user_message_id: user_message.id.clone(),
        });
        info!(conversation_id = %conversation.id, "chat request started");

        let prompt = match self.orchestrator.process_prompt(&options.message).await {
            PipelineOutcome::Failed { plugin_id, error } => {
                warn!(conversation_id = %conversation.id, plugin_id = %plugin_id, code = %error.code, "prompt pipeline blocked the request");
                return Err(ChatError::Blocked {
                    plugin_id,
                    error,
                    conversation_id: conversation.id,
                    user_message_id: user_message.id,
                });
            }
            outcome => outcome,
        };

        if conversation.title.is_none() {
            let title = options
                .title
                .clone()
                .unwrap_or_else(|| derive_title(&options.message));
            self.store.set_title(&conversation.id, &title).await?;
        }

        let prompt = match prompt {
            PipelineOutcome::Intercepted { value, plugin_id } => {
                return self
                    .finish(
                        &conversation.id,
                        &user_message.id,
                        value,
                        Some(plugin_id),
                        Vec::new(),
                        &events,
                    )
                    .await;
            }
            PipelineOutcome::Continued(p) => p,
            PipelineOutcome::Failed { .. } => unreachable!("failure handled above"),
        };

        // Capability enumeration feeds both the system prompt and the LLM
        // tool list.
        let tools = self.orchestrator.collect_tools().await;
        let skills = self.orchestrator.collect_skills().await;
        let mut tool_specs: Vec<ToolSpec> = tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect();
        tool_specs.extend(skills.iter().map(|s| ToolSpec {
            name: s.name.clone(),
            description: s.description.clone(),
            parameters: s.parameters.clone(),
        }));

        let base_prompt = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let system = self
            .orchestrator
            .transform_system_message(&with_advertised_block(&base_prompt, &tool_specs))
            .await;

        let messages = self
            .assemble_messages(&conversation.id, &user_message.id, &system, &prompt)
            .await?;

        let messages = match self
            .orchestrator
            .before_llm_call(serde_json::to_value(&messages).unwrap_or_default())
            .await
        {
            PipelineOutcome::Failed { plugin_id, error } => {
                return Err(ChatError::Blocked {
                    plugin_id,
                    error,
                    conversation_id: conversation.id,
                    user_message_id: user_message.id,
                });
            }
            PipelineOutcome::Intercepted { value, plugin_id } => {
                let text = value.as_str().map(String::from).unwrap_or_else(|| value.to_string());
                return self
                    .finish(
                        &conversation.id,
                        &user_message.id,
                        text,
                        Some(plugin_id),
                        Vec::new(),
                        &events,
                    )
                    .await;
            }
            PipelineOutcome::Continued(value) => match serde_json::from_value(value) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "beforeLLMCall returned unusable messages, keeping originals");
                    self.assemble_messages(&conversation.id, &user_message.id, &system, &prompt)
                        .await?
                }
            },
        };

        let result = self.run_llm_loop(messages, tool_specs, &events).await?;

        let mut text = result.text;
        if !result.ended_by_control && text.trim().is_empty() && !result.summaries.is_empty() {
            text = self.synthesize(result.messages, &result.outputs).await?;
        }
        let text = self.orchestrator.after_llm_call(&text).await;

        let summary = self
            .finish(
                &conversation.id,
                &user_message.id,
                text,
                None,
                result.summaries,
                &events,
            )
            .await?;
        info!(
            conversation_id = %conversation.id,
            duration_ms = started.elapsed().as_millis() as u64,
            tool_calls = summary.tool_calls.len(),
            "chat request finished"
        );
        Ok(summary)
    }

    /// `[system, ...history, user]` with the pipeline-transformed prompt in
    /// place of the just-persisted user message.
    async fn assemble_messages(
        &self,
        conversation_id: &str,
        user_message_id: &str,
        system: &str,
        prompt: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages = vec![ChatMessage::system(system)];
        for stored in self.store.history(conversation_id).await? {
            if stored.id == user_message_id {
                continue;
            }
            match stored.role.as_str() {
                "user" => messages.push(ChatMessage::user(stored.content)),
                "assistant" => messages.push(ChatMessage::assistant(stored.content)),
                _ => {}
            }
        }
        messages.push(ChatMessage::user(prompt));
        Ok(messages)
    }

    async fn run_llm_loop(
        &self,
        mut messages: Vec<ChatMessage>,
        tool_specs: Vec<ToolSpec>,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<LoopResult, ChatError> {
        use futures::StreamExt;

        let mut summaries = Vec::new();
        let mut outputs = Vec::new();

        for _round in 0..MAX_TOOL_ROUNDS {
            let request = ModelRequest::new(messages.clone()).with_tools(tool_specs.clone());
            let mut stream = self.model.stream(request);

            let mut round_text = String::new();
            let mut calls = Vec::new();
            while let Some(delta) = stream.next().await {
                match delta.map_err(|e| ChatError::Llm(e.to_string()))? {
                    ChatDelta::Text(fragment) => {
                        let _ = events.send(ChatEvent::Delta(fragment.clone()));
                        round_text.push_str(&fragment);
                    }
                    ChatDelta::ToolCall(call) => calls.push(call),
                }
            }

            if calls.is_empty() {
                return Ok(LoopResult {
                    text: round_text,
                    summaries,
                    outputs,
                    messages,
                    ended_by_control: false,
                });
            }

            if !round_text.is_empty() {
                messages.push(ChatMessage::assistant(round_text));
            }

            for call in calls {
                let call_started = Instant::now();
                let _ = events.send(ChatEvent::Tool(ToolEvent::ToolStart {
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                    started_at: chrono::Utc::now().timestamp_millis(),
                }));

                // Skills take precedence; tools are the fallback.
                let (execution, source) = match self
                    .orchestrator
                    .execute_skill(&call.name, call.arguments.clone())
                    .await
                {
                    Ok(execution) if execution.success => (Ok(execution), ToolSource::Skill),
                    _ => (
                        self.orchestrator
                            .execute_tool(&call.name, call.arguments.clone())
                            .await,
                        ToolSource::Tool,
                    ),
                };
                let duration_ms = call_started.elapsed().as_millis() as u64;

                let execution = match execution {
                    Ok(execution) if execution.success => execution,
                    Ok(execution) => {
                        let message = execution
                            .error
                            .unwrap_or_else(|| format!("tool '{}' failed", call.name));
                        report_tool_error(&call, &message, duration_ms, source, events, &mut summaries, &mut messages);
                        continue;
                    }
                    Err(error) => {
                        report_tool_error(&call, &error.message, duration_ms, source, events, &mut summaries, &mut messages);
                        continue;
                    }
                };

                match ToolControl::from_value(execution.result) {
                    ToolControl::EndRequest(response) => {
                        let _ = events.send(ChatEvent::Tool(ToolEvent::ToolResult {
                            tool_name: call.name.clone(),
                            source,
                            duration_ms,
                            result_preview: preview(&response),
                        }));
                        summaries.push(ToolCallSummary {
                            name: call.name.clone(),
                            source,
                            duration_ms,
                            success: true,
                        });
                        return Ok(LoopResult {
                            text: response,
                            summaries,
                            outputs,
                            messages,
                            ended_by_control: true,
                        });
                    }
                    ToolControl::Handoff(value) => {
                        let rendered = match value.as_str() {
                            Some(s) => s.to_string(),
                            None => value.to_string(),
                        };
                        let _ = events.send(ChatEvent::Tool(ToolEvent::ToolResult {
                            tool_name: call.name.clone(),
                            source,
                            duration_ms,
                            result_preview: preview(&rendered),
                        }));
                        summaries.push(ToolCallSummary {
                            name: call.name.clone(),
                            source,
                            duration_ms,
                            success: true,
                        });
                        outputs.push(json!({ "tool": call.name, "output": value }));
                        messages.push(ChatMessage::tool(call.id.clone(), rendered));
                    }
                }
            }
        }

        // Round budget exhausted: let the synthesis step produce the reply.
        Ok(LoopResult {
            text: String::new(),
            summaries,
            outputs,
            messages,
            ended_by_control: false,
        })
    }

    /// When the model went silent after tool use, ask it once more for a
    /// final answer over the collected tool outputs.
    async fn synthesize(
        &self,
        mut messages: Vec<ChatMessage>,
        outputs: &[Value],
    ) -> Result<String, ChatError> {
        let rendered = serde_json::to_string(outputs).unwrap_or_else(|_| "[]".to_string());
        messages.push(ChatMessage::assistant(format!(
            "[tool results] {rendered}"
        )));
        messages.push(ChatMessage::user(
            "Produce the final answer for the user from the tool results above.",
        ));
        self.model
            .complete(ModelRequest::new(messages))
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))
    }

    async fn finish(
        &self,
        conversation_id: &str,
        user_message_id: &str,
        response: String,
        intercepted_by: Option<String>,
        tool_calls: Vec<ToolCallSummary>,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<ChatSummary, ChatError> {
        let metadata = match &intercepted_by {
            Some(plugin_id) => json!({ "interceptedBy": plugin_id }),
            None if tool_calls.is_empty() => Value::Null,
            None => json!({
                "toolCalls": tool_calls
                    .iter()
                    .map(|t| json!({ "name": t.name, "durationMs": t.duration_ms, "success": t.success }))
                    .collect::<Vec<_>>()
            }),
        };
        let assistant = self
            .store
            .append_message(conversation_id, "assistant", &response, metadata)
            .await?;

        let summary = ChatSummary {
            conversation_id: conversation_id.to_string(),
            user_message_id: user_message_id.to_string(),
            assistant_message_id: assistant.id,
            response,
            intercepted_by,
            tool_calls,
        };
        let _ = events.send(ChatEvent::Done(summary.clone()));
        Ok(summary)
    }
}

#[allow(clippy::too_many_arguments)]
fn report_tool_error(
    call: &crate::llm::ToolCallRequest,
    message: &str,
    duration_ms: u64,
    source: ToolSource,
    events: &mpsc::UnboundedSender<ChatEvent>,
    summaries: &mut Vec<ToolCallSummary>,
    messages: &mut Vec<ChatMessage>,
) {
    let _ = events.send(ChatEvent::Tool(ToolEvent::ToolError {
        tool_name: call.name.clone(),
        duration_ms,
        message: message.to_string(),
    }));
    summaries.push(ToolCallSummary {
        name: call.name.clone(),
        source,
        duration_ms,
        success: false,
    });
    messages.push(ChatMessage::tool(
        call.id.clone(),
        format!("error: {message}"),
    ));
}

/// Append the advertised tool block to the base system prompt.
fn with_advertised_block(base: &str, tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return base.to_string();
    }
    let mut block = String::from("\n\nAvailable tools:\n");
    for tool in tools {
        block.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    format!("{base}{block}")
}
