//! HTTP surface: the chat endpoint, conversation reads, the plugin
//! inventory, and the plugin route mount.

use crate::chat::{ChatDriver, ChatError, ChatEvent, ChatRequestOptions};
use crate::persistence::{Conversation, ConversationStore, StoredMessage};
use crate::sse::SseWriter;
use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use frontclaw_contract::codes;
use frontclaw_orchestrator::PluginHttpRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<ChatDriver>,
    pub store: Arc<dyn ConversationStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/conversations", get(list_conversations))
        .route(
            "/api/v1/conversations/:id/messages",
            get(conversation_messages),
        )
        .route("/api/v1/plugins", get(list_plugins))
        .route("/api/v1/p/:plugin_id/*path", any(plugin_route))
        .route("/api/v1/p/:plugin_id", any(plugin_route_root))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

// ── chat ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    message: String,
    conversation_id: Option<String>,
    profile_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    stream: bool,
    system_prompt: Option<String>,
}

fn chat_error_response(err: &ChatError) -> (StatusCode, Value) {
    match err {
        ChatError::Blocked {
            plugin_id,
            error,
            conversation_id,
            user_message_id,
        } => (
            StatusCode::FORBIDDEN,
            json!({
                "success": false,
                "message": error.message,
                "code": error.code,
                "blockedBy": plugin_id,
                "conversationId": conversation_id,
                "messageId": user_message_id,
            }),
        ),
        ChatError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            json!({ "success": false, "message": format!("conversation not found: {id}") }),
        ),
        ChatError::Store(msg) | ChatError::Llm(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "success": false, "message": msg }),
        ),
    }
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Response {
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "message cannot be empty" })),
        )
            .into_response();
    }

    let wants_stream = body.stream
        || headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"));

    let options = ChatRequestOptions {
        message: body.message,
        conversation_id: body.conversation_id,
        profile_id: body.profile_id,
        title: body.title,
        system_prompt: body.system_prompt,
    };

    if wants_stream {
        stream_chat(state, options)
    } else {
        json_chat(state, options).await
    }
}

fn stream_chat(state: AppState, options: ChatRequestOptions) -> Response {
    let (writer, body_stream) = SseWriter::channel(64);

    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ChatEvent>();
        let driver = state.driver.clone();
        let run = tokio::spawn(async move { driver.run(options, tx).await });

        while let Some(event) = rx.recv().await {
            let sent = match &event {
                ChatEvent::Meta {
                    conversation_id,
                    user_message_id,
                } => {
                    writer
                        .send(
                            "meta",
                            &json!({
                                "conversationId": conversation_id,
                                "userMessageId": user_message_id,
                            }),
                        )
                        .await
                }
                ChatEvent::Delta(text) => writer.send("delta", &json!({ "text": text })).await,
                ChatEvent::Tool(tool_event) => {
                    let name = match tool_event {
                        frontclaw_contract::ToolEvent::ToolStart { .. } => "tool_start",
                        frontclaw_contract::ToolEvent::ToolResult { .. } => "tool_result",
                        frontclaw_contract::ToolEvent::ToolError { .. } => "tool_error",
                    };
                    writer.send(name, tool_event).await
                }
                ChatEvent::Done(summary) => {
                    let sent = writer.send("done", summary).await;
                    writer.close();
                    sent
                }
            };
            if !sent {
                // Closed stream: keep draining so the run finishes cleanly.
                continue;
            }
        }

        match run.await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                let (_, payload) = chat_error_response(&err);
                let _ = writer.send("error", &payload).await;
                writer.close();
            }
            Err(join_err) => {
                error!(error = %join_err, "chat task panicked");
                let _ = writer
                    .send("error", &json!({ "success": false, "message": "internal error" }))
                    .await;
                writer.close();
            }
        }
    });

    sse_response(body_stream)
}

async fn json_chat(state: AppState, options: ChatRequestOptions) -> Response {
    // Events are not observable in JSON mode; drop the receiver.
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ChatEvent>();
    drop(rx);

    match state.driver.run(options, tx).await {
        Ok(summary) => {
            let mut payload = json!({
                "success": true,
                "conversationId": summary.conversation_id,
                "response": summary.response,
                "toolCalls": summary.tool_calls,
                "messages": {
                    "user": summary.user_message_id,
                    "assistant": summary.assistant_message_id,
                },
            });
            if let Some(plugin_id) = &summary.intercepted_by {
                payload["interceptedBy"] = json!(plugin_id);
            }
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => {
            let (status, payload) = chat_error_response(&err);
            (status, Json(payload)).into_response()
        }
    }
}

// ── conversations & plugins ───────────────────────────────

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    state
        .store
        .list()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, StatusCode> {
    let messages = state
        .store
        .history(&id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(messages))
}

async fn list_plugins(State(state): State<AppState>) -> Json<Value> {
    let plugins: Vec<Value> = state
        .driver
        .orchestrator()
        .plugins()
        .map(|p| {
            json!({
                "id": p.manifest.id,
                "name": p.manifest.name,
                "version": p.manifest.version.to_string(),
                "priority": p.manifest.priority,
                "tags": p.manifest.tags,
            })
        })
        .collect();
    Json(json!({ "plugins": plugins }))
}

// ── plugin route mount ────────────────────────────────────

async fn plugin_route(
    State(state): State<AppState>,
    Path((plugin_id, path)): Path<(String, String)>,
    method: Method,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_plugin_route(state, plugin_id, format!("/{path}"), method, raw_query, headers, body)
        .await
}

async fn plugin_route_root(
    State(state): State<AppState>,
    Path(plugin_id): Path<String>,
    method: Method,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_plugin_route(state, plugin_id, "/".to_string(), method, raw_query, headers, body)
        .await
}

fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let Some(raw) = raw else {
        return HashMap::new();
    };
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

async fn dispatch_plugin_route(
    state: AppState,
    plugin_id: String,
    path: String,
    method: Method,
    raw_query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

    let body_value = if body.is_empty() {
        None
    } else if let Ok(value) = serde_json::from_slice::<Value>(&body) {
        Some(value)
    } else {
        Some(Value::String(String::from_utf8_lossy(&body).into_owned()))
    };

    let request = PluginHttpRequest {
        method: method.to_string(),
        path,
        headers: header_map,
        query: parse_query(raw_query),
        body: body_value,
    };

    match state
        .driver
        .orchestrator()
        .route_http_request(&plugin_id, request)
        .await
    {
        Ok(plugin_response) => {
            let status =
                StatusCode::from_u16(plugin_response.status).unwrap_or(StatusCode::OK);
            let mut response_headers = HeaderMap::new();
            for (name, value) in &plugin_response.headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::try_from(value.as_str()),
                ) {
                    response_headers.insert(name, value);
                }
            }
            let body = match &plugin_response.body {
                Value::String(text) => text.clone(),
                value => value.to_string(),
            };
            if !response_headers.contains_key(header::CONTENT_TYPE) {
                let content_type = if plugin_response.body.is_string() {
                    "text/plain; charset=utf-8"
                } else {
                    "application/json"
                };
                response_headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            (status, response_headers, body).into_response()
        }
        Err(err) => {
            let status = if err.is(codes::PERMISSION_DENIED) {
                StatusCode::FORBIDDEN
            } else if err.is("PLUGIN_NOT_FOUND") {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(json!({ "success": false, "message": err.message, "code": err.code })),
            )
                .into_response()
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
