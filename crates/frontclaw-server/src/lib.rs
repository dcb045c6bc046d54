//! The chat-facing half of the frontclaw host.
//!
//! Glues the orchestrator, the LLM provider, and conversation persistence
//! behind a streaming HTTP surface: `POST /api/v1/chat` (SSE or JSON) plus
//! the plugin route mount at `/api/v1/p/{pluginId}/*`.

pub mod chat;
pub mod config;
pub mod http;
pub mod llm;
pub mod persistence;
pub mod sse;
pub mod title;

pub use chat::{ChatDriver, ChatError, ChatEvent, ChatRequestOptions, ChatSummary};
pub use config::ServerConfig;
pub use http::{router, AppState};
pub use llm::{ChatDelta, ChatMessage, ChatModel, ChatRole, LlmError, ModelRequest, ToolCallRequest, ToolSpec};
pub use persistence::{Conversation, ConversationStore, InMemoryConversationStore, StoredMessage};
pub use sse::SseWriter;
