//! Conversation persistence contract.
//!
//! The real chat store is an external collaborator; this is the surface the
//! driver consumes, plus an in-memory implementation for development and
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch an existing conversation or create a fresh one. `Some(id)` that
    /// does not exist is an error, not an implicit create.
    async fn get_or_create(&self, id: Option<&str>) -> Result<Conversation, StoreError>;

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<(), StoreError>;

    async fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        metadata: Value,
    ) -> Result<StoredMessage, StoreError>;

    /// Messages of one conversation, oldest first.
    async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    async fn list(&self) -> Result<Vec<Conversation>, StoreError>;
}

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<String, Conversation>,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(&self, id: Option<&str>) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.write().await;
        match id {
            Some(id) => inner
                .conversations
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string())),
            None => {
                let conversation = Conversation {
                    id: Uuid::new_v4().to_string(),
                    title: None,
                    created_at: Utc::now(),
                };
                inner
                    .conversations
                    .insert(conversation.id.clone(), conversation.clone());
                Ok(conversation)
            }
        }
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        conversation.title = Some(title.to_string());
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        metadata: Value,
    ) -> Result<StoredMessage, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(conversation_id) {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.read().await;
        let mut conversations: Vec<Conversation> =
            inner.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(conversations)
    }
}
