use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::state::ConversationState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Summary,
    Preferences,
    CompletedTasks,
}

impl MemoryKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Preferences => "preferences",
            Self::CompletedTasks => "completed_tasks",
        }
    }
}

/// Composite key for durable agent memory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryKey {
    pub agent_id: String,
    pub session_id: String,
    pub user_id: String,
    pub kind: MemoryKind,
}

impl MemoryKey {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: MemoryKind,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            kind,
        }
    }

    pub fn storage_key(&self) -> String {
        format!(
            "agent_memory:{}:{}:user:{}:{}",
            self.agent_id,
            self.session_id,
            self.user_id,
            self.kind.name()
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("store failure: {0}")]
    Store(String),
}

/// TTL-aware key-value store for agent memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, key: &MemoryKey) -> Result<Option<Value>, MemoryError>;
    /// `ttl` of `None` stores the value without expiry.
    async fn set(&self, key: &MemoryKey, value: Value, ttl: Option<Duration>)
        -> Result<(), MemoryError>;
    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError>;
}

/// Conversation state persistence between turns, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>, MemoryError>;
    async fn save(&self, state: ConversationState) -> Result<(), MemoryError>;
    async fn remove(&self, session_id: &str) -> Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::{MemoryKey, MemoryKind};

    #[test]
    fn storage_key_renders_composite_parts() {
        let key = MemoryKey::new("contract_agent", "session-1", "user-9", MemoryKind::Summary);
        assert_eq!(key.storage_key(), "agent_memory:contract_agent:session-1:user:user-9:summary");
    }
}
