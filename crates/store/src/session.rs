use std::collections::HashMap;

use tokio::sync::RwLock;

use concierge_core::memory::{MemoryError, SessionStore};
use concierge_core::state::ConversationState;

/// Keeps conversation state between turns, keyed by session id.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ConversationState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>, MemoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, state: ConversationState) -> Result<(), MemoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(state.session_id.clone(), state);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), MemoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::memory::SessionStore;
    use concierge_core::state::{ConversationState, TurnMessage};

    use super::InMemorySessionStore;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = InMemorySessionStore::new();
        let mut state = ConversationState::new("session-1", "user-9", "hello");
        state.push(TurnMessage::assistant("client_agent", "hi there"));

        store.save(state.clone()).await.expect("save");
        let loaded = store.load("session-1").await.expect("load");
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn missing_session_loads_as_none() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.load("absent").await.expect("load"), None);
    }

    #[tokio::test]
    async fn remove_forgets_the_session() {
        let store = InMemorySessionStore::new();
        store
            .save(ConversationState::new("session-1", "user-9", "hello"))
            .await
            .expect("save");
        store.remove("session-1").await.expect("remove");
        assert_eq!(store.load("session-1").await.expect("load"), None);
        assert_eq!(store.len().await, 0);
    }
}
