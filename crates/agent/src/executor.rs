use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use concierge_core::context::EntityKind;
use concierge_core::memory::{MemoryKey, MemoryKind, MemoryStore};
use concierge_core::state::{
    ConversationState, MessageRole, ToolCallRequest, TurnMessage, MESSAGE_WINDOW,
};
use concierge_core::tools::ToolRegistry;

use crate::extractor::{is_bare_digits, is_confirmation, ContextExtractor};
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient};
use crate::prompts::{PromptBuilder, SituationalContext, UserContext};

const APOLOGY: &str =
    "I hit a problem completing that request. Please try again in a moment.";

/// Runs one specialist agent turn.
///
/// The executor degrades instead of failing: a model error triggers one
/// retry with a minimal prompt, and a second error produces a static
/// apology. Every path records a latency sample and persists memory in the
/// background.
pub struct AgentTurnExecutor {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    memory: Arc<dyn MemoryStore>,
    prompts: PromptBuilder,
    extractor: ContextExtractor,
    memory_ttl: Duration,
}

impl AgentTurnExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        memory: Arc<dyn MemoryStore>,
        memory_ttl: Duration,
    ) -> Self {
        Self {
            llm,
            registry,
            memory,
            prompts: PromptBuilder::new(),
            extractor: ContextExtractor::new(),
            memory_ttl,
        }
    }

    pub async fn run_turn(
        &self,
        kind: EntityKind,
        state: &mut ConversationState,
        situation: &SituationalContext,
    ) -> TurnMessage {
        let agent = kind.agent_name();
        let started = Instant::now();

        // Idempotent, so running it both here and in the routing layer is
        // safe; the intent must reflect the newest user message before the
        // short-circuit decision below.
        if let Some(text) = state.latest_user_text().map(str::to_string) {
            let update = self.extractor.extract(&text, &state.intent);
            state.intent.apply(update);
        }

        let message = if let Some(message) = self.direct_invocation(kind, state) {
            message
        } else {
            self.model_turn(kind, state, situation).await
        };

        state.performance.record(agent, started.elapsed());
        self.persist_memory(state);
        message
    }

    /// A confirmed, fully specified intent skips the model: the pending
    /// operation is turned straight into a tool call.
    fn direct_invocation(&self, kind: EntityKind, state: &ConversationState) -> Option<TurnMessage> {
        if !state.intent.supports_direct_invocation() {
            return None;
        }
        let text = state.latest_user_text()?;
        if !is_confirmation(text) && !is_bare_digits(text) {
            return None;
        }

        let operation = state.intent.operation?;
        let tool_name = operation.name();
        if !self.registry.contains(&tool_name) {
            return None;
        }

        debug!(
            event_name = "turn.direct_invocation",
            agent = kind.agent_name(),
            tool = %tool_name,
        );
        let call = ToolCallRequest {
            id: Uuid::new_v4().to_string(),
            name: tool_name.clone(),
            arguments: json!({
                "entity": state.intent.entity,
                "record_id": state.intent.record_id,
                "request": state.intent.original_request,
            }),
        };
        Some(TurnMessage::assistant_with_calls(
            kind.agent_name(),
            format!("Running {tool_name} as confirmed."),
            vec![call],
        ))
    }

    async fn model_turn(
        &self,
        kind: EntityKind,
        state: &mut ConversationState,
        situation: &SituationalContext,
    ) -> TurnMessage {
        let agent = kind.agent_name();
        let user = UserContext { user_id: state.user_id.clone(), ..UserContext::default() };
        let tool_names = self.tool_names_for(kind);
        let tool_refs: Vec<&str> = tool_names.iter().map(String::as_str).collect();

        let request = ChatRequest {
            system: self.prompts.render(kind, state, &user, situation),
            messages: project_window(state.window(MESSAGE_WINDOW)),
            tools: self.registry.schemas_for(&tool_refs),
        };

        match self.llm.complete(request).await {
            Ok(response) => {
                state.error_recovery.reset();
                response_message(agent, response)
            }
            Err(error) => {
                warn!(event_name = "turn.llm_failed", agent, error = %error);
                state.error_recovery.note_failure(error.to_string());
                self.minimal_retry(kind, state).await
            }
        }
    }

    /// Retry without memory, situation or tools; the smallest request that
    /// can still answer the user.
    async fn minimal_retry(&self, kind: EntityKind, state: &mut ConversationState) -> TurnMessage {
        let agent = kind.agent_name();
        let request = ChatRequest {
            system: format!(
                "You are the {} specialist for a consulting back office. Reply briefly.",
                kind.name()
            ),
            messages: state
                .latest_user_text()
                .map(ChatMessage::user)
                .into_iter()
                .collect(),
            tools: Vec::new(),
        };

        match self.llm.complete(request).await {
            Ok(response) => {
                state.error_recovery.reset();
                response_message(agent, response)
            }
            Err(error) => {
                warn!(event_name = "turn.retry_failed", agent, error = %error);
                state.error_recovery.note_failure(error.to_string());
                TurnMessage::assistant(agent, APOLOGY)
            }
        }
    }

    /// Tools offered to a specialist are the registered ones scoped to its
    /// record category.
    fn tool_names_for(&self, kind: EntityKind) -> Vec<String> {
        self.registry
            .names()
            .into_iter()
            .filter(|name| name.contains(kind.name()))
            .collect()
    }

    /// Memory writes are background work; a failed write never blocks or
    /// fails the turn.
    fn persist_memory(&self, state: &ConversationState) {
        let memory = Arc::clone(&self.memory);
        let ttl = self.memory_ttl;
        let agent = state.current_agent.clone();
        let session_id = state.session_id.clone();
        let user_id = state.user_id.clone();
        let snapshot = state.memory.clone();

        tokio::spawn(async move {
            let entries = [
                (MemoryKind::Summary, serde_json::to_value(&snapshot.summary)),
                (MemoryKind::Preferences, serde_json::to_value(&snapshot.preferences)),
                (MemoryKind::CompletedTasks, serde_json::to_value(&snapshot.completed_tasks)),
            ];
            for (kind, value) in entries {
                let value = match value {
                    Ok(value) => value,
                    Err(error) => {
                        warn!(event_name = "turn.memory_encode_failed", error = %error);
                        continue;
                    }
                };
                let key = MemoryKey::new(agent.clone(), session_id.clone(), user_id.clone(), kind);
                if let Err(error) = memory.set(&key, value, Some(ttl)).await {
                    warn!(
                        event_name = "turn.memory_persist_failed",
                        key = %key.storage_key(),
                        error = %error,
                    );
                }
            }
        });
    }
}

fn response_message(agent: &str, response: ChatResponse) -> TurnMessage {
    let content = response.text.unwrap_or_default();
    if response.tool_calls.is_empty() {
        TurnMessage::assistant(agent, content)
    } else {
        TurnMessage::assistant_with_calls(agent, content, response.tool_calls)
    }
}

/// Transcript entries become chat messages. Tool results have no native
/// slot in the chat shape, so they are re-injected as annotated user turns.
fn project_window(window: &[TurnMessage]) -> Vec<ChatMessage> {
    window
        .iter()
        .map(|message| match message.role {
            MessageRole::User => ChatMessage::user(message.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
            MessageRole::Tool => ChatMessage::user(format!("[tool result] {}", message.content)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use concierge_core::context::{
        ContextUpdate, EntityKind, OperationType, SlotChange, WorkflowVerb,
    };
    use concierge_core::memory::{MemoryKey, MemoryKind, MemoryStore};
    use concierge_core::state::{ConversationState, TurnMessage};
    use concierge_core::tools::{BusinessTool, ToolError, ToolRegistry, ToolResult};
    use concierge_store::memory::InMemoryMemoryStore;

    use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};
    use crate::prompts::SituationalContext;

    use super::AgentTurnExecutor;

    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatResponse::text("out of script")))
        }
    }

    struct NoopTool(&'static str);

    #[async_trait]
    impl BusinessTool for NoopTool {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "test tool"
        }

        fn schema(&self) -> Value {
            json!({ "name": self.0, "parameters": { "type": "object" } })
        }

        async fn invoke(&self, _arguments: Value, _context: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("done"))
        }
    }

    fn registry_fixture() -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(NoopTool("update_contract"));
        registry.register(NoopTool("get_contracts"));
        registry.register(NoopTool("create_client"));
        registry
    }

    fn executor_fixture(llm: Arc<ScriptedLlm>) -> AgentTurnExecutor {
        AgentTurnExecutor::new(
            llm,
            registry_fixture(),
            Arc::new(InMemoryMemoryStore::default()),
            Duration::from_secs(60),
        )
    }

    fn confirmed_update_state() -> ConversationState {
        let mut state =
            ConversationState::new("session-1", "user-9", "update the billing date for contract 2");
        state.intent.apply(ContextUpdate {
            entity: Some(SlotChange::Set("Acme Corp".to_string())),
            record_id: Some(SlotChange::Set(2)),
            operation: Some(SlotChange::Set(OperationType::new(
                WorkflowVerb::Update,
                Some(EntityKind::Contract),
            ))),
            original_request: Some(SlotChange::Set(
                "update the billing date for contract 2".to_string(),
            )),
            ..ContextUpdate::default()
        });
        state
    }

    #[tokio::test]
    async fn confirmed_intent_skips_the_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let executor = executor_fixture(Arc::clone(&llm));
        let mut state = confirmed_update_state();
        state.push(TurnMessage::user("yes"));

        let message =
            executor.run_turn(EntityKind::Contract, &mut state, &SituationalContext::default()).await;

        assert_eq!(llm.request_count(), 0);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "update_contract");
        assert_eq!(message.tool_calls[0].arguments["record_id"], 2);
    }

    #[tokio::test]
    async fn unconfirmed_request_goes_through_the_model_with_scoped_tools() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ChatResponse::text("Which contract?"))]));
        let executor = executor_fixture(Arc::clone(&llm));
        let mut state = confirmed_update_state();
        state.push(TurnMessage::user("what are my options"));

        let message =
            executor.run_turn(EntityKind::Contract, &mut state, &SituationalContext::default()).await;

        assert_eq!(message.content, "Which contract?");
        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        // Only contract-scoped tools are offered.
        let offered: Vec<&str> =
            requests[0].tools.iter().filter_map(|schema| schema["name"].as_str()).collect();
        assert_eq!(offered, ["get_contracts", "update_contract"]);
        assert!(requests[0].system.contains("contract specialist"));
    }

    #[tokio::test]
    async fn model_failure_degrades_to_minimal_retry_then_apology() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Provider("boom".to_string())),
            Ok(ChatResponse::text("short answer")),
        ]));
        let executor = executor_fixture(Arc::clone(&llm));
        let mut state = confirmed_update_state();
        state.push(TurnMessage::user("what are my options"));

        let message =
            executor.run_turn(EntityKind::Contract, &mut state, &SituationalContext::default()).await;
        assert_eq!(message.content, "short answer");
        assert_eq!(llm.request_count(), 2);
        // Recovery state resets once the retry succeeds.
        assert!(!state.error_recovery.in_recovery());

        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Provider("boom".to_string())),
            Err(LlmError::Timeout(Duration::from_secs(30))),
        ]));
        let executor = executor_fixture(Arc::clone(&llm));
        let mut state = confirmed_update_state();
        state.push(TurnMessage::user("what are my options"));

        let message =
            executor.run_turn(EntityKind::Contract, &mut state, &SituationalContext::default()).await;
        assert_eq!(message.content, super::APOLOGY);
        assert_eq!(state.error_recovery.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn every_turn_records_a_latency_sample() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ChatResponse::text("ok"))]));
        let executor = executor_fixture(llm);
        let mut state = confirmed_update_state();
        state.push(TurnMessage::user("what are my options"));

        executor.run_turn(EntityKind::Contract, &mut state, &SituationalContext::default()).await;
        assert_eq!(state.performance.sample_count("contract_agent"), 1);
    }

    #[tokio::test]
    async fn memory_is_persisted_in_the_background() {
        let store = Arc::new(InMemoryMemoryStore::default());
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ChatResponse::text("ok"))]));
        let executor = AgentTurnExecutor::new(
            llm,
            registry_fixture(),
            Arc::clone(&store) as Arc<dyn MemoryStore>,
            Duration::from_secs(60),
        );
        let mut state = confirmed_update_state();
        state.record_handoff("contract_agent", "contract keywords matched");
        state.memory.summary = "billing date work in progress".to_string();
        state.push(TurnMessage::user("what are my options"));

        executor.run_turn(EntityKind::Contract, &mut state, &SituationalContext::default()).await;

        let key = MemoryKey::new("contract_agent", "session-1", "user-9", MemoryKind::Summary);
        let mut stored = None;
        for _ in 0..50 {
            stored = store.get(&key).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stored, Some(json!("billing date work in progress")));
    }
}
