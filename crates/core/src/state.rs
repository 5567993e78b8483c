use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::IntentContext;

/// Messages sent to the language model are limited to this many transcript
/// entries.
pub const MESSAGE_WINDOW: usize = 10;
/// Per-agent latency samples retained.
pub const LATENCY_SAMPLES: usize = 10;
/// Completed tasks retained in conversation memory.
pub const COMPLETED_TASK_LIMIT: usize = 20;
/// Transcript entries retained in persisted session state.
pub const HISTORY_LIMIT: usize = 50;

pub const ROUTER_AGENT: &str = "router";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by an agent turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: MessageRole,
    pub content: String,
    /// Agent that produced the message, for assistant turns.
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Id of the originating call, for tool result turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl TurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            agent: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            agent: Some(agent.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_calls(
        agent: impl Into<String>,
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            agent: Some(agent.into()),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            agent: None,
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub description: String,
    pub agent: String,
    pub completed_at: DateTime<Utc>,
}

/// Durable conversation memory carried across turns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub summary: String,
    pub preferences: BTreeMap<String, String>,
    pub completed_tasks: VecDeque<CompletedTask>,
}

impl AgentMemory {
    pub fn record_completed(&mut self, description: impl Into<String>, agent: impl Into<String>) {
        self.completed_tasks.push_back(CompletedTask {
            description: description.into(),
            agent: agent.into(),
            completed_at: Utc::now(),
        });
        while self.completed_tasks.len() > COMPLETED_TASK_LIMIT {
            self.completed_tasks.pop_front();
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecovery {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub fallback_agent: Option<String>,
}

impl ErrorRecovery {
    pub fn note_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.last_error = None;
        self.fallback_agent = None;
    }

    pub fn in_recovery(&self) -> bool {
        self.consecutive_failures > 0
    }
}

/// Bounded per-agent latency samples, in milliseconds, oldest evicted first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceLog {
    samples: HashMap<String, VecDeque<u64>>,
}

impl PerformanceLog {
    pub fn record(&mut self, agent: &str, elapsed: std::time::Duration) {
        let samples = self.samples.entry(agent.to_string()).or_default();
        samples.push_back(elapsed.as_millis() as u64);
        while samples.len() > LATENCY_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn average_millis(&self, agent: &str) -> Option<f64> {
        let samples = self.samples.get(agent)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }

    pub fn sample_count(&self, agent: &str) -> usize {
        self.samples.get(agent).map_or(0, VecDeque::len)
    }
}

/// Full per-session conversation state.
///
/// Ownership rules: `current_agent`, `previous_agent` and `handoff_reason`
/// are written only through `record_handoff` by the routing layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<TurnMessage>,
    pub current_agent: String,
    pub previous_agent: Option<String>,
    pub handoff_reason: Option<String>,
    pub interaction_count: u64,
    pub intent: IntentContext,
    pub memory: AgentMemory,
    pub error_recovery: ErrorRecovery,
    pub active_agents: Vec<String>,
    pub collaboration_mode: Option<String>,
    pub performance: PerformanceLog,
}

impl ConversationState {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        seed_text: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: vec![TurnMessage::user(seed_text)],
            current_agent: ROUTER_AGENT.to_string(),
            previous_agent: None,
            handoff_reason: None,
            interaction_count: 0,
            intent: IntentContext::default(),
            memory: AgentMemory::default(),
            error_recovery: ErrorRecovery::default(),
            active_agents: Vec::new(),
            collaboration_mode: None,
            performance: PerformanceLog::default(),
        }
    }

    pub fn push(&mut self, message: TurnMessage) {
        self.messages.push(message);
    }

    /// The trailing slice of the transcript shown to the language model.
    pub fn window(&self, limit: usize) -> &[TurnMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    /// Drops the oldest transcript entries so at most `limit` remain.
    pub fn truncate_history(&mut self, limit: usize) {
        if self.messages.len() > limit {
            let excess = self.messages.len() - limit;
            self.messages.drain(..excess);
        }
    }

    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.as_str())
    }

    pub fn latest_message(&self) -> Option<&TurnMessage> {
        self.messages.last()
    }

    pub fn record_handoff(&mut self, to: impl Into<String>, reason: impl Into<String>) {
        let to = to.into();
        if to != self.current_agent {
            self.previous_agent = Some(std::mem::replace(&mut self.current_agent, to));
        }
        self.handoff_reason = Some(reason.into());
        self.interaction_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        ConversationState, MessageRole, PerformanceLog, TurnMessage, COMPLETED_TASK_LIMIT,
        LATENCY_SAMPLES,
    };

    fn state_fixture() -> ConversationState {
        ConversationState::new("session-1", "user-9", "show me contracts for client Acme Corp")
    }

    #[test]
    fn new_state_seeds_one_user_message_and_router_agent() {
        let state = state_fixture();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, MessageRole::User);
        assert_eq!(state.current_agent, "router");
        assert_eq!(state.interaction_count, 0);
    }

    #[test]
    fn window_returns_trailing_slice() {
        let mut state = state_fixture();
        for index in 0..15 {
            state.push(TurnMessage::assistant("contract_agent", format!("reply {index}")));
        }

        let window = state.window(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[9].content, "reply 14");
    }

    #[test]
    fn truncate_history_keeps_the_newest_entries() {
        let mut state = state_fixture();
        for index in 0..9 {
            state.push(TurnMessage::assistant("contract_agent", format!("reply {index}")));
        }

        state.truncate_history(4);
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[3].content, "reply 8");

        // A transcript shorter than the limit is left alone.
        state.truncate_history(10);
        assert_eq!(state.messages.len(), 4);
    }

    #[test]
    fn record_handoff_tracks_previous_agent_and_counter() {
        let mut state = state_fixture();
        state.record_handoff("contract_agent", "contract keywords matched");

        assert_eq!(state.current_agent, "contract_agent");
        assert_eq!(state.previous_agent.as_deref(), Some("router"));
        assert_eq!(state.handoff_reason.as_deref(), Some("contract keywords matched"));
        assert_eq!(state.interaction_count, 1);

        state.record_handoff("contract_agent", "confirmation continuation");
        assert_eq!(state.previous_agent.as_deref(), Some("router"));
        assert_eq!(state.interaction_count, 2);
    }

    #[test]
    fn latency_ring_buffer_is_bounded() {
        let mut log = PerformanceLog::default();
        for index in 0..20u64 {
            log.record("contract_agent", Duration::from_millis(index));
        }

        assert_eq!(log.sample_count("contract_agent"), LATENCY_SAMPLES);
        // Oldest samples evicted, remaining are 10..=19.
        assert_eq!(log.average_millis("contract_agent"), Some(14.5));
    }

    #[test]
    fn completed_tasks_are_bounded() {
        let mut state = state_fixture();
        for index in 0..(COMPLETED_TASK_LIMIT + 5) {
            state.memory.record_completed(format!("task {index}"), "contract_agent");
        }
        assert_eq!(state.memory.completed_tasks.len(), COMPLETED_TASK_LIMIT);
        assert_eq!(state.memory.completed_tasks.front().map(|t| t.description.as_str()), Some("task 5"));
    }

    #[test]
    fn latest_user_text_skips_assistant_and_tool_messages() {
        let mut state = state_fixture();
        state.push(TurnMessage::assistant("contract_agent", "which contract?"));
        state.push(TurnMessage::user("2"));
        state.push(TurnMessage::tool("call-1", "{\"success\":true}"));

        assert_eq!(state.latest_user_text(), Some("2"));
    }
}
