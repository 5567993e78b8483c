use std::collections::HashMap;

use tracing::{debug, warn};

use concierge_core::state::{ConversationState, MessageRole, TurnMessage};
use concierge_core::tools::ToolResult;

/// Where a turn goes next after an agent or dispatch step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    AgentActive,
    ToolDispatch,
    Terminated,
}

/// Decides when the agent/tool loop inside one user turn stops.
///
/// Three stop conditions: the dispatch-cycle ceiling, a tool call repeated
/// more than twice inside the recent transcript window, and the successful
/// completion of a mutating operation. Anything else loops back to the agent
/// so it can read the tool results.
pub struct TurnController {
    max_dispatch_cycles: u32,
    duplicate_window: usize,
}

impl TurnController {
    pub fn new(max_dispatch_cycles: u32, duplicate_window: usize) -> Self {
        Self { max_dispatch_cycles: max_dispatch_cycles.max(1), duplicate_window }
    }

    pub fn after_agent(&self, message: &TurnMessage) -> TurnPhase {
        if message.tool_calls.is_empty() {
            TurnPhase::Terminated
        } else {
            TurnPhase::ToolDispatch
        }
    }

    pub fn after_dispatch(&self, state: &mut ConversationState, cycles: u32) -> TurnPhase {
        if cycles >= self.max_dispatch_cycles {
            warn!(
                event_name = "turn.cycle_ceiling",
                session_id = %state.session_id,
                cycles,
            );
            return TurnPhase::Terminated;
        }

        if let Some((name, repeats)) = self.repeated_call(state) {
            warn!(
                event_name = "turn.repeated_call",
                session_id = %state.session_id,
                tool = %name,
                repeats,
            );
            return TurnPhase::Terminated;
        }

        if self.mutation_succeeded(state) {
            let description = state
                .intent
                .operation
                .map(|operation| operation.name())
                .unwrap_or_else(|| "operation".to_string());
            debug!(
                event_name = "turn.operation_complete",
                session_id = %state.session_id,
                operation = %description,
            );
            let agent = state.current_agent.clone();
            state.memory.record_completed(description, agent);
            state.intent.clear_after_success();
            return TurnPhase::Terminated;
        }

        TurnPhase::AgentActive
    }

    /// A (tool, arguments) pair seen more than twice in the recent window
    /// means the agent is looping.
    fn repeated_call(&self, state: &ConversationState) -> Option<(String, usize)> {
        let mut counts: HashMap<(String, String), usize> = HashMap::new();
        for message in state.window(self.duplicate_window) {
            for call in &message.tool_calls {
                let key = (call.name.clone(), call.arguments.to_string());
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .find(|(_, count)| *count > 2)
            .map(|((name, _), count)| (name, count))
    }

    /// True when the pending operation mutates a record and any result in the
    /// just-appended dispatch batch (the trailing run of tool messages)
    /// reports success.
    fn mutation_succeeded(&self, state: &ConversationState) -> bool {
        if !state.intent.operation.is_some_and(|operation| operation.verb.is_mutating()) {
            return false;
        }
        state
            .messages
            .iter()
            .rev()
            .take_while(|message| message.role == MessageRole::Tool)
            .filter_map(|message| ToolResult::from_payload(&message.content))
            .any(|result| result.success)
    }
}
