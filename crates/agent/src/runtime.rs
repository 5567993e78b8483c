use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use concierge_core::config::AppConfig;
use concierge_core::context::EntityKind;
use concierge_core::errors::OrchestrationError;
use concierge_core::memory::{MemoryError, MemoryStore, SessionStore};
use concierge_core::tools::ToolRegistry;
use concierge_core::state::{ConversationState, TurnMessage, HISTORY_LIMIT, ROUTER_AGENT};
use concierge_orchestration::executor::{ExecutionPlan, ParallelExecutor};

use crate::dispatcher::ToolDispatcher;
use crate::executor::AgentTurnExecutor;
use crate::extractor::ContextExtractor;
use crate::llm::LlmClient;
use crate::prompts::SituationalContext;
use crate::router::{RouteTarget, Router};
use crate::turn::{TurnController, TurnPhase};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Engine(#[from] OrchestrationError),
    #[error("fan-out failed: {0}")]
    FanOut(#[from] concierge_orchestration::executor::ExecutionError),
}

impl From<MemoryError> for RuntimeError {
    fn from(error: MemoryError) -> Self {
        Self::Engine(error.into())
    }
}

impl RuntimeError {
    /// Text safe to show the end user; internals stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Engine(error) => error.user_message(),
            Self::FanOut(_) => "Part of that request could not be completed. Please retry.",
        }
    }
}

/// What one call to the runtime produced: the messages appended during the
/// turn, and which agent holds the conversation now.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub messages: Vec<TurnMessage>,
    pub current_agent: String,
}

/// The engine's front door. One instance serves all sessions.
///
/// A turn is: load or create the session, fold the user text into the intent
/// context, route, then either answer directly (greeting, fallback) or drive
/// the specialist's agent/tool loop until the controller terminates it. The
/// state is persisted before the outcome is returned.
pub struct ConversationRuntime {
    sessions: Arc<dyn SessionStore>,
    router: Router,
    executor: AgentTurnExecutor,
    dispatcher: ToolDispatcher,
    controller: TurnController,
    extractor: ContextExtractor,
    history_limit: usize,
}

impl ConversationRuntime {
    /// Assembles the engine from configuration plus the injected seams: the
    /// model client, the tool registry and the two stores.
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        memory: Arc<dyn MemoryStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let router = if config.routing.use_llm_classifier {
            Router::with_classifier(Arc::clone(&llm))
        } else {
            Router::new()
        };
        let executor = AgentTurnExecutor::new(
            llm,
            registry.clone(),
            memory,
            Duration::from_secs(config.memory.ttl_secs),
        );
        Self::new(
            sessions,
            router,
            executor,
            ToolDispatcher::new(registry),
            TurnController::new(
                config.orchestration.max_tool_dispatches,
                config.orchestration.duplicate_window,
            ),
        )
        .with_history_limit(config.memory.history_limit)
    }

    pub fn new(
        sessions: Arc<dyn SessionStore>,
        router: Router,
        executor: AgentTurnExecutor,
        dispatcher: ToolDispatcher,
        controller: TurnController,
    ) -> Self {
        Self {
            sessions,
            router,
            executor,
            dispatcher,
            controller,
            extractor: ContextExtractor::new(),
            history_limit: HISTORY_LIMIT,
        }
    }

    /// Caps how many transcript entries are kept in persisted session state.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub async fn process_turn(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<TurnOutcome, RuntimeError> {
        let mut state = match self.sessions.load(session_id).await? {
            Some(mut state) => {
                state.push(TurnMessage::user(text));
                state
            }
            None => ConversationState::new(session_id, user_id, text),
        };
        let baseline = state.messages.len();

        let update = self.extractor.extract(text, &state.intent);
        state.intent.apply(update);

        let decision = self.router.route(&mut state).await;
        info!(
            event_name = "runtime.turn",
            session_id,
            target = ?decision.target,
            confidence = ?decision.confidence,
        );

        match decision.target {
            RouteTarget::Greeting => {
                state.push(TurnMessage::assistant(ROUTER_AGENT, capability_summary()));
            }
            RouteTarget::Fallback => {
                state.push(TurnMessage::assistant(ROUTER_AGENT, clarification_request()));
            }
            RouteTarget::Agent(kind) => {
                self.drive_agent(kind, &mut state).await;
            }
        }

        let messages = state.messages[baseline..].to_vec();
        state.truncate_history(self.history_limit);
        self.sessions.save(state.clone()).await?;
        Ok(TurnOutcome { messages, current_agent: state.current_agent })
    }

    /// One request fanned out to several specialists at once, for rollups
    /// that span record categories. Handlers come from the caller; the
    /// runtime contributes state handling and transcripting.
    pub async fn process_fanout_turn(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
        kinds: &[EntityKind],
        fanout: &ParallelExecutor,
    ) -> Result<TurnOutcome, RuntimeError> {
        let mut state = match self.sessions.load(session_id).await? {
            Some(mut state) => {
                state.push(TurnMessage::user(text));
                state
            }
            None => ConversationState::new(session_id, user_id, text),
        };
        let baseline = state.messages.len();

        let agents: Vec<String> =
            kinds.iter().map(|kind| kind.agent_name().to_string()).collect();
        state.active_agents = agents.clone();
        state.collaboration_mode = Some("parallel".to_string());

        let plan = ExecutionPlan::parallel(agents.clone());
        let outcomes = fanout.execute(&plan, &state).await?;

        for agent in &agents {
            if let Some(outcome) = outcomes.get(agent) {
                let content = if outcome.success {
                    outcome
                        .output
                        .as_ref()
                        .map(|output| output.to_string())
                        .unwrap_or_else(|| "done".to_string())
                } else {
                    format!(
                        "{agent} could not contribute: {}",
                        outcome.error.as_deref().unwrap_or("unknown failure")
                    )
                };
                state.push(TurnMessage::assistant(agent.clone(), content));
            }
        }

        state.active_agents.clear();
        state.collaboration_mode = None;
        let messages = state.messages[baseline..].to_vec();
        state.truncate_history(self.history_limit);
        self.sessions.save(state.clone()).await?;
        Ok(TurnOutcome { messages, current_agent: state.current_agent })
    }

    /// The agent/tool loop for one specialist, bounded by the controller.
    async fn drive_agent(&self, kind: EntityKind, state: &mut ConversationState) {
        let situation = SituationalContext::default();
        let mut cycles = 0u32;

        loop {
            let message = self.executor.run_turn(kind, state, &situation).await;
            let calls = message.tool_calls.clone();
            let next = self.controller.after_agent(&message);
            state.push(message);

            match next {
                TurnPhase::Terminated | TurnPhase::AgentActive => break,
                TurnPhase::ToolDispatch => {
                    cycles += 1;
                    debug!(
                        event_name = "runtime.dispatch_cycle",
                        session_id = %state.session_id,
                        cycle = cycles,
                        calls = calls.len(),
                    );
                    let results = self.dispatcher.dispatch(&calls, &state.intent).await;
                    for result in results {
                        state.push(result);
                    }
                    if self.controller.after_dispatch(state, cycles) == TurnPhase::Terminated {
                        break;
                    }
                }
            }
        }
    }
}

fn capability_summary() -> String {
    "Hello! I can help with clients, contracts, employees, deliverables, time tracking \
     and user accounts. Tell me what you need, for example: show me contracts for a \
     client, or update a billing date."
        .to_string()
}

fn clarification_request() -> String {
    "I did not catch which records that concerns. I handle clients, contracts, \
     employees, deliverables, time entries and user accounts. Could you rephrase \
     with a bit more detail?"
        .to_string()
}
