//! Conversation engine: routing, specialist turns, tool dispatch.
//!
//! The pipeline for one user message is extractor -> router -> agent turn
//! executor -> tool dispatcher, looped under the turn controller and fronted
//! by [`runtime::ConversationRuntime`]. Everything model-facing goes through
//! the [`llm::LlmClient`] seam so the engine itself stays provider-free.

pub mod dispatcher;
pub mod executor;
pub mod extractor;
pub mod llm;
pub mod prompts;
pub mod router;
pub mod runtime;
pub mod turn;

pub use dispatcher::ToolDispatcher;
pub use executor::AgentTurnExecutor;
pub use extractor::ContextExtractor;
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError};
pub use prompts::{AttachmentInfo, PromptBuilder, SituationalContext, UserContext};
pub use router::{Confidence, RouteTarget, Router, RoutingDecision};
pub use runtime::{ConversationRuntime, RuntimeError, TurnOutcome};
pub use turn::{TurnController, TurnPhase};
