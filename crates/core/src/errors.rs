use thiserror::Error;

use crate::config::ConfigError;
use crate::memory::MemoryError;
use crate::tools::ToolError;

/// Top-level error surfaced by the orchestration runtime.
///
/// Nothing in the per-turn path is fatal: extraction fails open, routing
/// falls back to the deterministic scorer, agent execution degrades, tool
/// errors are reported per call. What remains here are infrastructure
/// failures the embedding transport has to know about.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("language model failure: {0}")]
    Llm(String),
}

impl OrchestrationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Memory(_) => "Conversation history is temporarily unavailable. Please retry.",
            Self::Tool(_) => "The requested operation could not be completed.",
            Self::Config(_) => "The assistant is misconfigured. Contact an administrator.",
            Self::Llm(_) => {
                "I'm having trouble processing that right now. Please try again in a moment."
            }
        }
    }
}
