//! Core types for the concierge conversation orchestration engine.
//!
//! This crate defines the shared vocabulary the rest of the workspace builds
//! on: per-session `ConversationState`, the typed `IntentContext` the
//! extractor and turn controller negotiate over, the `BusinessTool` contract
//! and registry, the memory store seams, and application configuration.
//!
//! Nothing here talks to a language model or a network. Behavior lives in
//! `concierge-agent`; this crate only fixes the data model and the traits at
//! the seams.

pub mod config;
pub mod context;
pub mod errors;
pub mod memory;
pub mod state;
pub mod tools;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use context::{
    ContextUpdate, EntityKind, IntentContext, OperationType, SlotChange, WorkflowVerb,
};
pub use errors::OrchestrationError;
pub use memory::{MemoryError, MemoryKey, MemoryKind, MemoryStore, SessionStore};
pub use state::{
    AgentMemory, CompletedTask, ConversationState, ErrorRecovery, MessageRole, PerformanceLog,
    ToolCallRequest, TurnMessage, COMPLETED_TASK_LIMIT, LATENCY_SAMPLES, MESSAGE_WINDOW,
    ROUTER_AGENT,
};
pub use tools::{BusinessTool, ToolError, ToolRegistry, ToolResult};
