use serde_json::{json, Value};
use tracing::warn;

use concierge_core::context::{IntentContext, WorkflowVerb};
use concierge_core::state::{ToolCallRequest, TurnMessage};
use concierge_core::tools::{ToolRegistry, ToolResult};

/// Executes the tool calls an agent turn requested and turns each outcome
/// into a tool-role transcript message.
///
/// One failing call never aborts the batch; every request gets a result
/// message, in request order, keyed by the originating call id.
pub struct ToolDispatcher {
    registry: ToolRegistry,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        calls: &[ToolCallRequest],
        intent: &IntentContext,
    ) -> Vec<TurnMessage> {
        let context = context_payload(intent);
        let mut messages = Vec::with_capacity(calls.len());

        for call in calls {
            let name = self.consistent_tool_name(call, intent);
            let result = match self.registry.get(&name) {
                Some(tool) => match tool.invoke(call.arguments.clone(), context.clone()).await {
                    Ok(result) => result,
                    Err(error) => {
                        warn!(
                            event_name = "dispatch.tool_failed",
                            tool = %name,
                            error = %error,
                        );
                        ToolResult::error(format!("{name} failed: {error}"))
                    }
                },
                None => {
                    warn!(event_name = "dispatch.unknown_tool", tool = %name);
                    ToolResult::error(format!("no tool named `{name}` is available"))
                }
            };
            messages.push(TurnMessage::tool(call.id.clone(), result.to_payload()));
        }

        messages
    }

    /// A mutating workflow only permits its own mutation. When an agent asks
    /// for a different mutating tool mid-workflow, the call is redirected to
    /// the workflow's canonical tool if that tool is registered.
    fn consistent_tool_name(&self, call: &ToolCallRequest, intent: &IntentContext) -> String {
        let Some(operation) = intent.operation else {
            return call.name.clone();
        };
        if !operation.verb.is_mutating() {
            return call.name.clone();
        }

        let Some(called_verb) = mutating_prefix(&call.name) else {
            // Reads are always safe alongside a pending mutation.
            return call.name.clone();
        };
        if called_verb == operation.verb {
            return call.name.clone();
        }

        let canonical = operation.name();
        if self.registry.contains(&canonical) {
            warn!(
                event_name = "dispatch.redirected",
                requested = %call.name,
                substituted = %canonical,
            );
            canonical
        } else {
            call.name.clone()
        }
    }
}

fn mutating_prefix(tool_name: &str) -> Option<WorkflowVerb> {
    let verb = tool_name.split('_').next()?;
    match verb {
        "update" => Some(WorkflowVerb::Update),
        "delete" => Some(WorkflowVerb::Delete),
        "create" => Some(WorkflowVerb::Create),
        "upload" => Some(WorkflowVerb::Upload),
        _ => None,
    }
}

/// Intent slots handed to every tool so omitted arguments can be filled from
/// conversation context.
fn context_payload(intent: &IntentContext) -> Value {
    json!({
        "entity": intent.entity,
        "record_id": intent.record_id,
        "operation": intent.operation.map(|operation| operation.name()),
        "original_request": intent.original_request,
    })
}
