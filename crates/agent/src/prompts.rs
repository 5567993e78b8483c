use std::fmt::Write as _;

use concierge_core::context::EntityKind;
use concierge_core::state::ConversationState;

/// Who is on the other end of the conversation.
#[derive(Clone, Debug, Default)]
pub struct UserContext {
    pub user_id: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AttachmentInfo {
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: u64,
}

/// Per-turn facts that are not part of the durable conversation state.
#[derive(Clone, Debug, Default)]
pub struct SituationalContext {
    pub attachments: Vec<AttachmentInfo>,
    pub pending_confirmation: bool,
    pub notes: Vec<String>,
}

/// Assembles specialist system prompts from static role templates plus the
/// live conversation state. Rendering is pure string work; it never fails.
#[derive(Clone, Debug, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        kind: EntityKind,
        state: &ConversationState,
        user: &UserContext,
        situation: &SituationalContext,
    ) -> String {
        let mut prompt = String::from(base_template(kind));

        let _ = write!(prompt, "\n\n## USER CONTEXT\nUser id: {}", user.user_id);
        if let Some(name) = &user.display_name {
            let _ = write!(prompt, "\nName: {name}");
        }
        if let Some(role) = &user.role {
            let _ = write!(prompt, "\nRole: {role}");
        }

        prompt.push_str("\n\n## CONVERSATION MEMORY");
        if state.memory.summary.is_empty() {
            prompt.push_str("\nNo summary yet.");
        } else {
            let _ = write!(prompt, "\nSummary: {}", state.memory.summary);
        }
        for (key, value) in &state.memory.preferences {
            let _ = write!(prompt, "\nPreference {key}: {value}");
        }
        for task in state.memory.completed_tasks.iter().rev().take(5) {
            let _ = write!(prompt, "\nRecently completed ({}): {}", task.agent, task.description);
        }

        prompt.push_str("\n\n## CURRENT SITUATION");
        let intent = &state.intent;
        if let Some(entity) = &intent.entity {
            let _ = write!(prompt, "\nEntity in focus: {entity}");
        }
        if let Some(record_id) = intent.record_id {
            let _ = write!(prompt, "\nSelected record id: {record_id}");
        }
        if let Some(operation) = &intent.operation {
            let _ = write!(prompt, "\nPending operation: {}", operation.name());
        }
        if let Some(request) = &intent.original_request {
            let _ = write!(prompt, "\nOriginal request: {request}");
        }
        if state.error_recovery.in_recovery() {
            let _ = write!(
                prompt,
                "\nRecovering from {} failed attempt(s); keep the reply short and concrete.",
                state.error_recovery.consecutive_failures
            );
        }
        for attachment in &situation.attachments {
            let _ = write!(
                prompt,
                "\nAttachment: {} ({}, {} bytes)",
                attachment.file_name, attachment.media_type, attachment.size_bytes
            );
        }
        if situation.pending_confirmation {
            prompt.push_str("\nThe user was just asked to confirm; treat a bare yes as consent.");
        }
        for note in &situation.notes {
            let _ = write!(prompt, "\nNote: {note}");
        }

        prompt.push_str(
            "\n\n## EXECUTION INSTRUCTIONS\n\
             Use the provided tools to act; never invent record data.\n\
             Take one action per turn and report its outcome plainly.\n\
             Ask before any destructive change unless the user already confirmed.",
        );

        prompt
    }
}

fn base_template(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Client => {
            "You are the client specialist for a consulting back office. You look up, \
             create and update client companies: names, contacts, addresses and industry."
        }
        EntityKind::Contract => {
            "You are the contract specialist for a consulting back office. You manage \
             contracts between clients and the firm: rates, billing dates, payment terms \
             and scope."
        }
        EntityKind::Employee => {
            "You are the employee specialist for a consulting back office. You manage \
             employee records, onboarding documents and uploaded files such as resumes."
        }
        EntityKind::Deliverable => {
            "You are the deliverable specialist for a consulting back office. You track \
             project deliverables, their due dates and completion status."
        }
        EntityKind::TimeEntry => {
            "You are the time-tracking specialist for a consulting back office. You record \
             and summarize hours logged against contracts and deliverables."
        }
        EntityKind::UserAccount => {
            "You are the account specialist for a consulting back office. You manage user \
             accounts, emails, permissions and password resets."
        }
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::context::{ContextUpdate, EntityKind, OperationType, SlotChange, WorkflowVerb};
    use concierge_core::state::ConversationState;

    use super::{AttachmentInfo, PromptBuilder, SituationalContext, UserContext};

    fn state_fixture() -> ConversationState {
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

    #[test]
    fn prompt_carries_intent_slots_and_sections() {
        let state = state_fixture();
        let user = UserContext { user_id: "user-9".to_string(), ..UserContext::default() };
        let prompt = PromptBuilder::new().render(
            EntityKind::Contract,
            &state,
            &user,
            &SituationalContext::default(),
        );

        assert!(prompt.contains("contract specialist"));
        assert!(prompt.contains("## USER CONTEXT"));
        assert!(prompt.contains("Entity in focus: Acme Corp"));
        assert!(prompt.contains("Selected record id: 2"));
        assert!(prompt.contains("Pending operation: update_contract"));
        assert!(prompt.contains("## EXECUTION INSTRUCTIONS"));
    }

    #[test]
    fn attachments_and_confirmation_show_in_the_situation_section() {
        let state = state_fixture();
        let user = UserContext { user_id: "user-9".to_string(), ..UserContext::default() };
        let situation = SituationalContext {
            attachments: vec![AttachmentInfo {
                file_name: "resume.pdf".to_string(),
                media_type: "application/pdf".to_string(),
                size_bytes: 18_432,
            }],
            pending_confirmation: true,
            notes: vec!["record locked by another session".to_string()],
        };

        let mut state = state;
        state.error_recovery.note_failure("tool timeout");
        let prompt = PromptBuilder::new().render(EntityKind::Employee, &state, &user, &situation);
        assert!(prompt.contains("Attachment: resume.pdf (application/pdf, 18432 bytes)"));
        assert!(prompt.contains("Recovering from 1 failed attempt(s)"));
        assert!(prompt.contains("treat a bare yes as consent"));
        assert!(prompt.contains("Note: record locked by another session"));
    }

    #[test]
    fn memory_summary_renders_with_recent_tasks() {
        let mut state = state_fixture();
        state.memory.summary = "User manages the Acme Corp account.".to_string();
        state.memory.preferences.insert("tone".to_string(), "brief".to_string());
        state.memory.record_completed("updated billing date on contract 2", "contract_agent");

        let user = UserContext { user_id: "user-9".to_string(), ..UserContext::default() };
        let prompt = PromptBuilder::new().render(
            EntityKind::Contract,
            &state,
            &user,
            &SituationalContext::default(),
        );

        assert!(prompt.contains("Summary: User manages the Acme Corp account."));
        assert!(prompt.contains("Preference tone: brief"));
        assert!(prompt.contains("Recently completed (contract_agent): updated billing date on contract 2"));
    }
}
