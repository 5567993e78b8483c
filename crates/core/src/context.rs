use serde::{Deserialize, Serialize};

/// Business record categories the specialist agents operate on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Contract,
    Employee,
    Deliverable,
    TimeEntry,
    UserAccount,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Contract => "contract",
            Self::Employee => "employee",
            Self::Deliverable => "deliverable",
            Self::TimeEntry => "time_entry",
            Self::UserAccount => "user_account",
        }
    }

    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Client => "client_agent",
            Self::Contract => "contract_agent",
            Self::Employee => "employee_agent",
            Self::Deliverable => "deliverable_agent",
            Self::TimeEntry => "time_agent",
            Self::UserAccount => "user_agent",
        }
    }

    pub fn all() -> [EntityKind; 6] {
        [
            Self::Client,
            Self::Contract,
            Self::Employee,
            Self::Deliverable,
            Self::TimeEntry,
            Self::UserAccount,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowVerb {
    Update,
    Delete,
    Create,
    Upload,
    Show,
}

impl WorkflowVerb {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Create => "create",
            Self::Upload => "upload",
            Self::Show => "show",
        }
    }

    /// Verbs that act on one existing record and therefore need a record id.
    pub fn requires_record_id(&self) -> bool {
        matches!(self, Self::Update | Self::Delete | Self::Upload)
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Show)
    }
}

/// A verb paired with the record category it targets, e.g. `update_contract`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationType {
    pub verb: WorkflowVerb,
    pub target: Option<EntityKind>,
}

impl OperationType {
    pub fn new(verb: WorkflowVerb, target: Option<EntityKind>) -> Self {
        Self { verb, target }
    }

    pub fn name(&self) -> String {
        match self.target {
            Some(target) => format!("{}_{}", self.verb.name(), target.name()),
            None => self.verb.name().to_string(),
        }
    }
}

/// One change to a single context slot. Deletion is explicit data, never a
/// sentinel value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SlotChange<T> {
    Set(T),
    Clear,
}

/// Partial update produced by the context extractor. Slots absent from the
/// update are left untouched when applied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub entity: Option<SlotChange<String>>,
    pub record_id: Option<SlotChange<u64>>,
    pub workflow: Option<SlotChange<WorkflowVerb>>,
    pub operation: Option<SlotChange<OperationType>>,
    pub original_request: Option<SlotChange<String>>,
    pub routing_completed: Option<bool>,
}

impl ContextUpdate {
    pub fn is_empty(&self) -> bool {
        self.entity.is_none()
            && self.record_id.is_none()
            && self.workflow.is_none()
            && self.operation.is_none()
            && self.original_request.is_none()
            && self.routing_completed.is_none()
    }
}

/// Typed, versioned view of what the conversation is currently about.
///
/// `entity` is the business record name in play (e.g. a client name),
/// `record_id` a numeric record reference, `operation` the workflow the user
/// is driving. Every applied update bumps `version`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentContext {
    pub entity: Option<String>,
    pub record_id: Option<u64>,
    pub workflow: Option<WorkflowVerb>,
    pub operation: Option<OperationType>,
    pub original_request: Option<String>,
    pub routing_completed: bool,
    pub version: u64,
}

impl IntentContext {
    /// Applies a partial update. Returns whether anything changed.
    ///
    /// Invariant: a record id never survives an entity switch. The extractor
    /// emits the clear explicitly, and it is enforced again here in case an
    /// update sets a new entity without one.
    pub fn apply(&mut self, update: ContextUpdate) -> bool {
        if update.is_empty() {
            return false;
        }

        if let Some(SlotChange::Set(name)) = &update.entity {
            if self.entity.as_deref() != Some(name.as_str()) {
                self.record_id = None;
            }
        }

        match update.entity {
            Some(SlotChange::Set(value)) => self.entity = Some(value),
            Some(SlotChange::Clear) => self.entity = None,
            None => {}
        }
        match update.record_id {
            Some(SlotChange::Set(value)) => self.record_id = Some(value),
            Some(SlotChange::Clear) => self.record_id = None,
            None => {}
        }
        match update.workflow {
            Some(SlotChange::Set(value)) => self.workflow = Some(value),
            Some(SlotChange::Clear) => self.workflow = None,
            None => {}
        }
        match update.operation {
            Some(SlotChange::Set(value)) => self.operation = Some(value),
            Some(SlotChange::Clear) => self.operation = None,
            None => {}
        }
        match update.original_request {
            Some(SlotChange::Set(value)) => self.original_request = Some(value),
            Some(SlotChange::Clear) => self.original_request = None,
            None => {}
        }
        if let Some(flag) = update.routing_completed {
            self.routing_completed = flag;
        }

        self.version += 1;
        true
    }

    /// Drops the transient slots once a mutating operation has completed, so
    /// the next request starts from a clean slate.
    pub fn clear_after_success(&mut self) {
        self.entity = None;
        self.record_id = None;
        self.workflow = None;
        self.operation = None;
        self.original_request = None;
        self.routing_completed = false;
        self.version += 1;
    }

    /// Whether the context alone identifies a concrete action: operation and
    /// entity present, plus a record id when the verb is record-scoped.
    pub fn supports_direct_invocation(&self) -> bool {
        let Some(operation) = &self.operation else {
            return false;
        };
        if self.entity.is_none() {
            return false;
        }
        if operation.verb.requires_record_id() && self.record_id.is_none() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextUpdate, EntityKind, IntentContext, OperationType, SlotChange, WorkflowVerb};

    fn context_fixture() -> IntentContext {
        let mut context = IntentContext::default();
        context.apply(ContextUpdate {
            entity: Some(SlotChange::Set("Acme Corp".to_string())),
            record_id: Some(SlotChange::Set(2)),
            workflow: Some(SlotChange::Set(WorkflowVerb::Update)),
            operation: Some(SlotChange::Set(OperationType::new(
                WorkflowVerb::Update,
                Some(EntityKind::Contract),
            ))),
            original_request: Some(SlotChange::Set("update the billing date".to_string())),
            routing_completed: Some(true),
        });
        context
    }

    #[test]
    fn entity_switch_clears_record_id_even_without_explicit_clear() {
        let mut context = context_fixture();
        assert_eq!(context.record_id, Some(2));

        context.apply(ContextUpdate {
            entity: Some(SlotChange::Set("Globex Inc".to_string())),
            ..ContextUpdate::default()
        });

        assert_eq!(context.entity.as_deref(), Some("Globex Inc"));
        assert_eq!(context.record_id, None);
    }

    #[test]
    fn re_setting_same_entity_keeps_record_id() {
        let mut context = context_fixture();
        context.apply(ContextUpdate {
            entity: Some(SlotChange::Set("Acme Corp".to_string())),
            ..ContextUpdate::default()
        });
        assert_eq!(context.record_id, Some(2));
    }

    #[test]
    fn empty_update_is_a_no_op_and_keeps_version() {
        let mut context = context_fixture();
        let version = context.version;
        assert!(!context.apply(ContextUpdate::default()));
        assert_eq!(context.version, version);
    }

    #[test]
    fn clear_after_success_drops_transient_slots() {
        let mut context = context_fixture();
        context.clear_after_success();

        assert_eq!(context.entity, None);
        assert_eq!(context.record_id, None);
        assert_eq!(context.operation, None);
        assert_eq!(context.original_request, None);
        assert!(!context.routing_completed);
    }

    #[test]
    fn direct_invocation_requires_record_id_for_record_scoped_verbs() {
        let mut context = context_fixture();
        assert!(context.supports_direct_invocation());

        context.record_id = None;
        assert!(!context.supports_direct_invocation());

        context.operation =
            Some(OperationType::new(WorkflowVerb::Create, Some(EntityKind::Contract)));
        assert!(context.supports_direct_invocation());
    }

    #[test]
    fn operation_names_render_snake_case() {
        let operation = OperationType::new(WorkflowVerb::Update, Some(EntityKind::Contract));
        assert_eq!(operation.name(), "update_contract");

        let untargeted = OperationType::new(WorkflowVerb::Show, None);
        assert_eq!(untargeted.name(), "show");

        let upload = OperationType::new(WorkflowVerb::Upload, Some(EntityKind::Employee));
        assert_eq!(upload.name(), "upload_employee");
    }
}
