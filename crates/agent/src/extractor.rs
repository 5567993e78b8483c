use tracing::{debug, warn};

use concierge_core::context::{
    ContextUpdate, EntityKind, IntentContext, OperationType, SlotChange, WorkflowVerb,
};

/// Inputs longer than this are treated as anomalous and ignored.
const MAX_INPUT_LEN: usize = 4_000;

/// Company designators that mark the end of an entity name.
const LEGAL_SUFFIXES: [&str; 7] =
    ["Corp", "Inc", "LLC", "Ltd", "Solutions", "Technologies", "Systems"];

/// Captures that are request vocabulary, never entity names.
const ENTITY_EXCLUSIONS: [&str; 12] = [
    "attachment",
    "upload",
    "file",
    "document",
    "details",
    "info",
    "record",
    "contract",
    "client",
    "employee",
    "new",
    "the",
];

/// Record category nouns, scanned in appearance order.
const KIND_NOUNS: [(&str, EntityKind); 14] = [
    ("contract", EntityKind::Contract),
    ("contracts", EntityKind::Contract),
    ("client", EntityKind::Client),
    ("clients", EntityKind::Client),
    ("company", EntityKind::Client),
    ("employee", EntityKind::Employee),
    ("employees", EntityKind::Employee),
    ("deliverable", EntityKind::Deliverable),
    ("deliverables", EntityKind::Deliverable),
    ("milestone", EntityKind::Deliverable),
    ("timesheet", EntityKind::TimeEntry),
    ("hours", EntityKind::TimeEntry),
    ("user", EntityKind::UserAccount),
    ("account", EntityKind::UserAccount),
];

const CONFIRMATION_WORDS: [&str; 12] = [
    "yes",
    "yeah",
    "yep",
    "ok",
    "okay",
    "sure",
    "confirm",
    "confirmed",
    "proceed",
    "go ahead",
    "do it",
    "correct",
];

struct EntityRule {
    name: &'static str,
    matcher: fn(&str) -> Option<String>,
}

/// Derives partial intent-context updates from user text.
///
/// The extractor is an ordered list of named rules; the first entity rule
/// that produces a valid capture wins. It compares every candidate against
/// the existing context so re-running it over the same text is a no-op, and
/// it never fails: anomalous input yields an empty update.
#[derive(Clone, Debug, Default)]
pub struct ContextExtractor;

impl ContextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str, current: &IntentContext) -> ContextUpdate {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_INPUT_LEN {
            warn!(event_name = "extract.anomaly", length = trimmed.len());
            return ContextUpdate::default();
        }

        let mut update = ContextUpdate::default();

        let detected_entity = detect_entity(trimmed);
        if let Some((rule, name)) = &detected_entity {
            if current.entity.as_deref() != Some(name.as_str()) {
                debug!(event_name = "extract.entity", rule, entity = %name);
                update.entity = Some(SlotChange::Set(name.clone()));
                // A new entity invalidates any record id carried over.
                update.record_id = Some(SlotChange::Clear);
            }
        }

        // A message that names an entity is about the entity; digits in it
        // (street numbers, suffixes) are not a record selection.
        if detected_entity.is_none() {
            if let Some(id) = detect_record_id(trimmed) {
                if current.record_id != Some(id) {
                    update.record_id = Some(SlotChange::Set(id));
                }
            }
        }

        let verb = detect_verb(trimmed);
        if let Some(verb) = verb {
            if current.workflow != Some(verb) {
                update.workflow = Some(SlotChange::Set(verb));
            }
        }

        if let Some(verb) = verb {
            if is_new_operation(trimmed) {
                let target = detect_target_kind(trimmed)
                    .or(current.operation.and_then(|operation| operation.target));
                let operation = OperationType::new(verb, target);
                if current.operation != Some(operation) {
                    update.operation = Some(SlotChange::Set(operation));
                }
                if current.original_request.as_deref() != Some(trimmed) {
                    update.original_request = Some(SlotChange::Set(trimmed.to_string()));
                }
            }
        }

        update
    }
}

/// Bare confirmations continue the pending operation instead of starting one.
pub(crate) fn is_confirmation(text: &str) -> bool {
    let normalized = normalize(text);
    CONFIRMATION_WORDS.contains(&normalized.as_str())
}

pub(crate) fn is_bare_digits(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.chars().all(|character| character.is_ascii_digit())
}

fn is_tool_echo(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with("[tool result]")
}

/// A message starts a new operation unless it is a continuation shape:
/// bare digits, a confirmation, or an echo of tool output.
fn is_new_operation(text: &str) -> bool {
    !is_bare_digits(text) && !is_confirmation(text) && !is_tool_echo(text)
}

fn normalize(text: &str) -> String {
    text.trim().trim_end_matches(['.', '!', '?', ',']).to_ascii_lowercase()
}

fn entity_rules() -> [EntityRule; 4] {
    [
        EntityRule { name: "client_keyword", matcher: entity_after_client_keyword },
        EntityRule { name: "record_with", matcher: entity_after_record_with },
        EntityRule { name: "possessive", matcher: entity_from_possessive },
        EntityRule { name: "legal_suffix", matcher: entity_before_legal_suffix },
    ]
}

fn detect_entity(text: &str) -> Option<(&'static str, String)> {
    entity_rules().into_iter().find_map(|rule| {
        (rule.matcher)(text)
            .filter(|candidate| is_plausible_entity(candidate))
            .map(|candidate| (rule.name, candidate))
    })
}

fn entity_after_client_keyword(text: &str) -> Option<String> {
    let words = words_of(text);
    let position = words.iter().position(|word| {
        let lowered = strip_punctuation(word).to_ascii_lowercase();
        lowered == "client" || lowered == "company"
    })?;
    capture_proper_phrase(&words, position + 1)
}

fn entity_after_record_with(text: &str) -> Option<String> {
    let words = words_of(text);
    for index in 1..words.len() {
        if strip_punctuation(words[index]).eq_ignore_ascii_case("with") {
            let preceding = strip_punctuation(words[index - 1]).to_ascii_lowercase();
            let is_record_noun =
                KIND_NOUNS.iter().any(|(noun, _)| *noun == preceding) || preceding == "record";
            if is_record_noun {
                if let Some(captured) = capture_proper_phrase(&words, index + 1) {
                    return Some(captured);
                }
            }
        }
    }
    None
}

fn entity_from_possessive(text: &str) -> Option<String> {
    let words = words_of(text);
    let position = words.iter().position(|word| {
        let stripped = strip_punctuation(word);
        stripped.ends_with("'s") && starts_uppercase(stripped)
    })?;

    let last = strip_punctuation(words[position]);
    let mut parts = vec![last[..last.len() - 2].to_string()];
    let mut index = position;
    while index > 0 {
        let previous = strip_punctuation(words[index - 1]);
        if starts_uppercase(previous) && !is_legal_suffix(previous) {
            parts.insert(0, previous.to_string());
            index -= 1;
        } else {
            break;
        }
    }
    Some(parts.join(" "))
}

fn entity_before_legal_suffix(text: &str) -> Option<String> {
    let words = words_of(text);
    let position = words.iter().position(|word| is_legal_suffix(strip_punctuation(word)))?;
    if position == 0 {
        return None;
    }

    let mut parts = vec![strip_punctuation(words[position]).to_string()];
    let mut index = position;
    let mut captured_name_words = 0;
    while index > 0 && captured_name_words < 3 {
        let previous = strip_punctuation(words[index - 1]);
        if starts_uppercase(previous) && !is_legal_suffix(previous) {
            parts.insert(0, previous.to_string());
            captured_name_words += 1;
            index -= 1;
        } else {
            break;
        }
    }
    if captured_name_words == 0 {
        return None;
    }
    Some(parts.join(" "))
}

/// Up to four consecutive capitalized words starting at `start`; legal
/// suffixes terminate the phrase.
fn capture_proper_phrase(words: &[&str], start: usize) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for word in words.iter().skip(start).take(4) {
        let stripped = strip_punctuation(word);
        if stripped.is_empty() || !starts_uppercase(stripped) {
            break;
        }
        parts.push(stripped.to_string());
        if is_legal_suffix(stripped) {
            break;
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join(" "))
}

fn is_plausible_entity(candidate: &str) -> bool {
    let lowered = candidate.to_ascii_lowercase();
    if ENTITY_EXCLUSIONS.contains(&lowered.as_str()) {
        return false;
    }
    (2..=60).contains(&candidate.len()) && starts_uppercase(candidate)
}

fn detect_record_id(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if is_bare_digits(trimmed) {
        return trimmed.parse().ok();
    }

    let words = words_of(text);
    for (index, word) in words.iter().enumerate() {
        let stripped = strip_punctuation(word);

        if let Some(digits) = stripped.strip_prefix('#') {
            if let Ok(id) = digits.parse() {
                return Some(id);
            }
        }

        let lowered = stripped.to_ascii_lowercase();
        let is_id_marker = matches!(lowered.as_str(), "id" | "number")
            || lowered == "record"
            || KIND_NOUNS.iter().any(|(noun, _)| *noun == lowered);
        if is_id_marker {
            if let Some(next) = words.get(index + 1) {
                let next = strip_punctuation(next);
                if is_bare_digits(next) {
                    if let Ok(id) = next.parse() {
                        return Some(id);
                    }
                }
            }
        }
    }
    None
}

fn detect_verb(text: &str) -> Option<WorkflowVerb> {
    for word in words_of(text) {
        let lowered = strip_punctuation(word).to_ascii_lowercase();
        let verb = match lowered.as_str() {
            "update" | "modify" | "change" | "edit" | "set" => Some(WorkflowVerb::Update),
            "delete" | "remove" => Some(WorkflowVerb::Delete),
            "create" | "add" | "make" | "log" => Some(WorkflowVerb::Create),
            "upload" | "attach" => Some(WorkflowVerb::Upload),
            "show" | "get" | "list" | "display" | "view" | "find" | "fetch" => {
                Some(WorkflowVerb::Show)
            }
            _ => None,
        };
        if verb.is_some() {
            return verb;
        }
    }
    None
}

fn detect_target_kind(text: &str) -> Option<EntityKind> {
    for word in words_of(text) {
        let lowered = strip_punctuation(word).to_ascii_lowercase();
        if let Some((_, kind)) = KIND_NOUNS.iter().find(|(noun, _)| *noun == lowered) {
            return Some(*kind);
        }
    }
    // Billing vocabulary belongs to contracts even when no record noun is
    // spelled out ("update the billing date for Acme Corp").
    let lowered = text.to_ascii_lowercase();
    if ["billing date", "payment terms", "hourly rate", "renewal"]
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        return Some(EntityKind::Contract);
    }
    None
}

fn words_of(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

fn strip_punctuation(word: &str) -> &str {
    word.trim_matches(|character: char| {
        matches!(character, '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '"')
    })
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().is_some_and(|character| character.is_ascii_uppercase())
}

fn is_legal_suffix(word: &str) -> bool {
    LEGAL_SUFFIXES.contains(&word)
}
