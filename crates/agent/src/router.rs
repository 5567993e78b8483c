use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use concierge_core::context::{ContextUpdate, EntityKind, IntentContext, OperationType};
use concierge_core::state::ConversationState;

use crate::extractor::{is_bare_digits, is_confirmation};
use crate::llm::{ChatMessage, ChatRequest, LlmClient};

const KEYWORD_WEIGHT: f64 = 2.0;
const PHRASE_WEIGHT: f64 = 3.0;
const CONTEXT_WEIGHT: f64 = 2.5;

const GREETING_WORDS: [&str; 7] = ["hello", "hi", "hey", "howdy", "thanks", "thank", "good"];

const LEGAL_SUFFIXES: [&str; 7] =
    ["Corp", "Inc", "LLC", "Ltd", "Solutions", "Technologies", "Systems"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Agent(EntityKind),
    /// Handled by the routing layer itself with a capability summary.
    Greeting,
    /// No specialist matched; the user is asked to clarify.
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingDecision {
    pub target: RouteTarget,
    pub confidence: Confidence,
    pub reasoning: String,
    pub operation: Option<OperationType>,
}

/// Routes each user message to a specialist agent.
///
/// Resolution order: greeting shapes, confirmation continuations, lexical
/// overrides, the optional model classifier, then the weighted keyword
/// scorer. Every stage that can fail falls through to the next; the scorer
/// always produces a decision.
pub struct Router {
    classifier: Option<Arc<dyn LlmClient>>,
}

impl Router {
    pub fn new() -> Self {
        Self { classifier: None }
    }

    pub fn with_classifier(classifier: Arc<dyn LlmClient>) -> Self {
        Self { classifier: Some(classifier) }
    }

    /// Classifies the newest user message and records the handoff.
    pub async fn route(&self, state: &mut ConversationState) -> RoutingDecision {
        let text = state.latest_user_text().unwrap_or_default().to_string();
        let decision = self.classify(&text, state).await;

        debug!(
            event_name = "route.decision",
            session_id = %state.session_id,
            target = ?decision.target,
            confidence = ?decision.confidence,
            reasoning = %decision.reasoning,
        );

        if let RouteTarget::Agent(kind) = decision.target {
            state.record_handoff(kind.agent_name(), decision.reasoning.clone());
            state
                .intent
                .apply(ContextUpdate { routing_completed: Some(true), ..ContextUpdate::default() });
        }
        decision
    }

    /// Pure classification, without side effects on the state.
    pub async fn classify(&self, text: &str, state: &ConversationState) -> RoutingDecision {
        let intent = &state.intent;

        if is_greeting(text) {
            return RoutingDecision {
                target: RouteTarget::Greeting,
                confidence: Confidence::High,
                reasoning: "standalone greeting".to_string(),
                operation: intent.operation,
            };
        }

        if let Some(decision) = continuation_decision(text, state) {
            return decision;
        }

        if let Some(decision) = lexical_override(text, intent) {
            return decision;
        }

        if let Some(classifier) = &self.classifier {
            match classify_with_model(classifier.as_ref(), text).await {
                Ok(kind) => {
                    return RoutingDecision {
                        target: RouteTarget::Agent(kind),
                        confidence: Confidence::High,
                        reasoning: format!("model classifier chose {}", kind.agent_name()),
                        operation: intent.operation,
                    };
                }
                Err(reason) => {
                    warn!(event_name = "route.classifier_failed", reason = %reason);
                }
            }
        }

        score_decision(text, state)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Bare confirmations and record selections stay with the agent already
/// driving the pending work. A recorded operation or a recorded workflow verb
/// both count as pending; a confirmation never moves the conversation to a
/// different agent.
fn continuation_decision(text: &str, state: &ConversationState) -> Option<RoutingDecision> {
    if !is_confirmation(text) && !is_bare_digits(text) {
        return None;
    }
    let intent = &state.intent;
    let pending = intent
        .operation
        .map(|operation| operation.name())
        .or_else(|| intent.workflow.map(|verb| verb.name().to_string()))?;
    let kind = agent_kind(&state.current_agent)
        .or_else(|| intent.operation.and_then(|operation| operation.target))?;
    Some(RoutingDecision {
        target: RouteTarget::Agent(kind),
        confidence: Confidence::High,
        reasoning: format!("continuation of pending {pending}"),
        operation: intent.operation,
    })
}

/// Phrasings with one unambiguous reading skip the scorer entirely.
fn lexical_override(text: &str, intent: &IntentContext) -> Option<RoutingDecision> {
    let lowered = text.to_ascii_lowercase();
    let decision = |kind: EntityKind, reasoning: &str| RoutingDecision {
        target: RouteTarget::Agent(kind),
        confidence: Confidence::High,
        reasoning: reasoning.to_string(),
        operation: intent.operation,
    };

    let mentions_upload = lowered.contains("upload") || lowered.contains("attach");
    if mentions_upload && (lowered.contains("employee") || lowered.contains("resume")) {
        return Some(decision(EntityKind::Employee, "employee document upload phrasing"));
    }

    let mentions_create =
        lowered.contains("create") || lowered.contains("new") || lowered.contains("draft");
    if mentions_create && (lowered.contains("contract") || lowered.contains("agreement")) {
        return Some(decision(EntityKind::Contract, "contract creation phrasing"));
    }

    if lowered.contains("client details") || lowered.contains("client info") {
        return Some(decision(EntityKind::Client, "client detail phrasing"));
    }

    None
}

async fn classify_with_model(classifier: &dyn LlmClient, text: &str) -> Result<EntityKind, String> {
    let agents: Vec<&str> = EntityKind::all().iter().map(|kind| kind.agent_name()).collect();
    let request = ChatRequest {
        system: format!(
            "Classify the user request to exactly one agent. Answer with the agent name \
             only. Agents: {}.",
            agents.join(", ")
        ),
        messages: vec![ChatMessage::user(text)],
        tools: Vec::new(),
    };

    let response = classifier.complete(request).await.map_err(|error| error.to_string())?;
    let answer = response.text.unwrap_or_default();
    let answer = answer.trim().trim_end_matches('.').to_ascii_lowercase();

    EntityKind::all()
        .into_iter()
        .find(|kind| answer == kind.agent_name() || answer == kind.name())
        .ok_or_else(|| format!("answer `{answer}` is not a known agent"))
}

fn score_decision(text: &str, state: &ConversationState) -> RoutingDecision {
    let intent = &state.intent;
    let mut scores = score_kinds(text, state);
    scores.sort_by(|left, right| right.1.total_cmp(&left.1));

    let (best, best_score) = scores[0];
    let runner_up = scores[1].1;

    if best_score == 0.0 {
        return RoutingDecision {
            target: RouteTarget::Fallback,
            confidence: Confidence::Low,
            reasoning: "no specialist matched the request".to_string(),
            operation: intent.operation,
        };
    }

    let margin = best_score - runner_up;
    let confidence = if best_score >= 5.0 && margin >= 3.0 {
        Confidence::High
    } else if margin < 1.0 {
        Confidence::Low
    } else {
        Confidence::Medium
    };

    RoutingDecision {
        target: RouteTarget::Agent(best),
        confidence,
        reasoning: format!(
            "{} scored {best_score:.1}, runner-up {runner_up:.1}",
            best.agent_name()
        ),
        operation: intent.operation,
    }
}

fn score_kinds(text: &str, state: &ConversationState) -> Vec<(EntityKind, f64)> {
    let lowered = text.to_ascii_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let intent = &state.intent;

    let mut scores: Vec<(EntityKind, f64)> = EntityKind::all()
        .into_iter()
        .map(|kind| {
            let lexicon = kind_lexicon(kind);
            let mut score = 0.0;
            for keyword in lexicon.keywords {
                if words.iter().any(|word| word.trim_matches(punctuation) == *keyword) {
                    score += KEYWORD_WEIGHT;
                }
            }
            for phrase in lexicon.phrases {
                if lowered.contains(phrase) {
                    score += PHRASE_WEIGHT;
                }
            }
            if intent.operation.and_then(|operation| operation.target) == Some(kind) {
                score += CONTEXT_WEIGHT;
            }
            if agent_kind(&state.current_agent) == Some(kind) {
                score += CONTEXT_WEIGHT;
            }
            (kind, score)
        })
        .collect();

    apply_adjustments(text, &lowered, &mut scores);
    scores
}

struct KindLexicon {
    keywords: &'static [&'static str],
    phrases: &'static [&'static str],
}

fn kind_lexicon(kind: EntityKind) -> KindLexicon {
    match kind {
        EntityKind::Client => KindLexicon {
            keywords: &["client", "clients", "company", "customer", "address", "industry"],
            phrases: &["new client", "billing address", "point of contact"],
        },
        EntityKind::Contract => KindLexicon {
            keywords: &[
                "contract",
                "contracts",
                "agreement",
                "terms",
                "rate",
                "billing",
                "payment",
                "renewal",
                "scope",
            ],
            phrases: &[
                "billing date",
                "payment terms",
                "hourly rate",
                "statement of work",
                "contracts for",
            ],
        },
        EntityKind::Employee => KindLexicon {
            keywords: &["employee", "employees", "staff", "hire", "salary", "resume", "onboarding"],
            phrases: &["team member", "new hire", "employee record"],
        },
        EntityKind::Deliverable => KindLexicon {
            keywords: &[
                "deliverable",
                "deliverables",
                "milestone",
                "milestones",
                "task",
                "delivery",
                "due",
            ],
            phrases: &["due date", "job details", "project milestone"],
        },
        EntityKind::TimeEntry => KindLexicon {
            keywords: &["time", "hours", "timesheet", "timesheets", "logged", "overtime"],
            phrases: &["time entry", "log hours", "hours worked"],
        },
        EntityKind::UserAccount => KindLexicon {
            keywords: &["user", "account", "login", "password", "email", "permissions", "access"],
            phrases: &["user account", "reset password", "sign in"],
        },
    }
}

/// Cross-category corrections the flat lexicons cannot express.
fn apply_adjustments(text: &str, lowered: &str, scores: &mut [(EntityKind, f64)]) {
    let mentions_employee = lowered.contains("employee") || lowered.contains("staff");
    if mentions_employee {
        // "company" and "record" vocabulary otherwise drags these to client.
        bump(scores, EntityKind::Employee, 5.0);
        scale(scores, EntityKind::Client, 0.5);
    }

    if looks_like_person_name(text) {
        bump(scores, EntityKind::Employee, 4.0);
    }

    let mentions_update =
        lowered.contains("update") || lowered.contains("change") || lowered.contains("modify");
    if mentions_update && (lowered.contains("billing") || lowered.contains("contract")) {
        bump(scores, EntityKind::Contract, 3.0);
    }

    let mentions_create =
        lowered.contains("create") || lowered.contains("new") || lowered.contains("add");
    if mentions_create && lowered.contains("job details") {
        bump(scores, EntityKind::Deliverable, 2.0);
    }

    // Creating a contract names the client, rates and scope; those mentions
    // must not pull the request towards the client agent.
    if mentions_create && distinct_kind_mentions(lowered) >= 2 {
        bump(scores, EntityKind::Contract, 8.0);
        scale(scores, EntityKind::Client, 0.3);
    }
}

fn bump(scores: &mut [(EntityKind, f64)], kind: EntityKind, amount: f64) {
    if let Some(entry) = scores.iter_mut().find(|(candidate, _)| *candidate == kind) {
        entry.1 += amount;
    }
}

fn scale(scores: &mut [(EntityKind, f64)], kind: EntityKind, factor: f64) {
    if let Some(entry) = scores.iter_mut().find(|(candidate, _)| *candidate == kind) {
        entry.1 *= factor;
    }
}

fn distinct_kind_mentions(lowered: &str) -> usize {
    [
        ("client", EntityKind::Client),
        ("contract", EntityKind::Contract),
        ("employee", EntityKind::Employee),
        ("deliverable", EntityKind::Deliverable),
        ("hours", EntityKind::TimeEntry),
        ("user", EntityKind::UserAccount),
    ]
    .iter()
    .filter(|(noun, _)| lowered.contains(noun))
    .count()
}

/// Two consecutive capitalized words past the start of the message, neither a
/// company designator.
fn looks_like_person_name(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.windows(2).enumerate().any(|(index, pair)| {
        if index == 0 {
            return false;
        }
        let first = pair[0].trim_matches(punctuation).trim_end_matches("'s");
        let second = pair[1].trim_matches(punctuation).trim_end_matches("'s");
        starts_uppercase(first)
            && starts_uppercase(second)
            && !LEGAL_SUFFIXES.contains(&first)
            && !LEGAL_SUFFIXES.contains(&second)
            && !words[index - 1].eq_ignore_ascii_case("client")
            && !words[index - 1].eq_ignore_ascii_case("company")
    })
}

fn is_greeting(text: &str) -> bool {
    let lowered = text.trim().trim_end_matches(['.', '!', '?', ',']).to_ascii_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.is_empty() || words.len() > 4 {
        return false;
    }
    if !GREETING_WORDS.contains(&words[0]) {
        return false;
    }
    // "hi, update the contract" is a request, not a greeting.
    words.iter().all(|word| !is_business_word(word))
}

fn is_business_word(word: &str) -> bool {
    EntityKind::all().into_iter().any(|kind| {
        let lexicon = kind_lexicon(kind);
        lexicon.keywords.contains(&word)
    })
}

fn agent_kind(agent: &str) -> Option<EntityKind> {
    EntityKind::all().into_iter().find(|kind| kind.agent_name() == agent)
}

fn punctuation(character: char) -> bool {
    matches!(character, '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '"')
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().is_some_and(|character| character.is_ascii_uppercase())
}
