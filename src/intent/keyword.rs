//! Deterministic keyword intent resolver.
//!
//! Scores each registered rule against the command tokens and proposes one
//! action per matching rule. Stands in for the external language model in
//! development and tests; production deployments swap in a model-backed
//! [`IntentResolver`](super::IntentResolver) behind the same trait.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::actions::PendingAction;
use crate::error::CoreResult;
use crate::session::ConversationTurn;

use super::{IntentResolver, ProposedAction, ResolvedIntent};

const KEYWORD_WEIGHT: f64 = 3.0;
const VERB_WEIGHT: f64 = 2.0;
const OBJECT_WEIGHT: f64 = 2.0;
const EXAMPLE_WEIGHT: f64 = 4.0;
/// A rule proposes an action only at or above this score.
const SCORE_THRESHOLD: f64 = 3.0;
/// Bare replies longer than this are treated as new commands, not
/// confirmations.
const MAX_REPLY_TOKENS: usize = 4;

const CONFIRM_WORDS: &[&str] = &["yes", "confirm", "approve", "ok", "okay", "sure", "send"];
const CANCEL_WORDS: &[&str] = &["no", "cancel", "stop", "deny", "abort", "nevermind"];

/// Matching metadata for one action kind.
#[derive(Debug, Clone)]
pub struct IntentRule {
    pub kind: String,
    pub keywords: Vec<String>,
    pub verbs: Vec<String>,
    pub objects: Vec<String>,
    pub examples: Vec<String>,
}

/// Rules for the built-in capabilities.
pub fn default_rules() -> Vec<IntentRule> {
    vec![
        IntentRule {
            kind: "email".to_string(),
            keywords: vec!["email".into(), "mail".into()],
            verbs: vec!["send".into(), "write".into(), "compose".into()],
            objects: vec!["message".into(), "email".into()],
            examples: vec!["send an email to".into(), "email someone".into()],
        },
        IntentRule {
            kind: "note".to_string(),
            keywords: vec!["note".into(), "memo".into(), "remember".into()],
            verbs: vec!["take".into(), "create".into(), "jot".into()],
            objects: vec!["note".into(), "memo".into()],
            examples: vec!["take a note".into(), "remember that".into()],
        },
    ]
}

pub struct KeywordResolver {
    rules: Vec<IntentRule>,
    confirmation: HashMap<String, bool>,
}

impl KeywordResolver {
    /// Create a resolver. Rule strings are lowercased at registration.
    pub fn new(rules: Vec<IntentRule>, confirmation: HashMap<String, bool>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| IntentRule {
                kind: rule.kind,
                keywords: lowercase_all(rule.keywords),
                verbs: lowercase_all(rule.verbs),
                objects: lowercase_all(rule.objects),
                examples: lowercase_all(rule.examples),
            })
            .collect();
        Self { rules, confirmation }
    }

    fn needs_confirmation(&self, kind: &str) -> bool {
        self.confirmation.get(kind).copied().unwrap_or(true)
    }

    fn score(rule: &IntentRule, tokens: &[String], text: &str) -> f64 {
        let mut score = 0.0;
        score += count_matches(&rule.keywords, tokens) as f64 * KEYWORD_WEIGHT;
        score += count_matches(&rule.verbs, tokens) as f64 * VERB_WEIGHT;
        score += count_matches(&rule.objects, tokens) as f64 * OBJECT_WEIGHT;
        score += rule.examples.iter().filter(|e| text.contains(e.as_str())).count() as f64
            * EXAMPLE_WEIGHT;
        score
    }
}

#[async_trait]
impl IntentResolver for KeywordResolver {
    async fn resolve(
        &self,
        command: &str,
        _history: &[ConversationTurn],
        pending: &[PendingAction],
        _preferences: &HashMap<String, String>,
    ) -> CoreResult<ResolvedIntent> {
        let text = command.trim().to_lowercase();
        let tokens: Vec<String> = text.split_whitespace().map(|s| s.to_string()).collect();

        // Bare confirm/cancel replies continue the newest pending action.
        if let Some(reference) = reply_reference(&tokens, pending) {
            return Ok(reference);
        }

        let mut actions: Vec<ProposedAction> = Vec::new();
        for rule in &self.rules {
            if Self::score(rule, &tokens, &text) >= SCORE_THRESHOLD {
                actions.push(ProposedAction {
                    kind: rule.kind.clone(),
                    parameters: extract_parameters(&rule.kind, command, &tokens),
                    needs_confirmation: self.needs_confirmation(&rule.kind),
                });
            }
        }

        if actions.is_empty() {
            let kinds: Vec<&str> = self.rules.iter().map(|r| r.kind.as_str()).collect();
            return Ok(ResolvedIntent::Answer(format!(
                "I didn't recognize an action in that. I can help with: {}.",
                kinds.join(", ")
            )));
        }
        Ok(ResolvedIntent::Actions(actions))
    }
}

fn reply_reference(tokens: &[String], pending: &[PendingAction]) -> Option<ResolvedIntent> {
    if pending.is_empty() || tokens.is_empty() || tokens.len() > MAX_REPLY_TOKENS {
        return None;
    }
    let first = tokens[0].trim_end_matches(['.', '!', ',']);
    let confirmed = if CONFIRM_WORDS.contains(&first) {
        true
    } else if CANCEL_WORDS.contains(&first) {
        false
    } else {
        return None;
    };
    let newest = pending.iter().max_by_key(|a| (a.created_at, a.id.clone()))?;
    Some(ResolvedIntent::PendingReference {
        action_id: newest.id.clone(),
        confirmed,
    })
}

fn extract_parameters(kind: &str, command: &str, tokens: &[String]) -> Value {
    match kind {
        "email" => {
            let mut parameters = serde_json::Map::new();
            if let Some(address) = tokens
                .iter()
                .map(|t| t.trim_end_matches(['.', ',', '!', '?']))
                .find(|t| t.contains('@') && t.len() > 2)
            {
                parameters.insert("to".to_string(), json!(address));
            }
            if let Some(subject) = segment_after(command, "about ") {
                parameters.insert("subject".to_string(), json!(subject));
            }
            if let Some(body) = segment_after(command, "saying ") {
                parameters.insert("body".to_string(), json!(body));
            }
            Value::Object(parameters)
        }
        "note" => json!({"content": strip_note_prefix(command)}),
        _ => json!({"text": command}),
    }
}

/// Everything after the first occurrence of `marker`, trimmed.
fn segment_after(text: &str, marker: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let index = lower.find(marker)?;
    let rest = text[index + marker.len()..].trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

fn strip_note_prefix(command: &str) -> String {
    let trimmed = command.trim();
    let lower = trimmed.to_lowercase();
    for prefix in ["take a note that ", "take a note ", "note that ", "remember that ", "remember "] {
        if lower.starts_with(prefix) {
            return trimmed[prefix.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}

fn count_matches(candidates: &[String], tokens: &[String]) -> usize {
    candidates.iter().filter(|c| tokens.contains(c)).count()
}
