use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::actions::PendingAction;
use crate::error::CoreResult;
use crate::session::ConversationTurn;

pub mod keyword;

pub use keyword::{default_rules, IntentRule, KeywordResolver};

/// An action proposed by the intent resolver, not yet registered or executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub kind: String,
    pub parameters: Value,
    /// Tagged at the resolver boundary from the confirmation policy table.
    /// The orchestrator re-applies its own table before acting, so a
    /// misbehaving resolver cannot auto-execute a guarded kind.
    pub needs_confirmation: bool,
}

/// What a command string resolved to.
#[derive(Debug, Clone)]
pub enum ResolvedIntent {
    /// A direct answer with no side-effecting action.
    Answer(String),
    /// One or more proposed actions.
    Actions(Vec<ProposedAction>),
    /// The command continues or cancels an already-pending action
    /// (a "yes"/"no" style reply).
    PendingReference { action_id: String, confirmed: bool },
}

/// Turns a command plus conversational context into a [`ResolvedIntent`].
///
/// The production implementation is an external language model; the core
/// depends only on this contract.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(
        &self,
        command: &str,
        history: &[ConversationTurn],
        pending: &[PendingAction],
        preferences: &HashMap<String, String>,
    ) -> CoreResult<ResolvedIntent>;
}
