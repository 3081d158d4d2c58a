use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::utils::time::now_secs;

pub mod store;

pub use store::{MemorySessionStore, SessionStore};

/// One immutable record of a user input and the system's response.
///
/// Turns are append-only; ordering is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: u64,
    pub user_input: String,
    pub agent_response: String,
    pub tools_invoked: Vec<String>,
    pub success: bool,
}

impl ConversationTurn {
    pub fn new(user_input: &str, agent_response: &str, tools_invoked: Vec<String>, success: bool) -> Self {
        Self {
            timestamp: now_secs(),
            user_input: user_input.to_string(),
            agent_response: agent_response.to_string(),
            tools_invoked,
            success,
        }
    }
}

/// Durable conversational context scoped to one user interaction stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub active: bool,
    pub preferences: HashMap<String, String>,
    pub turns: Vec<ConversationTurn>,
    /// Identifiers of actions awaiting confirmation. The registry owns the
    /// action objects themselves.
    pub pending_action_ids: Vec<String>,
}

impl Session {
    pub fn new(user_id: &str, preferences: HashMap<String, String>) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            active: true,
            preferences,
            turns: Vec::new(),
            pending_action_ids: Vec::new(),
        }
    }

    /// Aggregate statistics over the conversation history.
    pub fn stats(&self) -> SessionStats {
        let turn_count = self.turns.len();
        let successful_turns = self.turns.iter().filter(|t| t.success).count();
        let mut tool_usage: HashMap<String, u64> = HashMap::new();
        for turn in &self.turns {
            for tool in &turn.tools_invoked {
                *tool_usage.entry(tool.clone()).or_insert(0) += 1;
            }
        }
        SessionStats {
            turn_count,
            successful_turns,
            tool_usage,
            last_activity: self.last_activity,
        }
    }
}

/// Aggregate view over a session's history, returned by `get session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub turn_count: usize,
    pub successful_turns: usize,
    pub tool_usage: HashMap<String, u64>,
    pub last_activity: u64,
}
