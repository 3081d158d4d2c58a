use serde::{Deserialize, Serialize};

pub mod registry;

pub use registry::PendingActionRegistry;

/// Lifecycle state of a pending action.
///
/// Allowed transitions:
/// `AwaitingConfirmation -> {Confirmed, Cancelled, Expired}` and
/// `Confirmed -> {Executed, Failed}`. Everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    AwaitingConfirmation,
    Confirmed,
    Cancelled,
    Executed,
    Failed,
    Expired,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Cancelled | ActionState::Executed | ActionState::Failed | ActionState::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::AwaitingConfirmation => "awaiting_confirmation",
            ActionState::Confirmed => "confirmed",
            ActionState::Cancelled => "cancelled",
            ActionState::Executed => "executed",
            ActionState::Failed => "failed",
            ActionState::Expired => "expired",
        }
    }
}

/// A proposed side-effecting action waiting for explicit user confirmation.
///
/// Owned by the [`PendingActionRegistry`]; sessions reference actions by
/// identifier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub state: ActionState,
    pub created_at: u64,
    pub expires_at: u64,
}

impl PendingAction {
    /// Whether the confirmation window has passed.
    pub fn is_overdue(&self, now: u64) -> bool {
        self.state == ActionState::AwaitingConfirmation && now >= self.expires_at
    }
}
