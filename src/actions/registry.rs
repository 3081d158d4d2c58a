//! Registry of actions awaiting confirmation, with guarded state transitions.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::tools::ToolResult;
use crate::utils::time::now_secs;

use super::{ActionState, PendingAction};

/// Tracks actions awaiting confirmation, keyed by action identifier.
///
/// All transitions happen under one lock and check the current state first,
/// so `resolve` and `mark_executed` behave as compare-and-set: exactly one
/// concurrent caller moves an action out of a given state, everyone else
/// observes `InvalidTransition`. That guard is what makes execution
/// at-most-once even when a confirm request races the expiry sweep.
pub struct PendingActionRegistry {
    actions: Mutex<HashMap<String, PendingAction>>,
}

impl PendingActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new action in `AwaitingConfirmation` with the given ttl.
    pub fn register(
        &self,
        session_id: &str,
        kind: &str,
        parameters: serde_json::Value,
        ttl_seconds: u64,
    ) -> CoreResult<PendingAction> {
        let now = now_secs();
        let action = PendingAction {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            kind: kind.to_string(),
            parameters,
            state: ActionState::AwaitingConfirmation,
            created_at: now,
            expires_at: now + ttl_seconds,
        };
        let mut actions = self.lock()?;
        actions.insert(action.id.clone(), action.clone());
        Ok(action)
    }

    /// Look up an action, lazily expiring it if its window has passed.
    pub fn get(&self, action_id: &str) -> CoreResult<PendingAction> {
        let mut actions = self.lock()?;
        let action = actions
            .get_mut(action_id)
            .ok_or_else(|| CoreError::ActionNotFound(action_id.to_string()))?;
        expire_if_overdue(action);
        Ok(action.clone())
    }

    /// Transition `AwaitingConfirmation -> Confirmed | Cancelled`.
    pub fn resolve(&self, action_id: &str, confirmed: bool) -> CoreResult<PendingAction> {
        let target = if confirmed {
            ActionState::Confirmed
        } else {
            ActionState::Cancelled
        };
        self.transition(action_id, ActionState::AwaitingConfirmation, target)
    }

    /// Transition `Confirmed -> Executed | Failed` based on the tool result.
    pub fn mark_executed(&self, action_id: &str, result: &ToolResult) -> CoreResult<PendingAction> {
        let target = if result.success {
            ActionState::Executed
        } else {
            ActionState::Failed
        };
        self.transition(action_id, ActionState::Confirmed, target)
    }

    /// Transition `AwaitingConfirmation -> Expired` once past the window.
    pub fn expire(&self, action_id: &str) -> CoreResult<PendingAction> {
        let mut actions = self.lock()?;
        let action = actions
            .get_mut(action_id)
            .ok_or_else(|| CoreError::ActionNotFound(action_id.to_string()))?;
        if action.state != ActionState::AwaitingConfirmation {
            return Err(invalid_transition(action, ActionState::Expired));
        }
        if !action.is_overdue(now_secs()) {
            return Err(CoreError::InvalidInput(format!(
                "action {action_id} has not reached its expiry timestamp"
            )));
        }
        action.state = ActionState::Expired;
        Ok(action.clone())
    }

    /// Eager expiry pass; also purges terminal records past their window.
    /// Returns the number of actions expired.
    pub fn sweep(&self) -> CoreResult<usize> {
        let now = now_secs();
        let mut actions = self.lock()?;
        let mut expired = 0;
        for action in actions.values_mut() {
            if action.is_overdue(now) {
                action.state = ActionState::Expired;
                expired += 1;
            }
        }
        actions.retain(|_, action| !(action.state.is_terminal() && now >= action.expires_at));
        Ok(expired)
    }

    /// Cancel every action still awaiting confirmation for a session.
    ///
    /// Called when the owning session is deleted: orphaned actions become
    /// deterministically cancelled rather than lingering until expiry.
    pub fn cancel_for_session(&self, session_id: &str) -> CoreResult<usize> {
        let mut actions = self.lock()?;
        let mut cancelled = 0;
        for action in actions.values_mut() {
            if action.session_id == session_id && action.state == ActionState::AwaitingConfirmation {
                action.state = ActionState::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Actions still awaiting confirmation for a session, oldest first.
    pub fn pending_for_session(&self, session_id: &str) -> CoreResult<Vec<PendingAction>> {
        let mut actions = self.lock()?;
        let mut pending: Vec<PendingAction> = actions
            .values_mut()
            .filter(|action| action.session_id == session_id)
            .map(|action| {
                expire_if_overdue(action);
                action.clone()
            })
            .filter(|action| action.state == ActionState::AwaitingConfirmation)
            .collect();
        pending.sort_by_key(|action| (action.created_at, action.id.clone()));
        Ok(pending)
    }

    fn transition(
        &self,
        action_id: &str,
        expected: ActionState,
        target: ActionState,
    ) -> CoreResult<PendingAction> {
        let mut actions = self.lock()?;
        let action = actions
            .get_mut(action_id)
            .ok_or_else(|| CoreError::ActionNotFound(action_id.to_string()))?;
        expire_if_overdue(action);
        if action.state != expected {
            return Err(invalid_transition(action, target));
        }
        action.state = target;
        Ok(action.clone())
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, HashMap<String, PendingAction>>> {
        self.actions
            .lock()
            .map_err(|_| CoreError::Internal("pending action registry lock poisoned".to_string()))
    }
}

impl Default for PendingActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn expire_if_overdue(action: &mut PendingAction) {
    if action.is_overdue(now_secs()) {
        action.state = ActionState::Expired;
    }
}

fn invalid_transition(action: &PendingAction, attempted: ActionState) -> CoreError {
    CoreError::InvalidTransition {
        action_id: action.id.clone(),
        from: action.state.as_str().to_string(),
        attempted: attempted.as_str().to_string(),
    }
}
