//! Uniform response envelope shared by every operation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::actions::PendingAction;
use crate::core::CoreResponse;
use crate::utils::time::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Response,
    ActionCompleted,
    ConfirmationRequired,
    Error,
}

/// Envelope for all operations:
/// `{ success, type, message, data?, error?, timestamp }`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiEnvelope {
    pub fn ok(response_type: ResponseType, message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            response_type,
            message: message.into(),
            data: Some(data),
            error: None,
            timestamp: now_rfc3339(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            response_type: ResponseType::Error,
            message: message.into(),
            data: None,
            error: Some(code.into()),
            timestamp: now_rfc3339(),
        }
    }
}

/// Pending action as exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiPendingAction {
    pub id: String,
    pub kind: String,
    #[schema(value_type = Object)]
    pub parameters: Value,
    pub state: String,
    pub expires_at: u64,
}

impl From<PendingAction> for ApiPendingAction {
    fn from(action: PendingAction) -> Self {
        Self {
            id: action.id,
            kind: action.kind,
            parameters: action.parameters,
            state: action.state.as_str().to_string(),
            expires_at: action.expires_at,
        }
    }
}

impl From<CoreResponse> for ApiEnvelope {
    fn from(response: CoreResponse) -> Self {
        match response {
            CoreResponse::Answer { session_id, message } => Self::ok(
                ResponseType::Response,
                message,
                json!({"session_id": session_id}),
            ),
            CoreResponse::ConfirmationRequired {
                session_id,
                message,
                pending,
                completed,
            } => {
                let pending: Vec<ApiPendingAction> =
                    pending.into_iter().map(ApiPendingAction::from).collect();
                Self::ok(
                    ResponseType::ConfirmationRequired,
                    message,
                    json!({
                        "session_id": session_id,
                        "pending_actions": pending,
                        "completed": completed,
                    }),
                )
            }
            CoreResponse::ActionCompleted {
                session_id,
                message,
                results,
            } => Self::ok(
                ResponseType::ActionCompleted,
                message,
                json!({"session_id": session_id, "results": results}),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionState;
    use crate::tools::ToolResult;

    #[test]
    fn answer_maps_to_response_type() {
        let envelope = ApiEnvelope::from(CoreResponse::Answer {
            session_id: "s1".to_string(),
            message: "hi".to_string(),
        });
        assert!(envelope.success);
        assert_eq!(envelope.response_type, ResponseType::Response);
        assert_eq!(envelope.data.unwrap()["session_id"], json!("s1"));
        assert!(envelope.error.is_none());
    }

    #[test]
    fn confirmation_required_exposes_pending_actions() {
        let envelope = ApiEnvelope::from(CoreResponse::ConfirmationRequired {
            session_id: "s1".to_string(),
            message: "confirm".to_string(),
            pending: vec![PendingAction {
                id: "a1".to_string(),
                session_id: "s1".to_string(),
                kind: "email".to_string(),
                parameters: json!({"to": "a@b.com"}),
                state: ActionState::AwaitingConfirmation,
                created_at: 1,
                expires_at: 301,
            }],
            completed: vec![],
        });
        assert_eq!(envelope.response_type, ResponseType::ConfirmationRequired);
        let data = envelope.data.unwrap();
        assert_eq!(data["pending_actions"][0]["id"], json!("a1"));
        assert_eq!(data["pending_actions"][0]["kind"], json!("email"));
        assert_eq!(
            data["pending_actions"][0]["parameters"],
            json!({"to": "a@b.com"})
        );
        assert_eq!(
            data["pending_actions"][0]["state"],
            json!("awaiting_confirmation")
        );
    }

    #[test]
    fn action_completed_carries_results() {
        let envelope = ApiEnvelope::from(CoreResponse::ActionCompleted {
            session_id: "s1".to_string(),
            message: "done".to_string(),
            results: vec![ToolResult::ok("email", json!({"sent": true}), 12)],
        });
        assert_eq!(envelope.response_type, ResponseType::ActionCompleted);
        let data = envelope.data.unwrap();
        assert_eq!(data["results"][0]["tool"], json!("email"));
        assert_eq!(data["results"][0]["success"], json!(true));
    }

    #[test]
    fn error_envelope_has_code_and_no_data() {
        let envelope = ApiEnvelope::error("SESSION_NOT_FOUND", "session not found: s1");
        assert!(!envelope.success);
        assert_eq!(envelope.response_type, ResponseType::Error);
        assert_eq!(envelope.error.as_deref(), Some("SESSION_NOT_FOUND"));
        assert!(envelope.data.is_none());
    }
}
