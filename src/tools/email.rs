//! Email capability: the confirmation-required reference integration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::Capability;

pub const KIND: &str = "email";

/// An email accepted for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub message_id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends email on the user's behalf.
///
/// The transport behind this seam is an external integration; this
/// implementation accepts messages into an in-memory outbox so the
/// confirmation flow can be exercised end to end.
#[derive(Clone, Default)]
pub struct EmailCapability {
    outbox: Arc<Mutex<Vec<OutboundEmail>>>,
}

impl EmailCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of accepted messages, oldest first.
    pub fn outbox(&self) -> Vec<OutboundEmail> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Capability for EmailCapability {
    fn kind(&self) -> &str {
        KIND
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["to"],
            "properties": {
                "to": {"type": "string"},
                "subject": {"type": "string"},
                "body": {"type": "string"}
            }
        })
    }

    async fn invoke(&self, parameters: &Value) -> CoreResult<Value> {
        let to = parameters
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidInput("email requires a 'to' address".to_string()))?;
        if !to.contains('@') {
            return Err(CoreError::InvalidInput(format!(
                "'{to}' is not a valid recipient address"
            )));
        }
        let subject = parameters
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(no subject)");
        let body = parameters
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let email = OutboundEmail {
            message_id: Uuid::new_v4().to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let message_id = email.message_id.clone();
        self.outbox
            .lock()
            .map_err(|_| CoreError::Internal("email outbox lock poisoned".to_string()))?
            .push(email);

        Ok(json!({
            "sent": true,
            "message_id": message_id,
            "to": to,
            "subject": subject,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_message_lands_in_outbox() {
        let capability = EmailCapability::new();
        let output = capability
            .invoke(&json!({"to": "a@b.com", "subject": "hi", "body": "hello"}))
            .await
            .unwrap();
        assert_eq!(output["sent"], json!(true));
        assert_eq!(output["to"], json!("a@b.com"));

        let outbox = capability.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].subject, "hi");
    }

    #[tokio::test]
    async fn missing_recipient_is_rejected() {
        let capability = EmailCapability::new();
        let err = capability.invoke(&json!({"subject": "hi"})).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert!(capability.outbox().is_empty());
    }

    #[tokio::test]
    async fn malformed_recipient_is_rejected() {
        let capability = EmailCapability::new();
        let err = capability.invoke(&json!({"to": "nobody"})).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
