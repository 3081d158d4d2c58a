//! Note capability: a safe kind that auto-executes without confirmation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::utils::time::now_secs;

use super::Capability;

pub const KIND: &str = "note";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub content: String,
    pub created_at: u64,
}

/// Keeps short notes for the user.
#[derive(Clone, Default)]
pub struct NoteCapability {
    notes: Arc<Mutex<Vec<Note>>>,
}

impl NoteCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Capability for NoteCapability {
    fn kind(&self) -> &str {
        KIND
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["content"],
            "properties": {
                "content": {"type": "string"}
            }
        })
    }

    async fn invoke(&self, parameters: &Value) -> CoreResult<Value> {
        let content = parameters
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidInput("note requires non-empty 'content'".to_string()))?;

        let note = Note {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: now_secs(),
        };
        let id = note.id.clone();
        let count = {
            let mut notes = self
                .notes
                .lock()
                .map_err(|_| CoreError::Internal("note store lock poisoned".to_string()))?;
            notes.push(note);
            notes.len()
        };

        Ok(json!({"created": true, "note_id": id, "count": count}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_notes_in_order() {
        let capability = NoteCapability::new();
        capability.invoke(&json!({"content": "first"})).await.unwrap();
        let output = capability.invoke(&json!({"content": "second"})).await.unwrap();
        assert_eq!(output["count"], json!(2));

        let notes = capability.notes();
        assert_eq!(notes[0].content, "first");
        assert_eq!(notes[1].content, "second");
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let capability = NoteCapability::new();
        let err = capability.invoke(&json!({"content": "  "})).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
