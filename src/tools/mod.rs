use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

pub mod dispatcher;
pub mod email;
pub mod note;

pub use dispatcher::{CapabilityStatus, ToolDispatcher};

/// Readiness of a capability, reported by the status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
}

/// Outcome of one tool invocation.
///
/// Ephemeral: merged into a conversation turn and not persisted separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(tool: &str, output: Value, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            output,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(tool: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// An external executor of one concrete action kind.
///
/// Implementations validate their own parameters and return the result
/// payload as JSON; the dispatcher supplies timing, timeout, and error
/// isolation around every call.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The action kind this capability executes, e.g. `"email"`.
    fn kind(&self) -> &str;

    /// JSON schema describing the expected parameter object.
    fn input_schema(&self) -> Value;

    fn readiness(&self) -> Readiness {
        Readiness::Ready
    }

    async fn invoke(&self, parameters: &Value) -> CoreResult<Value>;
}
