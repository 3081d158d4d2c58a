//! Uniform invocation over heterogeneous capabilities.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Capability, Readiness, ToolResult};

/// Readiness entry for one capability, as reported by the status probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityStatus {
    pub kind: String,
    pub readiness: Readiness,
}

/// Dispatches action invocations to registered capabilities.
///
/// Every call is bounded by the configured timeout and always produces a
/// [`ToolResult`]: a failing or slow capability is reported in its own
/// result and never aborts sibling invocations from the same command.
pub struct ToolDispatcher {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            capabilities: HashMap::new(),
            timeout,
        }
    }

    /// Register a capability. Panics if the kind is already taken.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let kind = capability.kind().to_string();
        if self.capabilities.contains_key(&kind) {
            panic!("duplicate capability: {kind}");
        }
        self.capabilities.insert(kind, capability);
    }

    /// Per-capability readiness, sorted by kind.
    pub fn status(&self) -> Vec<CapabilityStatus> {
        let mut statuses: Vec<CapabilityStatus> = self
            .capabilities
            .values()
            .map(|capability| CapabilityStatus {
                kind: capability.kind().to_string(),
                readiness: capability.readiness(),
            })
            .collect();
        statuses.sort_by(|a, b| a.kind.cmp(&b.kind));
        statuses
    }

    /// Invoke one capability with a bounded timeout.
    #[tracing::instrument(skip_all, fields(tool = kind))]
    pub async fn invoke(&self, kind: &str, parameters: &Value) -> ToolResult {
        let started = Instant::now();
        let Some(capability) = self.capabilities.get(kind) else {
            return ToolResult::failed(kind, format!("unknown tool: '{kind}'"), 0);
        };

        let outcome = tokio::time::timeout(self.timeout, capability.invoke(parameters)).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(output)) => {
                tracing::debug!(duration_ms, "tool invocation succeeded");
                ToolResult::ok(kind, output, duration_ms)
            }
            Ok(Err(error)) => {
                tracing::warn!(duration_ms, %error, "tool invocation failed");
                ToolResult::failed(kind, error.to_string(), duration_ms)
            }
            Err(_) => {
                tracing::warn!(duration_ms, "tool invocation timed out");
                ToolResult::failed(
                    kind,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                    duration_ms,
                )
            }
        }
    }

    /// Invoke independent actions concurrently and wait for all of them.
    ///
    /// Result order matches call order.
    pub async fn invoke_all(&self, calls: &[(String, Value)]) -> Vec<ToolResult> {
        join_all(
            calls
                .iter()
                .map(|(kind, parameters)| self.invoke(kind, parameters)),
        )
        .await
    }
}
