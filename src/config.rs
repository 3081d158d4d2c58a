use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

/// Sessions idle out after four hours without any access.
pub const DEFAULT_SESSION_IDLE_SECONDS: u64 = 4 * 60 * 60;
/// Pending actions wait five minutes for a confirmation before expiring.
pub const DEFAULT_ACTION_TTL_SECONDS: u64 = 300;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;
/// How many recent turns are handed to the intent resolver as context.
pub const DEFAULT_CONTEXT_LIMIT: usize = 50;

/// Runtime configuration for the orchestration core.
///
/// The `confirmation` table maps an action kind to whether it requires an
/// explicit user confirmation before dispatch. Kinds absent from the table
/// default to requiring confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub session_idle_seconds: u64,
    pub action_ttl_seconds: u64,
    pub tool_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
    pub context_limit: usize,
    pub confirmation: HashMap<String, bool>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let mut confirmation = HashMap::new();
        confirmation.insert("email".to_string(), true);
        confirmation.insert("note".to_string(), false);
        Self {
            session_idle_seconds: DEFAULT_SESSION_IDLE_SECONDS,
            action_ttl_seconds: DEFAULT_ACTION_TTL_SECONDS,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            context_limit: DEFAULT_CONTEXT_LIMIT,
            confirmation,
        }
    }
}

impl CoreConfig {
    /// Build a config from defaults with `CONCIERGE_*` environment overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_idle_seconds: read_limit(
                "CONCIERGE_SESSION_IDLE_SECONDS",
                defaults.session_idle_seconds,
            ),
            action_ttl_seconds: read_limit(
                "CONCIERGE_ACTION_TTL_SECONDS",
                defaults.action_ttl_seconds,
            ),
            tool_timeout_ms: read_limit("CONCIERGE_TOOL_TIMEOUT_MS", defaults.tool_timeout_ms),
            sweep_interval_seconds: read_limit(
                "CONCIERGE_SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval_seconds,
            ),
            context_limit: read_limit("CONCIERGE_CONTEXT_LIMIT", defaults.context_limit as u64)
                as usize,
            confirmation: defaults.confirmation,
        }
    }

    /// Whether an action of this kind needs explicit user confirmation.
    ///
    /// Unknown kinds require confirmation: a capability nobody classified
    /// must not silently auto-execute.
    pub fn requires_confirmation(&self, kind: &str) -> bool {
        self.confirmation.get(kind).copied().unwrap_or(true)
    }
}

fn read_limit(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mark_email_as_confirmation_required() {
        let config = CoreConfig::default();
        assert!(config.requires_confirmation("email"));
        assert!(!config.requires_confirmation("note"));
    }

    #[test]
    fn unknown_kind_requires_confirmation() {
        let config = CoreConfig::default();
        assert!(config.requires_confirmation("rocket_launch"));
    }

    #[test]
    fn table_override_wins() {
        let mut config = CoreConfig::default();
        config.confirmation.insert("email".to_string(), false);
        assert!(!config.requires_confirmation("email"));
    }
}
