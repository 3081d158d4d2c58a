use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::actions::{PendingAction, PendingActionRegistry};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::intent::{default_rules, IntentResolver, KeywordResolver, ResolvedIntent};
use crate::session::{ConversationTurn, Session, SessionStats, SessionStore, MemorySessionStore};
use crate::tools::{email::EmailCapability, note::NoteCapability, ToolDispatcher, ToolResult};
use crate::tools::dispatcher::CapabilityStatus;
use crate::utils::time::now_secs;

/// Typed response produced by the orchestrator.
#[derive(Debug, Clone)]
pub enum CoreResponse {
    /// A plain answer; nothing was executed or registered.
    Answer { session_id: String, message: String },
    /// Some actions await confirmation. `completed` carries results of any
    /// auto-executable actions from the same command.
    ConfirmationRequired {
        session_id: String,
        message: String,
        pending: Vec<PendingAction>,
        completed: Vec<ToolResult>,
    },
    /// Actions were dispatched; per-action results attached.
    ActionCompleted {
        session_id: String,
        message: String,
        results: Vec<ToolResult>,
    },
}

impl CoreResponse {
    pub fn session_id(&self) -> &str {
        match self {
            CoreResponse::Answer { session_id, .. }
            | CoreResponse::ConfirmationRequired { session_id, .. }
            | CoreResponse::ActionCompleted { session_id, .. } => session_id,
        }
    }
}

/// Session metadata plus history and aggregate statistics.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session: Session,
    pub stats: SessionStats,
}

/// Acknowledgement of a session deletion.
#[derive(Debug, Clone)]
pub struct DeletedSession {
    pub session_id: String,
    pub deleted_at: u64,
    pub cancelled_actions: usize,
}

/// Per-capability readiness report.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub capabilities: Vec<CapabilityStatus>,
}

/// Primary facade for the concierge engine: the request-level state machine
/// tying session storage, intent resolution, the pending-action registry,
/// and tool dispatch together.
///
/// All collaborators are injected; nothing is ambient.
pub struct Core {
    config: CoreConfig,
    sessions: Arc<dyn SessionStore>,
    registry: Arc<PendingActionRegistry>,
    dispatcher: Arc<ToolDispatcher>,
    resolver: Arc<dyn IntentResolver>,
    /// One lock per session id so overlapping requests from the same user
    /// (e.g. two devices) serialize their read-modify-write sequences.
    command_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Core {
    pub fn new(
        config: CoreConfig,
        sessions: Arc<dyn SessionStore>,
        registry: Arc<PendingActionRegistry>,
        dispatcher: Arc<ToolDispatcher>,
        resolver: Arc<dyn IntentResolver>,
    ) -> Self {
        Self {
            config,
            sessions,
            registry,
            dispatcher,
            resolver,
            command_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the default in-memory stack: memory session store, keyword
    /// resolver, and the built-in email/note capabilities.
    pub fn with_defaults(config: CoreConfig) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(
            config.session_idle_seconds,
        )));
        let mut dispatcher = ToolDispatcher::new(Duration::from_millis(config.tool_timeout_ms));
        dispatcher.register(Arc::new(EmailCapability::new()));
        dispatcher.register(Arc::new(NoteCapability::new()));
        let resolver = Arc::new(KeywordResolver::new(
            default_rules(),
            config.confirmation.clone(),
        ));
        Self::new(
            config,
            sessions,
            Arc::new(PendingActionRegistry::new()),
            Arc::new(dispatcher),
            resolver,
        )
    }

    /// Submit a natural-language command.
    ///
    /// Loads or creates the session, resolves intent, partitions proposed
    /// actions into auto-executable and confirmation-required, and appends
    /// exactly one conversation turn for the exchange. Resolver failure
    /// degrades to a plain failure answer and leaves the session unmutated.
    #[tracing::instrument(skip_all, fields(user_id = user_id))]
    pub async fn submit_command(
        &self,
        user_id: &str,
        command: &str,
        session_id: Option<&str>,
        preferences: Option<HashMap<String, String>>,
    ) -> CoreResult<CoreResponse> {
        let command = command.trim();
        if command.is_empty() {
            return Err(CoreError::InvalidInput("command must not be empty".to_string()));
        }

        let session = match session_id {
            Some(id) => {
                let session = self.owned_session(user_id, id).await?;
                // Preferences sent mid-conversation layer onto the
                // session's existing map; newer values win per key.
                if let Some(preferences) = preferences {
                    self.sessions.merge_preferences(id, preferences).await?;
                }
                session
            }
            None => {
                self.sessions
                    .create(user_id, preferences.unwrap_or_default())
                    .await?
            }
        };

        let lock = self.command_lock(&session.id).await;
        let _guard = lock.lock().await;
        // Reload under the lock so we see turns appended by requests that
        // held it before us.
        let session = self.sessions.get(&session.id).await?;
        let pending = self.registry.pending_for_session(&session.id)?;
        let history = tail(&session.turns, self.config.context_limit);

        let intent = match self
            .resolver
            .resolve(command, history, &pending, &session.preferences)
            .await
        {
            Ok(intent) => intent,
            Err(error) => {
                tracing::warn!(%error, "intent resolution failed");
                return Ok(CoreResponse::Answer {
                    session_id: session.id.clone(),
                    message: "I couldn't process that command right now. Please try again."
                        .to_string(),
                });
            }
        };

        match intent {
            ResolvedIntent::Answer(message) => {
                self.append_turn(&session.id, command, &message, vec![], true)
                    .await?;
                Ok(CoreResponse::Answer {
                    session_id: session.id.clone(),
                    message,
                })
            }
            ResolvedIntent::PendingReference { action_id, confirmed } => {
                self.confirm_locked(&session.id, &action_id, confirmed, None, command)
                    .await
            }
            ResolvedIntent::Actions(proposals) => {
                self.handle_proposals(&session.id, command, proposals).await
            }
        }
    }

    /// Confirm or cancel a pending action.
    ///
    /// Re-confirming an action already in a terminal state surfaces the
    /// `InvalidTransition` error and never re-dispatches the side effect.
    #[tracing::instrument(skip_all, fields(user_id = user_id, action_id = action_id))]
    pub async fn confirm_action(
        &self,
        user_id: &str,
        session_id: &str,
        action_id: &str,
        confirmed: bool,
        parameters: Option<Value>,
    ) -> CoreResult<CoreResponse> {
        let session = self.owned_session(user_id, session_id).await?;
        let lock = self.command_lock(&session.id).await;
        let _guard = lock.lock().await;
        let label = if confirmed {
            format!("[confirm {action_id}]")
        } else {
            format!("[cancel {action_id}]")
        };
        self.confirm_locked(&session.id, action_id, confirmed, parameters, &label)
            .await
    }

    /// Session metadata, ordered history, and aggregate statistics.
    pub async fn get_session(&self, user_id: &str, session_id: &str) -> CoreResult<SessionView> {
        let session = self.owned_session(user_id, session_id).await?;
        let stats = session.stats();
        Ok(SessionView { session, stats })
    }

    /// Delete a session and cascade-cancel its unconfirmed actions.
    pub async fn delete_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> CoreResult<DeletedSession> {
        self.owned_session(user_id, session_id).await?;
        self.sessions.delete(session_id).await?;
        let cancelled_actions = self.registry.cancel_for_session(session_id)?;
        self.command_locks.lock().await.remove(session_id);
        tracing::info!(session_id, cancelled_actions, "session deleted");
        Ok(DeletedSession {
            session_id: session_id.to_string(),
            deleted_at: now_secs(),
            cancelled_actions,
        })
    }

    /// Best-effort readiness of every registered capability.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            capabilities: self.dispatcher.status(),
        }
    }

    /// Spawn the periodic eager-expiry sweep for pending actions.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match core.registry.sweep() {
                    Ok(expired) if expired > 0 => {
                        tracing::debug!(expired, "expired overdue pending actions");
                    }
                    Ok(_) => {}
                    Err(error) => tracing::error!(%error, "pending action sweep failed"),
                }
            }
        })
    }

    async fn handle_proposals(
        &self,
        session_id: &str,
        command: &str,
        proposals: Vec<crate::intent::ProposedAction>,
    ) -> CoreResult<CoreResponse> {
        if proposals.is_empty() {
            let message = "I couldn't map that to any action.".to_string();
            self.append_turn(session_id, command, &message, vec![], true)
                .await?;
            return Ok(CoreResponse::Answer {
                session_id: session_id.to_string(),
                message,
            });
        }

        let mut registered: Vec<PendingAction> = Vec::new();
        let mut to_dispatch: Vec<(String, Value)> = Vec::new();
        for proposal in proposals {
            // The config table is authoritative; the resolver's tag is
            // advisory only.
            if self.config.requires_confirmation(&proposal.kind) {
                let action = self.registry.register(
                    session_id,
                    &proposal.kind,
                    proposal.parameters,
                    self.config.action_ttl_seconds,
                )?;
                self.sessions.track_pending(session_id, &action.id).await?;
                registered.push(action);
            } else {
                to_dispatch.push((proposal.kind, proposal.parameters));
            }
        }

        let results = if to_dispatch.is_empty() {
            Vec::new()
        } else {
            self.dispatcher.invoke_all(&to_dispatch).await
        };

        let tools_invoked: Vec<String> = results.iter().map(|r| r.tool.clone()).collect();
        let all_succeeded = results.iter().all(|r| r.success);
        let message = compose_message(&registered, &results);
        self.append_turn(session_id, command, &message, tools_invoked, all_succeeded)
            .await?;

        if registered.is_empty() {
            Ok(CoreResponse::ActionCompleted {
                session_id: session_id.to_string(),
                message,
                results,
            })
        } else {
            Ok(CoreResponse::ConfirmationRequired {
                session_id: session_id.to_string(),
                message,
                pending: registered,
                completed: results,
            })
        }
    }

    /// Confirmation flow; caller must hold the session's command lock.
    async fn confirm_locked(
        &self,
        session_id: &str,
        action_id: &str,
        confirmed: bool,
        extra_parameters: Option<Value>,
        user_input: &str,
    ) -> CoreResult<CoreResponse> {
        let action = self.registry.get(action_id)?;
        if action.session_id != session_id {
            return Err(CoreError::Forbidden(
                "action belongs to a different session".to_string(),
            ));
        }

        let resolved = self.registry.resolve(action_id, confirmed)?;

        if !confirmed {
            let message = format!("Cancelled the pending {} action.", resolved.kind);
            self.append_turn(session_id, user_input, &message, vec![], true)
                .await?;
            return Ok(CoreResponse::Answer {
                session_id: session_id.to_string(),
                message,
            });
        }

        let parameters = merge_parameters(resolved.parameters.clone(), extra_parameters);
        let result = self.dispatcher.invoke(&resolved.kind, &parameters).await;
        self.registry.mark_executed(action_id, &result)?;

        let message = if result.success {
            format!("Executed the {} action.", resolved.kind)
        } else {
            format!(
                "The {} action failed: {}.",
                resolved.kind,
                result.error.as_deref().unwrap_or("unknown error")
            )
        };
        self.append_turn(
            session_id,
            user_input,
            &message,
            vec![resolved.kind.clone()],
            result.success,
        )
        .await?;

        Ok(CoreResponse::ActionCompleted {
            session_id: session_id.to_string(),
            message,
            results: vec![result],
        })
    }

    async fn append_turn(
        &self,
        session_id: &str,
        user_input: &str,
        agent_response: &str,
        tools_invoked: Vec<String>,
        success: bool,
    ) -> CoreResult<()> {
        let turn = ConversationTurn::new(user_input, agent_response, tools_invoked, success);
        self.sessions.append_turn(session_id, turn).await?;
        Ok(())
    }

    async fn owned_session(&self, user_id: &str, session_id: &str) -> CoreResult<Session> {
        let session = self.sessions.get(session_id).await?;
        if session.user_id != user_id {
            return Err(CoreError::Forbidden(
                "session belongs to a different user".to_string(),
            ));
        }
        Ok(session)
    }

    async fn command_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.command_locks.lock().await;
        // An entry only the map holds belongs to a finished request; prune
        // those so the map tracks sessions with in-flight work rather than
        // every session ever touched.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Most recent `limit` turns, oldest first.
fn tail(turns: &[ConversationTurn], limit: usize) -> &[ConversationTurn] {
    let start = turns.len().saturating_sub(limit);
    &turns[start..]
}

fn compose_message(registered: &[PendingAction], results: &[ToolResult]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !results.is_empty() {
        let succeeded = results.iter().filter(|r| r.success).count();
        parts.push(format!("Executed {succeeded} of {} action(s).", results.len()));
    }
    if !registered.is_empty() {
        let kinds: Vec<&str> = registered.iter().map(|a| a.kind.as_str()).collect();
        parts.push(format!(
            "{} action(s) need your confirmation before I run them: {}.",
            registered.len(),
            kinds.join(", ")
        ));
    }
    if parts.is_empty() {
        "Nothing to do.".to_string()
    } else {
        parts.join(" ")
    }
}

fn merge_parameters(base: Value, extra: Option<Value>) -> Value {
    let Some(Value::Object(extra)) = extra else {
        return base;
    };
    match base {
        Value::Object(mut merged) => {
            for (key, value) in extra {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        _ => Value::Object(extra),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionState;
    use crate::tools::{Capability, Readiness};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedResolver {
        intent: ResolvedIntent,
    }

    #[async_trait]
    impl IntentResolver for ScriptedResolver {
        async fn resolve(
            &self,
            _command: &str,
            _history: &[ConversationTurn],
            _pending: &[PendingAction],
            _preferences: &HashMap<String, String>,
        ) -> CoreResult<ResolvedIntent> {
            Ok(self.intent.clone())
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl IntentResolver for FailingResolver {
        async fn resolve(
            &self,
            _command: &str,
            _history: &[ConversationTurn],
            _pending: &[PendingAction],
            _preferences: &HashMap<String, String>,
        ) -> CoreResult<ResolvedIntent> {
            Err(CoreError::ResolverUnavailable("model offline".to_string()))
        }
    }

    struct CountingCapability {
        kind: String,
        calls: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait]
    impl Capability for CountingCapability {
        fn kind(&self) -> &str {
            &self.kind
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn readiness(&self) -> Readiness {
            Readiness::Ready
        }

        async fn invoke(&self, parameters: &Value) -> CoreResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(json!({"invoked_with": parameters.clone()}))
            } else {
                Err(CoreError::Internal("delivery failed".to_string()))
            }
        }
    }

    struct TestHarness {
        core: Arc<Core>,
        email_calls: Arc<AtomicUsize>,
        note_calls: Arc<AtomicUsize>,
    }

    fn harness_with(intent: ResolvedIntent) -> TestHarness {
        harness(Arc::new(ScriptedResolver { intent }), true)
    }

    fn harness(resolver: Arc<dyn IntentResolver>, email_succeeds: bool) -> TestHarness {
        let config = CoreConfig::default();
        let email_calls = Arc::new(AtomicUsize::new(0));
        let note_calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = ToolDispatcher::new(Duration::from_millis(500));
        dispatcher.register(Arc::new(CountingCapability {
            kind: "email".to_string(),
            calls: email_calls.clone(),
            succeed: email_succeeds,
        }));
        dispatcher.register(Arc::new(CountingCapability {
            kind: "note".to_string(),
            calls: note_calls.clone(),
            succeed: true,
        }));
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
        let core = Arc::new(Core::new(
            config,
            sessions,
            Arc::new(PendingActionRegistry::new()),
            Arc::new(dispatcher),
            resolver,
        ));
        TestHarness {
            core,
            email_calls,
            note_calls,
        }
    }

    fn email_proposal() -> ResolvedIntent {
        ResolvedIntent::Actions(vec![crate::intent::ProposedAction {
            kind: "email".to_string(),
            parameters: json!({"to": "a@b.com"}),
            needs_confirmation: true,
        }])
    }

    fn pending_from(response: &CoreResponse) -> PendingAction {
        match response {
            CoreResponse::ConfirmationRequired { pending, .. } => pending[0].clone(),
            other => panic!("expected confirmation_required, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn email_command_requires_confirmation_and_does_not_dispatch() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();

        let action = pending_from(&response);
        assert_eq!(action.kind, "email");
        assert_eq!(action.parameters, json!({"to": "a@b.com"}));
        assert_eq!(action.state, ActionState::AwaitingConfirmation);
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 0);

        let view = h
            .core
            .get_session("user-1", response.session_id())
            .await
            .unwrap();
        assert_eq!(view.session.turns.len(), 1);
        assert_eq!(view.session.pending_action_ids, vec![action.id]);
    }

    #[tokio::test]
    async fn confirming_dispatches_exactly_once() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let confirmed = h
            .core
            .confirm_action("user-1", &session_id, &action.id, true, None)
            .await
            .unwrap();
        match confirmed {
            CoreResponse::ActionCompleted { results, .. } => {
                assert_eq!(results.len(), 1);
                assert!(results[0].success);
            }
            other => panic!("expected action_completed, got {other:?}"),
        }
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelling_never_invokes_the_tool() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let cancelled = h
            .core
            .confirm_action("user-1", &session_id, &action.id, false, None)
            .await
            .unwrap();
        assert!(matches!(cancelled, CoreResponse::Answer { .. }));
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconfirming_a_terminal_action_never_dispatches_twice() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        h.core
            .confirm_action("user-1", &session_id, &action.id, true, None)
            .await
            .unwrap();
        let err = h
            .core
            .confirm_action("user-1", &session_id, &action.id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_dispatch_marks_action_failed() {
        let h = harness(
            Arc::new(ScriptedResolver {
                intent: email_proposal(),
            }),
            false,
        );
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let confirmed = h
            .core
            .confirm_action("user-1", &session_id, &action.id, true, None)
            .await
            .unwrap();
        match confirmed {
            CoreResponse::ActionCompleted { results, .. } => {
                assert!(!results[0].success);
            }
            other => panic!("expected action_completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn safe_kind_auto_executes_and_never_waits_for_confirmation() {
        let h = harness_with(ResolvedIntent::Actions(vec![crate::intent::ProposedAction {
            kind: "note".to_string(),
            parameters: json!({"content": "milk"}),
            needs_confirmation: false,
        }]));
        let response = h
            .core
            .submit_command("user-1", "take a note", None, None)
            .await
            .unwrap();
        match response {
            CoreResponse::ActionCompleted { results, .. } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].tool, "note");
            }
            other => panic!("expected action_completed, got {other:?}"),
        }
        assert_eq!(h.note_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn policy_table_overrides_resolver_tag() {
        // The resolver claims email does not need confirmation; the config
        // table still guards it.
        let h = harness_with(ResolvedIntent::Actions(vec![crate::intent::ProposedAction {
            kind: "email".to_string(),
            parameters: json!({"to": "a@b.com"}),
            needs_confirmation: false,
        }]));
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        assert!(matches!(response, CoreResponse::ConfirmationRequired { .. }));
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mixed_batch_reports_completed_and_pending_together() {
        let h = harness_with(ResolvedIntent::Actions(vec![
            crate::intent::ProposedAction {
                kind: "note".to_string(),
                parameters: json!({"content": "milk"}),
                needs_confirmation: false,
            },
            crate::intent::ProposedAction {
                kind: "email".to_string(),
                parameters: json!({"to": "a@b.com"}),
                needs_confirmation: true,
            },
        ]));
        let response = h
            .core
            .submit_command("user-1", "note milk and email a@b.com", None, None)
            .await
            .unwrap();
        match response {
            CoreResponse::ConfirmationRequired {
                pending, completed, ..
            } => {
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].kind, "email");
                assert_eq!(completed.len(), 1);
                assert_eq!(completed[0].tool, "note");
            }
            other => panic!("expected confirmation_required, got {other:?}"),
        }
        assert_eq!(h.note_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plain_answer_appends_one_turn() {
        let h = harness_with(ResolvedIntent::Answer("hello there".to_string()));
        let response = h
            .core
            .submit_command("user-1", "hi", None, None)
            .await
            .unwrap();
        match &response {
            CoreResponse::Answer { message, .. } => assert_eq!(message, "hello there"),
            other => panic!("expected answer, got {other:?}"),
        }
        let view = h
            .core
            .get_session("user-1", response.session_id())
            .await
            .unwrap();
        assert_eq!(view.session.turns.len(), 1);
        assert_eq!(view.session.turns[0].agent_response, "hello there");
    }

    #[tokio::test]
    async fn history_accumulates_and_last_activity_tracks_latest_turn() {
        let h = harness_with(ResolvedIntent::Answer("ok".to_string()));
        let first = h
            .core
            .submit_command("user-1", "one", None, None)
            .await
            .unwrap();
        let session_id = first.session_id().to_string();
        for command in ["two", "three"] {
            h.core
                .submit_command("user-1", command, Some(&session_id), None)
                .await
                .unwrap();
        }
        let view = h.core.get_session("user-1", &session_id).await.unwrap();
        assert_eq!(view.session.turns.len(), 3);
        assert_eq!(view.stats.turn_count, 3);
        assert_eq!(
            view.session.last_activity,
            view.session.turns[2].timestamp
        );
    }

    #[tokio::test]
    async fn expired_action_cannot_be_confirmed() {
        let mut config = CoreConfig::default();
        config.action_ttl_seconds = 0;
        let email_calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = ToolDispatcher::new(Duration::from_millis(500));
        dispatcher.register(Arc::new(CountingCapability {
            kind: "email".to_string(),
            calls: email_calls.clone(),
            succeed: true,
        }));
        let core = Core::new(
            config,
            Arc::new(MemorySessionStore::new(Duration::from_secs(3600))),
            Arc::new(PendingActionRegistry::new()),
            Arc::new(dispatcher),
            Arc::new(ScriptedResolver {
                intent: email_proposal(),
            }),
        );

        let response = core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let err = core
            .confirm_action("user-1", &session_id, &action.id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolver_failure_leaves_session_unmutated() {
        let h = harness(Arc::new(FailingResolver), true);
        let created = h
            .core
            .submit_command("user-1", "anything", None, None)
            .await
            .unwrap();
        assert!(matches!(created, CoreResponse::Answer { .. }));
        let view = h
            .core
            .get_session("user-1", created.session_id())
            .await
            .unwrap();
        assert!(view.session.turns.is_empty());
    }

    #[tokio::test]
    async fn deleting_session_cancels_its_pending_actions() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let deleted = h.core.delete_session("user-1", &session_id).await.unwrap();
        assert_eq!(deleted.cancelled_actions, 1);

        let err = h.core.get_session("user-1", &session_id).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
        assert_eq!(
            h.core.registry.get(&action.id).unwrap().state,
            ActionState::Cancelled
        );
    }

    #[tokio::test]
    async fn yes_reply_confirms_via_resolver_reference() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        // Swap in a resolver that maps the reply onto the pending action,
        // the way the keyword resolver does for bare "yes".
        let reply_core = Core::new(
            CoreConfig::default(),
            h.core.sessions.clone(),
            h.core.registry.clone(),
            h.core.dispatcher.clone(),
            Arc::new(ScriptedResolver {
                intent: ResolvedIntent::PendingReference {
                    action_id: action.id.clone(),
                    confirmed: true,
                },
            }),
        );
        let confirmed = reply_core
            .submit_command("user-1", "yes", Some(&session_id), None)
            .await
            .unwrap();
        assert!(matches!(confirmed, CoreResponse::ActionCompleted { .. }));
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn foreign_user_cannot_touch_session_or_action() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let err = h
            .core
            .confirm_action("intruder", &session_id, &action.id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let err = h.core.get_session("intruder", &session_id).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert_eq!(h.email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirm_merges_extra_parameters() {
        let h = harness_with(email_proposal());
        let response = h
            .core
            .submit_command("user-1", "Send email to a@b.com", None, None)
            .await
            .unwrap();
        let session_id = response.session_id().to_string();
        let action = pending_from(&response);

        let confirmed = h
            .core
            .confirm_action(
                "user-1",
                &session_id,
                &action.id,
                true,
                Some(json!({"subject": "lunch"})),
            )
            .await
            .unwrap();
        match confirmed {
            CoreResponse::ActionCompleted { results, .. } => {
                assert_eq!(
                    results[0].output["invoked_with"],
                    json!({"to": "a@b.com", "subject": "lunch"})
                );
            }
            other => panic!("expected action_completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_reports_registered_capabilities() {
        let h = harness_with(ResolvedIntent::Answer("ok".to_string()));
        let report = h.core.status();
        let kinds: Vec<&str> = report.capabilities.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["email", "note"]);
    }

    #[tokio::test]
    async fn command_lock_map_does_not_retain_finished_sessions() {
        let h = harness_with(ResolvedIntent::Answer("ok".to_string()));
        for _ in 0..25 {
            h.core
                .submit_command("user-1", "hi", None, None)
                .await
                .unwrap();
        }
        // No request is in flight, so the next acquisition prunes every
        // leftover entry.
        let lock = h.core.command_lock("fresh-session").await;
        let locks = h.core.command_locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("fresh-session"));
        drop(locks);
        drop(lock);
    }

    #[tokio::test]
    async fn command_lock_map_keeps_entries_still_held() {
        let h = harness_with(ResolvedIntent::Answer("ok".to_string()));
        let held = h.core.command_lock("busy-session").await;
        let _guard = held.lock().await;

        h.core
            .submit_command("user-1", "hi", None, None)
            .await
            .unwrap();

        let locks = h.core.command_locks.lock().await;
        assert!(locks.contains_key("busy-session"));
    }

    #[tokio::test]
    async fn preferences_on_existing_session_are_merged() {
        let h = harness_with(ResolvedIntent::Answer("ok".to_string()));
        let mut initial = HashMap::new();
        initial.insert("tone".to_string(), "formal".to_string());
        let created = h
            .core
            .submit_command("user-1", "hi", None, Some(initial))
            .await
            .unwrap();
        let session_id = created.session_id().to_string();

        let mut update = HashMap::new();
        update.insert("tone".to_string(), "casual".to_string());
        update.insert("signature".to_string(), "M".to_string());
        h.core
            .submit_command("user-1", "hello again", Some(&session_id), Some(update))
            .await
            .unwrap();

        let view = h.core.get_session("user-1", &session_id).await.unwrap();
        assert_eq!(
            view.session.preferences.get("tone"),
            Some(&"casual".to_string())
        );
        assert_eq!(
            view.session.preferences.get("signature"),
            Some(&"M".to_string())
        );
    }

    #[tokio::test]
    async fn empty_command_is_rejected_before_touching_state() {
        let h = harness_with(ResolvedIntent::Answer("ok".to_string()));
        let err = h
            .core
            .submit_command("user-1", "   ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
