//! Session storage contract and the in-memory implementation.

use async_trait::async_trait;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::session::{ConversationTurn, Session};
use crate::utils::time::now_secs;

const MAX_SESSIONS: u64 = 100_000;

/// Keyed storage for session state and conversation history.
///
/// Implementations must serialize mutation per session identifier: two
/// concurrent `append_turn` calls against the same session may interleave in
/// either order but must never lose a turn. Sessions idle past the
/// configured window behave as not found on any access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, user_id: &str, preferences: HashMap<String, String>) -> CoreResult<Session>;
    async fn get(&self, session_id: &str) -> CoreResult<Session>;
    async fn append_turn(&self, session_id: &str, turn: ConversationTurn) -> CoreResult<Session>;
    async fn touch(&self, session_id: &str) -> CoreResult<()>;
    /// Layer new preference entries onto the session's existing map.
    async fn merge_preferences(
        &self,
        session_id: &str,
        preferences: HashMap<String, String>,
    ) -> CoreResult<()>;
    async fn delete(&self, session_id: &str) -> CoreResult<Session>;
    /// Record that an action awaiting confirmation belongs to this session.
    async fn track_pending(&self, session_id: &str, action_id: &str) -> CoreResult<()>;
}

/// In-memory session store.
///
/// Entries live in a `moka` cache with `time_to_idle` set to the inactivity
/// window, which gives the lazy-expiry contract for free: an idle entry is
/// gone on the next access, and the cache evicts it eagerly in the
/// background. Each entry wraps its session in a `tokio::sync::Mutex` so
/// read-modify-write sequences serialize per session id.
pub struct MemorySessionStore {
    entries: Cache<String, Arc<Mutex<Session>>>,
}

impl MemorySessionStore {
    pub fn new(idle_window: Duration) -> Self {
        let entries = Cache::builder()
            .time_to_idle(idle_window)
            .max_capacity(MAX_SESSIONS)
            .build();
        Self { entries }
    }

    fn entry(&self, session_id: &str) -> CoreResult<Arc<Mutex<Session>>> {
        self.entries
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: &str, preferences: HashMap<String, String>) -> CoreResult<Session> {
        let session = Session::new(user_id, preferences);
        self.entries
            .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> CoreResult<Session> {
        let entry = self.entry(session_id)?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    async fn append_turn(&self, session_id: &str, turn: ConversationTurn) -> CoreResult<Session> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock().await;
        session.last_activity = turn.timestamp;
        session.turns.push(turn);
        Ok(session.clone())
    }

    async fn touch(&self, session_id: &str) -> CoreResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock().await;
        session.last_activity = now_secs();
        Ok(())
    }

    async fn merge_preferences(
        &self,
        session_id: &str,
        preferences: HashMap<String, String>,
    ) -> CoreResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock().await;
        session.preferences.extend(preferences);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> CoreResult<Session> {
        let entry = self.entry(session_id)?;
        let snapshot = {
            let mut session = entry.lock().await;
            session.active = false;
            session.clone()
        };
        self.entries.invalidate(session_id);
        Ok(snapshot)
    }

    async fn track_pending(&self, session_id: &str, action_id: &str) -> CoreResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock().await;
        session.pending_action_ids.push(action_id.to_string());
        Ok(())
    }
}
