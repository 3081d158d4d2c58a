use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::session::{ConversationTurn, SessionStats};
use crate::server::envelope::{ApiEnvelope, ResponseType};
use crate::server::error::ApiError;
use crate::server::{caller_id, ServerState};

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiConversationTurn {
    pub timestamp: u64,
    pub user_input: String,
    pub agent_response: String,
    pub tools_invoked: Vec<String>,
    pub success: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiSession {
    pub id: String,
    pub user_id: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub active: bool,
    pub preferences: HashMap<String, String>,
    pub turns: Vec<ApiConversationTurn>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiSessionStats {
    pub turn_count: usize,
    pub successful_turns: usize,
    pub tool_usage: HashMap<String, u64>,
    pub last_activity: u64,
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    responses(
        (status = 200, description = "Session metadata, history, and statistics", body = ApiEnvelope),
        (status = 404, body = ApiEnvelope),
    ),
    description = "Load a session with its ordered conversation history."
)]
#[tracing::instrument(skip_all)]
pub(crate) async fn get_session(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ApiEnvelope>, ApiError> {
    let user_id = caller_id(&headers)?;
    let view = state
        .core
        .get_session(&user_id, &session_id)
        .await
        .map_err(ApiError::from)?;

    let session = ApiSession {
        id: view.session.id.clone(),
        user_id: view.session.user_id.clone(),
        created_at: view.session.created_at,
        last_activity: view.session.last_activity,
        active: view.session.active,
        preferences: view.session.preferences.clone(),
        turns: view.session.turns.iter().map(to_api_turn).collect(),
    };
    let stats = to_api_stats(&view.stats);

    Ok(Json(ApiEnvelope::ok(
        ResponseType::Response,
        "session loaded",
        json!({
            "session": serde_json::to_value(session).map_err(|e| ApiError::internal(e.to_string()))?,
            "stats": serde_json::to_value(stats).map_err(|e| ApiError::internal(e.to_string()))?,
        }),
    )))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    responses(
        (status = 200, description = "Session deleted", body = ApiEnvelope),
        (status = 404, body = ApiEnvelope),
    ),
    description = "Delete a session and cancel its unconfirmed actions."
)]
#[tracing::instrument(skip_all)]
pub(crate) async fn delete_session(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ApiEnvelope>, ApiError> {
    let user_id = caller_id(&headers)?;
    let deleted = state
        .core
        .delete_session(&user_id, &session_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ApiEnvelope::ok(
        ResponseType::Response,
        "session deleted",
        json!({
            "session_id": deleted.session_id,
            "deleted_at": deleted.deleted_at,
            "cancelled_actions": deleted.cancelled_actions,
        }),
    )))
}

fn to_api_turn(turn: &ConversationTurn) -> ApiConversationTurn {
    ApiConversationTurn {
        timestamp: turn.timestamp,
        user_input: turn.user_input.clone(),
        agent_response: turn.agent_response.clone(),
        tools_invoked: turn.tools_invoked.clone(),
        success: turn.success,
    }
}

fn to_api_stats(stats: &SessionStats) -> ApiSessionStats {
    ApiSessionStats {
        turn_count: stats.turn_count,
        successful_turns: stats.successful_turns,
        tool_usage: stats.tool_usage.clone(),
        last_activity: stats.last_activity,
    }
}
