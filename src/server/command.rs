use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::server::envelope::ApiEnvelope;
use crate::server::error::ApiError;
use crate::server::{caller_id, ServerState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitCommandRequest {
    pub command: String,
    pub session_id: Option<String>,
    pub preferences: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmActionRequest {
    pub action_id: String,
    pub session_id: String,
    pub confirmed: bool,
    #[schema(value_type = Option<Object>)]
    pub parameters: Option<serde_json::Value>,
}

#[utoipa::path(
    post,
    path = "/commands",
    tag = "commands",
    request_body = SubmitCommandRequest,
    responses(
        (status = 200, description = "Command processed", body = ApiEnvelope),
        (status = 400, body = ApiEnvelope),
        (status = 404, body = ApiEnvelope),
    ),
    description = "Submit a natural-language command for orchestration."
)]
#[tracing::instrument(skip_all)]
pub(crate) async fn submit_command(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(payload): Json<SubmitCommandRequest>,
) -> Result<Json<ApiEnvelope>, ApiError> {
    let user_id = caller_id(&headers)?;
    if payload.command.trim().is_empty() {
        return Err(ApiError::validation("command must not be empty"));
    }
    let response = state
        .core
        .submit_command(
            &user_id,
            &payload.command,
            payload.session_id.as_deref(),
            payload.preferences,
        )
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ApiEnvelope::from(response)))
}

#[utoipa::path(
    post,
    path = "/actions/confirm",
    tag = "commands",
    request_body = ConfirmActionRequest,
    responses(
        (status = 200, description = "Action confirmed or cancelled", body = ApiEnvelope),
        (status = 404, body = ApiEnvelope),
        (status = 409, description = "Action already in a terminal state", body = ApiEnvelope),
    ),
    description = "Confirm or cancel an action awaiting confirmation."
)]
#[tracing::instrument(skip_all)]
pub(crate) async fn confirm_action(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(payload): Json<ConfirmActionRequest>,
) -> Result<Json<ApiEnvelope>, ApiError> {
    let user_id = caller_id(&headers)?;
    let response = state
        .core
        .confirm_action(
            &user_id,
            &payload.session_id,
            &payload.action_id,
            payload.confirmed,
            payload.parameters,
        )
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ApiEnvelope::from(response)))
}
