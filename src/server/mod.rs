use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

use crate::core::Core;
use crate::server::envelope::{ApiEnvelope, ResponseType};
use crate::server::error::ApiError;

pub mod command;
pub mod envelope;
pub mod error;
pub mod session;

pub(crate) struct ServerState {
    pub(crate) core: Arc<Core>,
}

/// HTTP front for the orchestration core.
///
/// Transport-level authentication is an external collaborator: the proxy in
/// front of this server validates credentials and forwards the resolved
/// caller identity in the `x-user-id` header.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    pub async fn start(core: Arc<Core>, bind: SocketAddr) -> Result<Self, String> {
        let state = Arc::new(ServerState { core });
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = Router::new()
            .route("/health", get(health))
            .route("/status", get(status))
            .route("/commands", post(command::submit_command))
            .route("/actions/confirm", post(command::confirm_action))
            .route(
                "/sessions/:id",
                get(session::get_session).delete(session::delete_session),
            )
            .with_state(state)
            .layer(cors);

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|error| error.to_string())?;
        let addr = listener.local_addr().map_err(|error| error.to_string())?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Server {
            addr,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&mut self) -> Result<(), String> {
        if let Some(sender) = self.shutdown.take() {
            sender
                .send(())
                .map_err(|_| "failed to send server shutdown signal".to_string())
        } else {
            Ok(())
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

async fn health() -> &'static str {
    "ok"
}

#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses((status = 200, description = "Per-capability readiness", body = ApiEnvelope)),
    description = "Best-effort readiness probe for every registered capability."
)]
async fn status(State(state): State<Arc<ServerState>>) -> Json<ApiEnvelope> {
    let report = state.core.status();
    Json(ApiEnvelope::ok(
        ResponseType::Response,
        "status",
        json!({"capabilities": report.capabilities}),
    ))
}

/// Resolved caller identity forwarded by the authenticating proxy.
pub(crate) fn caller_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing x-user-id header"))
}
