//! HTTP API and device WebSocket server

pub mod devices;
pub mod dispensary;
pub mod health;
pub mod ws;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, http::StatusCode};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::ServerConfig;
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::protocol::{CommandAck, JsonMap};

/// Shared state for API handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    pub gateway: Gateway,
    pub started_at: Instant,
}

impl ApiState {
    /// State for a gateway starting now
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            started_at: Instant::now(),
        }
    }
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error response: status code plus JSON body
pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Build an error response
pub fn api_error(status: StatusCode, code: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: code.into(),
            message: None,
        }),
    )
}

/// Map a command failure onto its HTTP status
#[must_use]
pub const fn command_status(err: &CommandError) -> StatusCode {
    match err {
        CommandError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        CommandError::DeviceOffline(_) | CommandError::DeviceDisconnected { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CommandError::CommandTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CommandError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error response for a failed command
#[must_use]
pub fn command_error(err: &CommandError) -> ApiError {
    let status = command_status(err);
    let code = match err {
        CommandError::Transport(message) => message.clone(),
        other => other.code().to_string(),
    };
    if status.is_server_error() {
        tracing::warn!(error = %err, "command failed");
    }
    api_error(status, code)
}

/// Successful command response
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: JsonMap,
}

impl From<CommandAck> for AckResponse {
    fn from(ack: CommandAck) -> Self {
        Self {
            success: ack.success,
            error: ack.error,
            message: None,
            data: ack.data,
        }
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .nest("/api/devices", devices::router(state.clone()))
        .merge(dispensary::router(state.clone()))
        .merge(health::router(state.clone()))
        .merge(ws::router(state));

    // Serve static files if configured
    let router = if let Some(static_dir) = static_dir {
        let index_file = static_dir.join("index.html");
        let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));
        tracing::info!(path = %static_dir.display(), "serving static files");
        router.fallback_service(serve_dir)
    } else {
        router.fallback(not_found)
    };

    // CORS layer for cross-origin requests from the web UI
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

async fn not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found")
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    config: ServerConfig,
}

impl ApiServer {
    /// Create a server for `gateway`
    #[must_use]
    pub fn new(gateway: Gateway, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(ApiState::new(gateway)),
            config,
        }
    }

    /// Run the API server until `shutdown` completes
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Server(format!("failed to bind {addr}: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        let app = router(self.state, self.config.static_dir.as_deref());
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Server(format!("API server error: {e}")))?;

        Ok(())
    }
}
