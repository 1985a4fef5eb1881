//! Device REST endpoints
//!
//! Listing devices and issuing commands to a device by id

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use super::{AckResponse, ApiError, ApiState, api_error, command_error};
use crate::devices::DeviceState;
use crate::protocol::{CommandAction, DispenseParams, JsonMap};

/// REST request for issuing an arbitrary command
#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub action: String,
    #[serde(default)]
    pub params: JsonMap,
}

/// Build device routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_devices))
        .route("/{device_id}", get(get_device))
        .route("/{device_id}/dispense", post(dispense))
        .route("/{device_id}/command", post(command))
        .with_state(state)
}

/// List all known devices
async fn list_devices(State(state): State<Arc<ApiState>>) -> Json<Vec<DeviceState>> {
    Json(state.gateway.devices().await)
}

/// Get a specific device
async fn get_device(
    State(state): State<Arc<ApiState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceState>, ApiError> {
    state
        .gateway
        .device(&device_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "device_not_found"))
}

/// Dispense balls from a device
///
/// A missing or unreadable body dispenses one ball.
async fn dispense(
    State(state): State<Arc<ApiState>>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<Json<AckResponse>, ApiError> {
    let params: DispenseParams = serde_json::from_slice(&body).unwrap_or_default();

    state
        .gateway
        .send_command(&device_id, CommandAction::Dispense(params))
        .await
        .map(|ack| Json(ack.into()))
        .map_err(|e| command_error(&e))
}

/// Issue any action to a device
async fn command(
    State(state): State<Arc<ApiState>>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<Json<AckResponse>, ApiError> {
    let body: CommandBody = serde_json::from_slice(&body)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid_body"))?;
    let action = CommandAction::from_parts(&body.action, body.params).map_err(|e| {
        tracing::debug!(device_id = %device_id, error = %e, "rejected command parameters");
        api_error(StatusCode::BAD_REQUEST, "invalid_body")
    })?;

    state
        .gateway
        .send_command(&device_id, action)
        .await
        .map(|ack| Json(ack.into()))
        .map_err(|e| command_error(&e))
}
