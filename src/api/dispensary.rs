//! Client-facing dispense and return endpoints
//!
//! Used by the kiosk web app: a user identified by a 9-digit id takes a ball
//! from, or returns a ball to, a dispensary (device).

use std::sync::Arc;

use axum::{Json, Router, body::Bytes, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;

use super::{AckResponse, ApiError, ApiState, ErrorBody, api_error, command_error};
use crate::protocol::CommandAction;

/// Body of `/api/dispense` and `/api/return`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispensaryRequest {
    pub dispensary_id: Option<String>,
    pub user_id: Option<String>,
}

/// Build dispensary routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/dispense", post(dispense))
        .route("/api/return", post(return_ball))
        .with_state(state)
}

/// Whether `user_id` is exactly nine ASCII digits
#[must_use]
pub fn is_valid_user_id(user_id: &str) -> bool {
    user_id.len() == 9 && user_id.bytes().all(|b| b.is_ascii_digit())
}

/// Parse and validate a request, returning the dispensary id
fn validate(body: &Bytes) -> Result<String, ApiError> {
    let request: DispensaryRequest = serde_json::from_slice(body)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid_body"))?;

    match (request.dispensary_id, request.user_id) {
        (Some(dispensary_id), Some(user_id))
            if !dispensary_id.is_empty() && is_valid_user_id(&user_id) =>
        {
            Ok(dispensary_id)
        }
        _ => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "invalid_request".to_string(),
                message: Some("dispensaryId and a 9-digit userId are required".to_string()),
            }),
        )),
    }
}

/// Give one ball to a user
async fn dispense(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<AckResponse>, ApiError> {
    let dispensary_id = validate(&body)?;

    let ack = state
        .gateway
        .send_command(&dispensary_id, CommandAction::dispense(1))
        .await
        .map_err(|e| command_error(&e))?;

    let message = if ack.success {
        "Ball dispensed!".to_string()
    } else {
        ack.error.clone().unwrap_or_else(|| "Dispense failed".to_string())
    };
    tracing::info!(dispensary_id = %dispensary_id, success = ack.success, "dispense requested");

    Ok(Json(AckResponse {
        message: Some(message),
        ..ack.into()
    }))
}

/// Take a ball back, bumping the device's counter by one
async fn return_ball(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<AckResponse>, ApiError> {
    let dispensary_id = validate(&body)?;

    let device = state.gateway.device(&dispensary_id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "device_not_found".to_string(),
                message: Some("Machine not found".to_string()),
            }),
        )
    })?;
    let count = device.ball_count().unwrap_or(0).saturating_add(1);

    let ack = state
        .gateway
        .send_command(&dispensary_id, CommandAction::set_ball_count(count))
        .await
        .map_err(|e| command_error(&e))?;

    let message = if ack.success {
        "Ball returned!".to_string()
    } else {
        ack.error.clone().unwrap_or_else(|| "Return failed".to_string())
    };
    tracing::info!(dispensary_id = %dispensary_id, count, success = ack.success, "return requested");

    Ok(Json(AckResponse {
        message: Some(message),
        ..ack.into()
    }))
}
