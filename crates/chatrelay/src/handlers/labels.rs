//! Address label management handlers.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::response;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct SetLabelRequest {
    address: String,
    label: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    message: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/labels
pub async fn list_labels(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(state.labels.list_labels())
}

/// POST /api/v1/labels
pub async fn set_label(
    State(state): State<AppState>,
    body: Result<Json<SetLabelRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return response::bad_request(rejection.body_text()),
    };
    let address = req.address.trim();
    let label = req.label.trim();
    if address.is_empty() || label.is_empty() {
        return response::bad_request("address and label must not be empty");
    }

    if let Err(e) = state.labels.set_label(address, label).await {
        return response::internal_error(format!("Failed to save label: {e}"));
    }
    info!(address = %address, label = %label, "Address label saved");
    (StatusCode::OK, Json(MessageResponse { message: "saved" })).into_response()
}

/// DELETE /api/v1/labels/{address}
pub async fn remove_label(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    match state.labels.remove_label(&address).await {
        Ok(true) => {
            info!(address = %address, "Address label removed");
            (StatusCode::OK, Json(MessageResponse { message: "removed" })).into_response()
        }
        Ok(false) => response::not_found(format!("No label for '{address}'")),
        Err(e) => response::internal_error(format!("Failed to save labels: {e}")),
    }
}
