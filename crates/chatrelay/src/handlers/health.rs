//! Liveness and readiness endpoints.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub default_provider: String,
    pub providers: Vec<String>,
    pub sessions: usize,
}

/// GET /livez
pub async fn livez() -> &'static str {
    "ok"
}

/// GET /readyz
///
/// The relay only starts with at least one usable provider, so a response
/// means it can serve turns.
pub async fn readyz(State(state): State<AppState>) -> Json<Readiness> {
    let providers = state.sessions.providers();
    Json(Readiness {
        default_provider: providers.default_provider().config.id.clone(),
        providers: providers.available().map(|p| p.config.id.clone()).collect(),
        sessions: state.sessions.len().await,
    })
}
