use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::handlers;
use crate::interaction::{InteractionLogger, LabelStore};
use crate::session::SessionRegistry;
use crate::stream::ChatStreamEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub engine: ChatStreamEngine,
    pub labels: Arc<dyn LabelStore>,
    pub interactions: Arc<dyn InteractionLogger>,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route(
            "/labels",
            get(handlers::list_labels).post(handlers::set_label),
        )
        .route("/labels/{address}", delete(handlers::remove_label))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/ws", get(handlers::ws_upgrade))
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Serve `app` on `addr` until Ctrl-C or SIGTERM.
pub async fn serve(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    info!("Shutting down");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}
