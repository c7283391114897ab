//! WebSocket push channel.
//!
//! Each connection runs three tasks:
//!
//! 1. Ingest reads frames and queues text frames for the dispatcher. It keeps
//!    reading while a turn runs, so Close and ping frames are never delayed.
//! 2. The dispatcher handles queued [`ClientEvent`]s one at a time, so a
//!    second message waits for the current turn.
//! 3. Egress drains the connection's event queue into text frames.
//!
//! `tokio::select!` waits for ingest or egress to finish, aborts the other,
//! and the session is dropped from the registry. A turn already in flight
//! runs to completion; frames still queued behind it are discarded.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, header};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedSender};
use tracing::{debug, info, warn};

use chatrelay_protocol::{ClientEvent, ServerEvent};

use crate::interaction::Interaction;
use crate::server::AppState;
use crate::session::{DeviceInfo, Session, SessionHandle};
use crate::stream::{ChannelSurface, StreamPrinter};

/// GET /ws
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
) -> impl IntoResponse {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let origin = origin_address(&headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let device = DeviceInfo::from_user_agent(user_agent);

    ws.on_upgrade(move |socket| handle_socket(socket, state, origin, device))
}

/// Caller address: `X-Real-IP`, else the first `X-Forwarded-For` hop, else the peer.
pub(crate) fn origin_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }
    if let Some(first) = header_value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Text frames that may wait behind a running turn before new ones are refused.
const PENDING_FRAMES: usize = 8;

async fn handle_socket(socket: WebSocket, state: AppState, origin: String, device: DeviceInfo) {
    let connection_id = state.sessions.connect(&origin, device).await;
    info!(connection_id = %connection_id, origin = %origin, "WebSocket connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (frames_tx, frames_rx) = mpsc::channel::<String>(PENDING_FRAMES);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut egress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(run_dispatcher(
        state.clone(),
        connection_id.clone(),
        frames_rx,
        tx.clone(),
    ));

    let mut ingest = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if !enqueue_frame(&frames_tx, text.as_str().to_string(), &tx) {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }

    state.sessions.disconnect(&connection_id).await;
    info!(connection_id = %connection_id, "WebSocket disconnected");
}

/// Queue a text frame for the dispatcher. Returns `false` once the dispatcher is gone.
fn enqueue_frame(frames: &Sender<String>, frame: String, tx: &UnboundedSender<ServerEvent>) -> bool {
    match frames.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            send(tx, ServerEvent::system("Too many pending messages, please wait"));
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Dispatch queued frames in order until the queue closes or the client is gone.
async fn run_dispatcher(
    state: AppState,
    connection_id: String,
    mut frames: Receiver<String>,
    tx: UnboundedSender<ServerEvent>,
) {
    while let Some(frame) = frames.recv().await {
        if tx.is_closed() {
            debug!(connection_id = %connection_id, "Client gone, discarding queued frames");
            break;
        }
        dispatch_frame(&state, &connection_id, &frame, &tx).await;
    }
}

fn send(tx: &UnboundedSender<ServerEvent>, event: ServerEvent) {
    if tx.send(event).is_err() {
        debug!("Connection gone, dropping event");
    }
}

fn api_models(session: &Session) -> ServerEvent {
    ServerEvent::ApiModels {
        models: session.models(),
        default_model: session.model_id().to_string(),
    }
}

/// Parse one text frame and dispatch it.
pub(crate) async fn dispatch_frame(
    state: &AppState,
    connection_id: &str,
    frame: &str,
    tx: &UnboundedSender<ServerEvent>,
) {
    match serde_json::from_str::<ClientEvent>(frame) {
        Ok(event) => dispatch(state, connection_id, event, tx).await,
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "Malformed client frame");
            send(tx, ServerEvent::system(format!("Malformed request: {e}")));
        }
    }
}

/// Apply one client event to the connection's session.
pub(crate) async fn dispatch(
    state: &AppState,
    connection_id: &str,
    event: ClientEvent,
    tx: &UnboundedSender<ServerEvent>,
) {
    let Some(handle) = state.sessions.get(connection_id).await else {
        send(tx, ServerEvent::system("Session expired, please reconnect"));
        return;
    };

    match event {
        ClientEvent::UserMessage { message } => {
            run_turn(state, connection_id, &handle, &message, tx).await;
        }
        ClientEvent::SwitchApi { api_num } => {
            let mut session = handle.state().await;
            match session.switch_provider_index(state.sessions.providers(), api_num) {
                Ok(()) => {
                    info!(
                        connection_id = %connection_id,
                        provider = %session.provider_id(),
                        "Switched provider"
                    );
                    send(
                        tx,
                        ServerEvent::system(format!(
                            "Switched to {} API",
                            session.display_name()
                        )),
                    );
                    send(tx, api_models(&session));
                }
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "Provider switch rejected");
                    send(tx, ServerEvent::system("API not configured or unavailable"));
                }
            }
        }
        ClientEvent::SwitchModel { model } => {
            let mut session = handle.state().await;
            match session.switch_model(&model) {
                Ok(()) => send(tx, ServerEvent::ModelSwitched { model }),
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "Model switch rejected");
                    send(tx, ServerEvent::system("Invalid model selection"));
                }
            }
        }
        ClientEvent::ClearChat => handle.state().await.clear_history(),
        ClientEvent::GetModels => {
            let session = handle.state().await;
            send(tx, api_models(&session));
        }
    }
}

async fn run_turn(
    state: &AppState,
    connection_id: &str,
    handle: &SessionHandle,
    message: &str,
    tx: &UnboundedSender<ServerEvent>,
) {
    let _turn = handle.begin_turn().await;

    let request = {
        let mut session = handle.state().await;
        state.interactions.log(Interaction {
            address_label: state.labels.get_label(session.origin_address()),
            connection_id: connection_id.to_string(),
            provider_id: session.provider_id().to_string(),
            model_id: session.model_id().to_string(),
            device: session.device().clone(),
            input: message.to_string(),
        });
        session.begin_turn(message)
    };

    let surface = ChannelSurface::new(connection_id, tx.clone());
    let mut printer = StreamPrinter::new(surface, request.display_name.clone());
    let result = state.engine.stream(&request, &mut printer).await;

    handle.state().await.append_assistant(&result.answer_text);
    debug!(
        connection_id = %connection_id,
        answer_chars = result.answer_text.chars().count(),
        reasoning_chars = result.reasoning_text.chars().count(),
        "Turn complete"
    );
}
