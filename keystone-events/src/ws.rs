//! The `GET /ws` upgrade endpoint (§6) and per-connection send/receive loops
//! (§4.5 "Connection model", "Cancellation").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use keystone_security::jwt::{extract_bearer, JwtValidator};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::event::{ClientFrame, ServerFrame};
use crate::hub::EventHub;

/// Server ping cadence (§6 "default 60 s").
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
/// How long a client has to pong back before being disconnected (§6 "default 10 s").
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WsState {
    pub hub: EventHub,
    pub validator: Arc<JwtValidator>,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl WsState {
    pub fn new(hub: EventHub, validator: Arc<JwtValidator>) -> Self {
        Self {
            hub,
            validator,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }
}

/// `GET /ws?token=<jwt>` — the handshake must carry a valid bearer token
/// (header first, `token` query parameter second) or the upgrade is refused.
pub async fn ws_handler(
    State(state): State<WsState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| extract_bearer(v).ok())
        .map(str::to_string)
        .or_else(|| params.get("token").cloned());

    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };

    let user = match state.validator.validate(&token) {
        Ok(user) => user,
        Err(_) => return (StatusCode::UNAUTHORIZED, "invalid token").into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user.username))
}

async fn handle_socket(socket: WebSocket, state: WsState, username: String) {
    let client = state.hub.connect(username);
    debug!(client_id = %client.id, "websocket client connected");

    let (mut sink, mut stream) = socket.split();
    let send_hub = client.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frames = send_hub.next_frames() => {
                    for frame in frames {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                }
                _ = send_hub.closing() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    });

    // Tracks the last time this connection replied to a server-initiated
    // ping (§4.5 "disconnects if no pong within a timeout").
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let ping_hub = client.clone();
    let ping_interval_dur = state.ping_interval;
    let pong_timeout_dur = state.pong_timeout;
    let ping_last_pong = last_pong.clone();
    let mut ping_task = tokio::spawn(async move {
        let mut ticker = interval(ping_interval_dur);
        loop {
            ticker.tick().await;
            let sent_at = Instant::now();
            ping_hub.queue_ping().await;
            tokio::time::sleep(pong_timeout_dur).await;
            let replied = *ping_last_pong.lock().expect("last_pong mutex poisoned") >= sent_at;
            if !replied {
                warn!(client_id = %ping_hub.id, "no pong within timeout, disconnecting");
                return;
            }
        }
    });

    let recv_hub = state.hub.clone();
    let recv_client = client.clone();
    let recv_last_pong = last_pong.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_frame(&recv_hub, recv_client.id, &text, &recv_last_pong).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => { ping_task.abort(); recv_task.abort(); }
        _ = &mut ping_task => { send_task.abort(); recv_task.abort(); }
        _ = &mut recv_task => { send_task.abort(); ping_task.abort(); }
    }

    state.hub.disconnect(client.id);
    debug!(client_id = %client.id, "websocket client disconnected");
}

async fn handle_client_frame(hub: &EventHub, client_id: uuid::Uuid, text: &str, last_pong: &Mutex<Instant>) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed websocket control frame");
            return;
        }
    };
    match frame {
        ClientFrame::Subscribe { data } => {
            hub.subscribe(client_id, &data.event_types).await;
            hub.ack(client_id, ServerFrame::SubscriptionConfirmed { event_types: data.event_types })
                .await;
        }
        ClientFrame::Unsubscribe { data } => {
            hub.unsubscribe(client_id, &data.event_types).await;
            hub.ack(client_id, ServerFrame::UnsubscriptionConfirmed { event_types: data.event_types })
                .await;
        }
        ClientFrame::Ping => {
            hub.ack(client_id, ServerFrame::Pong).await;
        }
        ClientFrame::Pong => {
            *last_pong.lock().expect("last_pong mutex poisoned") = Instant::now();
        }
    }
}
