//! Real-time channel: upgrade gating, first-frame authentication, chat
//! relay.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    agora_auth::{SecurityEventKind, Severity},
    axum::{
        extract::{
            ConnectInfo, State,
            ws::{Message, WebSocket, WebSocketUpgrade},
        },
        http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize},
    tokio::sync::{Notify, mpsc},
    tracing::{debug, info, warn},
};

use crate::{
    gate::GateRejection,
    origin::ConnectionHeaders,
    state::{CLIENT_QUEUE_CAPACITY, ConnectedClient, GatewayState},
};

/// Time a new connection has to send its auth frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Auth { token: String },
    Chat { content: serde_json::Value },
}

/// Server → client frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame<'a> {
    Ready {
        user_id: &'a str,
    },
    Chat {
        seq: u64,
        from: &'a str,
        content: &'a str,
    },
    Error {
        code: &'a str,
        message: &'a str,
    },
}

impl OutboundFrame<'_> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn rejection(rejection: &GateRejection) -> String {
        OutboundFrame::Error {
            code: rejection.code(),
            message: &rejection.to_string(),
        }
        .to_json()
    }
}

/// Map a connection-time rejection to its HTTP response (403 or 429).
pub fn rejection_response(rejection: &GateRejection) -> Response {
    let status = match rejection {
        GateRejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::FORBIDDEN,
    };
    let body = axum::Json(serde_json::json!({ "error": rejection.code() }));
    let mut response = (status, body).into_response();
    if let GateRejection::RateLimited { retry_after } = rejection
        && let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string())
    {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let source = addr.ip().to_string();
    let headers = ConnectionHeaders::from_header_map(&headers);
    if let Err(rejection) = state.gate.check_connection(&source, &headers) {
        debug!(%addr, code = rejection.code(), "channel upgrade refused");
        return rejection_response(&rejection);
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state, addr))
}

/// Drive one upgraded connection until it closes.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_CAPACITY);
    let write_loop = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let Some(user_id) = authenticate(&state, &mut ws_rx, &tx, addr).await else {
        drop(tx);
        let _ = write_loop.await;
        return;
    };

    let evicted = Arc::new(Notify::new());
    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            user_id: user_id.clone(),
            remote_addr: addr,
            sender: tx.clone(),
            evicted: Arc::clone(&evicted),
            connected_at: std::time::Instant::now(),
        })
        .await;
    let _ = tx.try_send(OutboundFrame::Ready { user_id: &user_id }.to_json());
    info!(conn_id = %conn_id, user_id = %user_id, %addr, "channel client connected");

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = evicted.notified() => {
                warn!(conn_id = %conn_id, "channel client fell behind, closing");
                break;
            },
        };
        let Some(msg) = msg else { break };
        let inbound = match msg {
            Ok(Message::Text(text)) => Some(text),
            Ok(Message::Binary(_)) => None,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "channel read error");
                break;
            },
        };
        if let Err(rejection) = state.gate.check_frame(&user_id) {
            let _ = tx.try_send(OutboundFrame::rejection(&rejection));
            continue;
        }
        let result = match inbound {
            None => Err(state.gate.reject_frame(&user_id, "binary frame")),
            Some(text) => match serde_json::from_str::<InboundFrame>(text.as_str()) {
                Ok(InboundFrame::Chat { content }) => state.gate.check_payload(&user_id, &content),
                Ok(InboundFrame::Auth { .. }) => {
                    Err(state.gate.reject_frame(&user_id, "unexpected auth frame"))
                },
                Err(_) => Err(state.gate.reject_frame(&user_id, "malformed frame")),
            },
        };
        match result {
            Ok(clean) => {
                let frame = OutboundFrame::Chat {
                    seq: state.next_seq(),
                    from: &user_id,
                    content: &clean,
                }
                .to_json();
                state.broadcast(&frame).await;
            },
            Err(rejection) => {
                let _ = tx.try_send(OutboundFrame::rejection(&rejection));
            },
        }
    }

    state.remove_client(&conn_id).await;
    drop(tx);
    let _ = write_loop.await;
    info!(conn_id = %conn_id, "channel client disconnected");
}

/// Wait for the auth frame and verify its session token. Sends the error
/// frame itself on failure.
async fn authenticate(
    state: &GatewayState,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    tx: &mpsc::Sender<String>,
    addr: SocketAddr,
) -> Option<String> {
    let source = addr.ip().to_string();
    let first = tokio::time::timeout(AUTH_TIMEOUT, ws_rx.next()).await;
    let token = match first {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str(text.as_str()) {
            Ok(InboundFrame::Auth { token }) => Some(token),
            _ => None,
        },
        Err(_) => {
            warn!(%addr, "channel auth timed out");
            None
        },
        _ => None,
    };

    let user_id = token
        .filter(|t| state.gate.precheck_token(t))
        .and_then(|t| state.issuer.verify_session(&t).ok())
        .map(|claims| claims.sub);

    if user_id.is_none() {
        state.events.emit(
            SecurityEventKind::InvalidInput,
            Severity::Medium,
            source,
            "channel authentication failed",
        );
        let _ = tx.try_send(
            OutboundFrame::Error {
                code: "authentication_failed",
                message: "authentication failed",
            }
            .to_json(),
        );
    }
    user_id
}
