//! WebSocket gateway: authenticates upgrades, registers live connections and
//! drives each one until it closes.
//!
//! Every connection gets a writer task (outbound queue, heartbeat pings,
//! close signal) and a reader task (client frames, idle timeout). Whichever
//! finishes first ends the connection; the supervisor then deregisters it
//! and, if that call actually removed it, broadcasts presence.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientFrame, ServerEvent};
use parley_shared::UserId;

use crate::api::AppState;
use crate::auth::{claim_from_headers, AuthError, AuthResolver};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceBroadcaster;
use crate::sessions::{ConnectionHandle, ConnectionId, SessionStore};

/// How long the writer gets to flush a close frame once the reader is done.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Registered,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Registered)
                | (Authenticating, Closed)
                | (Registered, Closing)
                | (Closing, Closed)
        )
    }
}

struct Lifecycle {
    conn: Option<ConnectionId>,
    user: Option<UserId>,
    state: ConnectionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            conn: None,
            user: None,
            state: ConnectionState::Connecting,
        }
    }

    fn bind(&mut self, handle: &ConnectionHandle) {
        self.conn = Some(handle.id());
        self.user = Some(handle.user_id());
    }

    fn advance(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                conn = ?self.conn,
                from = ?self.state,
                to = ?next,
                "Unexpected connection state transition"
            );
        }
        debug!(conn = ?self.conn, user = ?self.user, state = ?next, "Connection state");
        self.state = next;
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    Logout,
    IdleTimeout,
    TransportError,
    ServerClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub outbound_queue: usize,
    /// 0 means unlimited.
    pub max_connections_per_user: usize,
}

impl From<&ServerConfig> for GatewaySettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            idle_timeout: config.idle_timeout,
            outbound_queue: config.outbound_queue,
            max_connections_per_user: config.max_connections_per_user,
        }
    }
}

pub struct Gateway {
    sessions: Arc<SessionStore>,
    presence: Arc<PresenceBroadcaster>,
    auth: Arc<dyn AuthResolver>,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        sessions: Arc<SessionStore>,
        presence: Arc<PresenceBroadcaster>,
        auth: Arc<dyn AuthResolver>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            sessions,
            presence,
            auth,
            settings,
        }
    }

    /// Resolve the handshake claim and enforce the per-user connection limit.
    pub async fn authenticate(&self, claim: Option<&str>) -> Result<UserId, ServerError> {
        let claim = claim.ok_or(AuthError::MissingClaim)?;
        let user = self.auth.resolve(claim).await.map_err(|e| {
            debug!(error = %e, "Connection rejected");
            e
        })?;

        let limit = self.settings.max_connections_per_user;
        if limit > 0 && self.sessions.connection_count_for(user) >= limit {
            warn!(user = %user, limit, "Connection limit reached");
            return Err(ServerError::TooManyConnections);
        }
        Ok(user)
    }

    /// Close every live connection of `user`. Returns how many were closed.
    pub fn disconnect_user(&self, user: UserId) -> usize {
        let closed = self
            .sessions
            .connections_for(user)
            .iter()
            .filter(|handle| self.sessions.deregister(handle))
            .count();

        if closed > 0 {
            info!(user = %user, closed, "Disconnected user");
            self.presence.broadcast();
        }
        closed
    }

    async fn run(
        self: Arc<Self>,
        socket: WebSocket,
        handle: ConnectionHandle,
        rx: mpsc::Receiver<Arc<ServerEvent>>,
        mut lifecycle: Lifecycle,
    ) {
        if !self.sessions.register(handle.clone()) {
            lifecycle.advance(ConnectionState::Closed);
            return;
        }
        lifecycle.advance(ConnectionState::Registered);
        info!(
            user = %handle.user_id(),
            conn = %handle.id(),
            total = self.sessions.connection_count(),
            "Connection opened"
        );
        self.presence.broadcast();

        let (ws_tx, ws_rx) = socket.split();
        let mut writer = tokio::spawn(write_loop(
            ws_tx,
            rx,
            handle.clone(),
            self.settings.heartbeat_interval,
        ));
        let mut reader = tokio::spawn(read_loop(ws_rx, handle.clone(), self.settings.idle_timeout));

        let reason = tokio::select! {
            done = &mut writer => {
                reader.abort();
                done.unwrap_or(CloseReason::TransportError)
            }
            done = &mut reader => {
                handle.close();
                if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    writer.abort();
                }
                done.unwrap_or(CloseReason::TransportError)
            }
        };

        lifecycle.advance(ConnectionState::Closing);
        if self.sessions.deregister(&handle) {
            self.presence.broadcast();
        }
        lifecycle.advance(ConnectionState::Closed);

        info!(
            user = %handle.user_id(),
            conn = %handle.id(),
            reason = ?reason,
            online_secs = (Utc::now() - handle.connected_at()).num_seconds(),
            "Connection closed"
        );
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// `GET /api/ws`: the claim comes from `?token=`, else the same headers the
/// HTTP API accepts.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let claim = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| claim_from_headers(&headers));

    let gateway = Arc::clone(&state.gateway);
    let mut lifecycle = Lifecycle::new();
    lifecycle.advance(ConnectionState::Authenticating);

    let user = match gateway.authenticate(claim.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            lifecycle.advance(ConnectionState::Closed);
            return Err(e);
        }
    };
    let (handle, rx) = ConnectionHandle::new(user, gateway.settings.outbound_queue);
    lifecycle.bind(&handle);

    Ok(ws.on_upgrade(move |socket| gateway.run(socket, handle, rx, lifecycle)))
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<ServerEvent>>,
    handle: ConnectionHandle,
    heartbeat: Duration,
) -> CloseReason {
    let mut ping = tokio::time::interval(heartbeat);
    ping.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            biased;

            _ = handle.closed() => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: Utf8Bytes::from_static("closed"),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                return CloseReason::ServerClosed;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    return CloseReason::ServerClosed;
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn = %handle.id(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    return CloseReason::TransportError;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    return CloseReason::TransportError;
                }
                tracing::trace!(conn = %handle.id(), "Sent ping");
            }
        }
    }
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    handle: ConnectionHandle,
    idle_timeout: Duration,
) -> CloseReason {
    loop {
        let frame = match tokio::time::timeout(idle_timeout, ws_rx.next()).await {
            Err(_) => return CloseReason::IdleTimeout,
            Ok(None) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => {
                debug!(conn = %handle.id(), error = %e, "WebSocket read failed");
                return CloseReason::TransportError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match ClientFrame::from_json(text.as_str()) {
                Ok(ClientFrame::Ping) => {
                    if handle.send(Arc::new(ServerEvent::Pong)).is_err() {
                        return CloseReason::TransportError;
                    }
                }
                Ok(ClientFrame::Logout) => return CloseReason::Logout,
                Err(e) => debug!(conn = %handle.id(), error = %e, "Ignoring unknown client frame"),
            },
            Message::Close(_) => return CloseReason::ClientClosed,
            // Pings are answered by axum; any frame counts as activity.
            _ => {}
        }
    }
}
