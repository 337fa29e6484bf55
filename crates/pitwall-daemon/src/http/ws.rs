//! WebSocket telemetry endpoint.
//!
//! `GET /ws/telemetry?token=<jwt>`. The token is checked before any frame
//! flows; a bad token closes the socket with code 4001. Each accepted
//! subscriber gets a hub subscription drained by this handler's write
//! loop, a server ping every 20 s (two unanswered pings close with 1011),
//! and a 1001 "going away" close when the server shuts down.

use std::borrow::Cow;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use super::extract::authenticate;
use super::AppState;

/// Heartbeat interval.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Unanswered pings tolerated before the connection is declared dead.
const MAX_UNACKED_PINGS: u32 = 2;

/// Close code for a failed token check.
const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Close code for a dead or erroring connection.
const CLOSE_INTERNAL: u16 = 1011;

/// Close code sent to every subscriber on server shutdown.
const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: String,
}

/// `GET /ws/telemetry`
pub async fn telemetry(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket, query.token))
}

async fn handle_socket(state: AppState, mut socket: WebSocket, token: String) {
    let user = match authenticate(&state, &token) {
        Ok(user) => user,
        Err(_) => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHORIZED,
                    reason: Cow::Borrowed("Unauthorized"),
                })))
                .await;
            return;
        }
    };
    info!(user = %user.username, "telemetry subscriber connected");

    let subscription = state.hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // the first tick fires immediately
    let mut unacked_pings: u32 = 0;

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                match frame {
                    Some(frame) => {
                        let Ok(payload) = serde_json::to_string(&*frame) else {
                            continue;
                        };
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Hub closed us: server shutdown.
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_GOING_AWAY,
                                reason: Cow::Borrowed("going away"),
                            })))
                            .await;
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => unacked_pings = 0,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = ping.tick() => {
                if unacked_pings >= MAX_UNACKED_PINGS {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_INTERNAL,
                            reason: Cow::Borrowed("heartbeat timeout"),
                        })))
                        .await;
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                unacked_pings += 1;
            }
        }
    }

    // Subscription drop unsubscribes from the hub; stale queued frames go
    // with it.
    debug!(user = %user.username, dropped = subscription.dropped(), "telemetry subscriber closed");
}
