use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, warn};
use uuid::Uuid;

use huddle_db::Database;
use huddle_types::api::Claims;
use huddle_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a fresh socket has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a gateway session needs from the server.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

/// Verify a bearer token issued by the identity provider.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Handle a single WebSocket connection: Identify handshake, then the event loop.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let claims = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };
    let user_id = claims.sub;
    let username = claims.username;

    // Step 2: Register the session before loading group subscriptions, so a
    // membership added in between is caught by either the join or the read.
    let (conn_id, user_rx) = ctx.dispatcher.register_session(user_id).await;

    let db = ctx.db.clone();
    let group_ids = match tokio::task::spawn_blocking(move || db.group_ids_for_user(user_id)).await {
        Ok(Ok(ids)) => ids,
        Ok(Err(e)) => {
            warn!("Failed to load groups for {}: {}", user_id, e);
            Vec::new()
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            Vec::new()
        }
    };
    ctx.dispatcher.join_groups(user_id, &group_ids).await;

    info!(
        "{} ({}) connected to gateway, {} group channels",
        username,
        user_id,
        group_ids.len()
    );

    // Step 3: Send Ready event
    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        ctx.dispatcher.unregister_session(user_id, conn_id).await;
        return;
    }

    run_connection_loop(sender, receiver, &ctx.dispatcher, user_id, &username, user_rx).await;

    ctx.dispatcher.unregister_session(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    username: &str,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<crate::dispatcher::Frame>,
) {
    let mut broadcast_rx = dispatcher.subscribe_all();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward broadcast + targeted frames -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(frame) = result else { break };
                    if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client. The push channel is server -> client only, so
    // anything but pongs and close is logged and dropped.
    let username_recv = username.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Identify { .. }) => {
                        warn!("{} ({}) sent Identify twice, ignoring", username_recv, user_id);
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let Ok(text) = serde_json::to_string(event) else {
        return false;
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return verify_token(jwt_secret, &token);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    fn token(secret: &str, exp: usize) -> (Uuid, String) {
        let sub = Uuid::new_v4();
        let claims = Claims {
            sub,
            username: "alice".into(),
            exp,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();
        (sub, token)
    }

    #[test]
    fn verify_token_checks_signature_and_expiry() {
        let far_future = 4_102_444_800; // 2100-01-01
        let (sub, good) = token("secret", far_future);
        assert_eq!(verify_token("secret", &good).map(|c| c.sub), Some(sub));
        assert!(verify_token("other-secret", &good).is_none());

        let (_, expired) = token("secret", 1_000);
        assert!(verify_token("secret", &expired).is_none());
        assert!(verify_token("secret", "not-a-jwt").is_none());
    }
}
