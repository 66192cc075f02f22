use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use uuid::Uuid;

use huddle_types::events::{GatewayCommand, GatewayEvent};

use crate::config::ClientConfig;
use crate::driver::DriverHandle;
use crate::error::{ClientError, Result};

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Keep a gateway connection open for the lifetime of the driver, feeding
/// text frames into it. After every reconnect the driver is told to resync,
/// since pushes sent while disconnected are gone.
pub async fn run_push_channel(config: ClientConfig, handle: DriverHandle) {
    let mut backoff = INITIAL_BACKOFF;
    let mut reconnecting = false;

    loop {
        let mut ready = false;
        let result = session(&config, &handle, reconnecting, &mut ready).await;
        if ready {
            backoff = INITIAL_BACKOFF;
            reconnecting = true;
        }

        match result {
            Ok(()) => info!("Gateway closed the push channel"),
            Err(ClientError::Closed) => {
                debug!("Client driver stopped, closing push channel");
                return;
            }
            Err(e) => warn!("Push channel error: {}", e),
        }

        debug!("Reconnecting to gateway in {:?}", backoff);
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

async fn session(
    config: &ClientConfig,
    handle: &DriverHandle,
    reconnecting: bool,
    ready: &mut bool,
) -> Result<()> {
    let (ws, _) = connect_async(config.gateway_url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let identify = serde_json::to_string(&GatewayCommand::Identify {
        token: config.token.clone(),
    })?;
    sink.send(WsMessage::Text(identify.into())).await?;

    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) if !*ready => {
                check_ready(text.as_str(), config.user_id)?;
                *ready = true;
                debug!("Gateway session ready");
                if reconnecting {
                    handle.reconnected()?;
                }
            }
            WsMessage::Text(text) => handle.push(text.as_str().to_owned())?,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

/// The first frame after Identify must be `Ready` for our own user.
fn check_ready(frame: &str, user_id: Uuid) -> Result<()> {
    match serde_json::from_str::<GatewayEvent>(frame) {
        Ok(GatewayEvent::Ready { user_id: ready_for }) if ready_for == user_id => Ok(()),
        Ok(GatewayEvent::Ready { user_id: ready_for }) => Err(ClientError::Handshake(format!(
            "session opened for {ready_for}, expected {user_id}"
        ))),
        _ => Err(ClientError::Handshake(format!(
            "expected Ready, got {}",
            frame.chars().take(200).collect::<String>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut delay = INITIAL_BACKOFF;
        let mut seen = vec![delay];
        for _ in 0..6 {
            delay = next_backoff(delay);
            seen.push(delay);
        }
        let secs: Vec<u64> = seen.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn first_frame_must_be_ready_for_this_user() {
        let me = Uuid::new_v4();
        let ready = serde_json::to_string(&GatewayEvent::Ready { user_id: me }).unwrap();
        assert!(check_ready(&ready, me).is_ok());

        let other = serde_json::to_string(&GatewayEvent::Ready { user_id: Uuid::new_v4() }).unwrap();
        assert!(matches!(check_ready(&other, me), Err(ClientError::Handshake(_))));

        let early_event = serde_json::to_string(&GatewayEvent::MessageRead { message_id: Uuid::new_v4() }).unwrap();
        assert!(matches!(check_ready(&early_event, me), Err(ClientError::Handshake(_))));
        assert!(matches!(check_ready("{ nope", me), Err(ClientError::Handshake(_))));
    }
}
