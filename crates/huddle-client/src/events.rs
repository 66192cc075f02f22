use tracing::warn;

use huddle_types::events::GatewayEvent;

/// Decode one push frame. Malformed or unknown payloads are logged and
/// dropped; they never reach the reconciler.
pub fn decode_event(frame: &str) -> Option<GatewayEvent> {
    match serde_json::from_str(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Ignoring undecodable push frame: {} ({} bytes)", e, frame.len());
            None
        }
    }
}
