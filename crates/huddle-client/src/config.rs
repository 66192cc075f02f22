use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use uuid::Uuid;

/// UTC+07:00, the timezone conversation dates are shown in.
pub const DEFAULT_TZ_OFFSET_MINUTES: i32 = 7 * 60;

/// How long a conversation stays open after the other side blocks us.
pub const DEFAULT_BLOCKED_RESET_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST root, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// WebSocket gateway, e.g. `ws://localhost:3000/gateway`.
    pub gateway_url: String,
    pub token: String,
    pub user_id: Uuid,
    pub tz_offset_minutes: i32,
    pub blocked_reset_delay: Duration,
}

impl ClientConfig {
    /// Config with defaults, deriving the gateway URL from the REST root.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, user_id: Uuid) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let gateway_url = gateway_url_for(&base_url);
        Self {
            base_url,
            gateway_url,
            token: token.into(),
            user_id,
            tz_offset_minutes: DEFAULT_TZ_OFFSET_MINUTES,
            blocked_reset_delay: DEFAULT_BLOCKED_RESET_DELAY,
        }
    }

    pub fn tz_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

fn gateway_url_for(base_url: &str) -> String {
    let ws = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{ws}/gateway")
}
