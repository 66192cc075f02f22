//! Client side of Huddle: keeps one open conversation consistent with the
//! server from REST snapshots and gateway push events.

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod gateway;
pub mod linkify;
pub mod reconciler;
pub mod timeline;

pub use config::ClientConfig;
pub use error::ClientError;
pub use reconciler::{Conversation, ConversationState, ConversationView, Effect, Recipient};

use crate::api::HttpChatApi;
use crate::driver::{ClientDriver, DriverChannels};

/// Start a driver over HTTP plus its push channel on the current runtime.
pub fn connect(config: ClientConfig) -> DriverChannels {
    let conversation = Conversation::from_config(&config);
    let (driver, channels) = ClientDriver::new(conversation, HttpChatApi::new(&config));
    tokio::spawn(driver.run());
    tokio::spawn(gateway::run_push_channel(config, channels.handle.clone()));
    channels
}
