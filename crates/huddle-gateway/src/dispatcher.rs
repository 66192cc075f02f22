use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, trace};
use uuid::Uuid;

use huddle_types::events::{GatewayEvent, Scope};

/// Pre-serialized event frame, shared between all sessions it is sent to.
pub type Frame = Arc<str>;

/// How group-scoped events are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanoutMode {
    /// Only sessions of users subscribed to the group channel receive them.
    #[default]
    Scoped,
    /// Every connected session receives them.
    Broadcast,
}

impl FromStr for FanoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scoped" => Ok(Self::Scoped),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(format!("unknown fan-out mode: {other}")),
        }
    }
}

impl fmt::Display for FanoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoped => f.write_str("scoped"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Manages connected sessions and fans events out to them.
///
/// Delivery is at-most-once: nothing is queued for users without a live
/// session, so clients re-read state over REST after reconnecting.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    mode: FanoutMode,

    /// Broadcast channel for `Scope::All`
    broadcast_tx: broadcast::Sender<Frame>,

    /// Connected sessions: user_id -> (conn_id -> sender)
    sessions: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<Frame>>>>,

    /// Group channels: group_id -> connected users subscribed to it
    groups: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(FanoutMode::default())
    }
}

impl Dispatcher {
    pub fn new(mode: FanoutMode) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                mode,
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
                groups: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn mode(&self) -> FanoutMode {
        self.inner.mode
    }

    /// Subscribe to `Scope::All` frames.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Frame> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Register a session for `user_id`. Returns (conn_id, receiver).
    pub async fn register_session(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<Frame>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Unregister one session. When it was the user's last one, the user is
    /// also dropped from every group channel.
    pub async fn unregister_session(&self, user_id: Uuid, conn_id: Uuid) {
        let last_session = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get_mut(&user_id) {
                Some(conns) => {
                    conns.remove(&conn_id);
                    if conns.is_empty() {
                        sessions.remove(&user_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last_session {
            let mut groups = self.inner.groups.write().await;
            groups.retain(|_, users| {
                users.remove(&user_id);
                !users.is_empty()
            });
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    /// Subscribe a connected user to a group channel. Offline users are
    /// skipped; their subscriptions are loaded when they next connect.
    pub async fn join_group(&self, user_id: Uuid, group_id: Uuid) {
        if !self.is_online(user_id).await {
            return;
        }
        self.inner
            .groups
            .write()
            .await
            .entry(group_id)
            .or_default()
            .insert(user_id);
    }

    pub async fn join_groups(&self, user_id: Uuid, group_ids: &[Uuid]) {
        for group_id in group_ids {
            self.join_group(user_id, *group_id).await;
        }
    }

    pub async fn leave_group(&self, user_id: Uuid, group_id: Uuid) {
        let mut groups = self.inner.groups.write().await;
        if let Some(users) = groups.get_mut(&group_id) {
            users.remove(&user_id);
            if users.is_empty() {
                groups.remove(&group_id);
            }
        }
    }

    /// Forget a group channel entirely (group deleted).
    pub async fn drop_group(&self, group_id: Uuid) {
        self.inner.groups.write().await.remove(&group_id);
    }

    pub async fn group_subscribers(&self, group_id: Uuid) -> HashSet<Uuid> {
        self.inner
            .groups
            .read()
            .await
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Publish an event to every session in `scope`. Returns the number of
    /// sessions the frame was handed to.
    pub async fn publish(&self, scope: Scope, event: &GatewayEvent) -> usize {
        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.name(), e);
                return 0;
            }
        };

        let delivered = match scope {
            Scope::All => self.broadcast(frame),
            Scope::Group(_) if self.inner.mode == FanoutMode::Broadcast => self.broadcast(frame),
            Scope::Group(group_id) => {
                let users = self.group_subscribers(group_id).await;
                self.send_to_users(users.iter().copied(), &frame).await
            }
            Scope::User(user_id) => self.send_to_users([user_id], &frame).await,
        };

        debug!("Published {} to {} ({} sessions)", event.name(), scope, delivered);
        delivered
    }

    /// Publish the same event to several scopes, e.g. both sides of a
    /// direct conversation.
    pub async fn publish_many(&self, scopes: &[Scope], event: &GatewayEvent) -> usize {
        let mut delivered = 0;
        for scope in scopes {
            delivered += self.publish(*scope, event).await;
        }
        delivered
    }

    fn broadcast(&self, frame: Frame) -> usize {
        // Err only means nobody is connected.
        self.inner.broadcast_tx.send(frame).unwrap_or(0)
    }

    async fn send_to_users(&self, users: impl IntoIterator<Item = Uuid>, frame: &Frame) -> usize {
        let sessions = self.inner.sessions.read().await;
        let mut delivered = 0;
        for user_id in users {
            let Some(conns) = sessions.get(&user_id) else {
                continue;
            };
            for (conn_id, tx) in conns {
                if tx.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    trace!("Session {} of {} already closed", conn_id, user_id);
                }
            }
        }
        delivered
    }
}
