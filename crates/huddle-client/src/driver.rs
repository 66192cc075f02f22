use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use huddle_types::api::UploadResponse;
use huddle_types::models::Message;

use crate::api::ChatApi;
use crate::error::{ClientError, Result};
use crate::events::decode_event;
use crate::reconciler::{
    Conversation, ConversationView, Effect, Recipient, SendOutcome, SendTicket, SnapshotTicket,
};

/// Requests from the host UI and the push channel.
#[derive(Debug)]
pub enum DriverInput {
    /// Raw text frame from the gateway.
    Push(String),
    Select(Recipient),
    SetDraft(String),
    /// Upload a file and attach it to the draft.
    Attach(Vec<u8>),
    Send,
    SetForeground(bool),
    Reset,
    /// The push channel came back after a drop; events may have been missed.
    Reconnected,
    Shutdown,
}

/// Things only the host can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Notify(Message),
    RefreshRecipient(Recipient),
    SendFailed(String),
    Error(String),
}

enum Input {
    Host(DriverInput),
    Snapshot {
        ticket: SnapshotTicket,
        result: Result<Vec<Message>>,
    },
    Uploaded {
        generation: u64,
        result: Result<UploadResponse>,
    },
    Sent {
        ticket: SendTicket,
        result: Result<Message>,
    },
    ScheduledReset(u64),
}

/// Cloneable sender into a running [`ClientDriver`].
#[derive(Clone)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl DriverHandle {
    pub fn send(&self, input: DriverInput) -> Result<()> {
        self.tx.send(Input::Host(input)).map_err(|_| ClientError::Closed)
    }

    pub fn push(&self, frame: String) -> Result<()> {
        self.send(DriverInput::Push(frame))
    }

    pub fn select(&self, recipient: Recipient) -> Result<()> {
        self.send(DriverInput::Select(recipient))
    }

    pub fn reconnected(&self) -> Result<()> {
        self.send(DriverInput::Reconnected)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(DriverInput::Shutdown)
    }
}

/// Receiving ends handed to the host.
pub struct DriverChannels {
    pub handle: DriverHandle,
    pub view: watch::Receiver<ConversationView>,
    pub host_events: mpsc::UnboundedReceiver<HostEvent>,
}

/// Single loop that owns the [`Conversation`]. REST calls run as spawned
/// tasks and post their results back into the same queue, so every mutation
/// happens here, in order.
pub struct ClientDriver<A> {
    conversation: Conversation,
    api: Arc<A>,
    tx: mpsc::UnboundedSender<Input>,
    rx: mpsc::UnboundedReceiver<Input>,
    view_tx: watch::Sender<ConversationView>,
    host_tx: mpsc::UnboundedSender<HostEvent>,
}

impl<A: ChatApi> ClientDriver<A> {
    pub fn new(conversation: Conversation, api: A) -> (Self, DriverChannels) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(conversation.view());
        let (host_tx, host_events) = mpsc::unbounded_channel();

        let channels = DriverChannels {
            handle: DriverHandle { tx: tx.clone() },
            view,
            host_events,
        };
        let driver = Self {
            conversation,
            api: Arc::new(api),
            tx,
            rx,
            view_tx,
            host_tx,
        };
        (driver, channels)
    }

    pub async fn run(mut self) {
        while let Some(input) = self.rx.recv().await {
            if matches!(input, Input::Host(DriverInput::Shutdown)) {
                debug!("Client driver shutting down");
                break;
            }
            self.handle(input);
            self.view_tx.send_replace(self.conversation.view());
        }
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Host(input) => self.handle_host(input),
            Input::Snapshot { ticket, result } => match result {
                Ok(messages) => {
                    self.conversation.apply_snapshot(ticket, messages);
                }
                Err(e) => {
                    warn!("Snapshot fetch failed: {}", e);
                    if self.conversation.snapshot_failed(ticket) {
                        // The conversation is gone or closed to us.
                        if e.is_rejection() {
                            self.conversation.reset();
                        }
                        self.host(HostEvent::Error(e.to_string()));
                    }
                }
            },
            Input::Uploaded { generation, result } => {
                if generation != self.conversation.generation() {
                    debug!("Dropping upload for a closed conversation");
                    return;
                }
                match result {
                    Ok(upload) => self.conversation.set_attachment(Some(upload.path)),
                    Err(e) => {
                        warn!("Upload failed: {}", e);
                        self.host(HostEvent::Error(e.to_string()));
                    }
                }
            }
            Input::Sent { ticket, result } => {
                if let SendOutcome::Failed(message) = self.conversation.complete_send(ticket, result) {
                    self.host(HostEvent::SendFailed(message));
                }
            }
            Input::ScheduledReset(generation) => {
                self.conversation.apply_scheduled_reset(generation);
            }
        }
    }

    fn handle_host(&mut self, input: DriverInput) {
        match input {
            DriverInput::Push(frame) => {
                if let Some(event) = decode_event(&frame) {
                    let effects = self.conversation.apply_event(event);
                    self.run_effects(effects);
                }
            }
            DriverInput::Select(recipient) => {
                let ticket = self.conversation.select(recipient);
                self.fetch_snapshot(ticket, recipient);
            }
            DriverInput::Reconnected => {
                // Missed pushes are not replayed; re-read the open conversation.
                if let Some(recipient) = self.conversation.recipient() {
                    let ticket = self.conversation.select(recipient);
                    self.fetch_snapshot(ticket, recipient);
                }
            }
            DriverInput::SetDraft(text) => self.conversation.set_draft(text),
            DriverInput::Attach(bytes) => {
                if self.conversation.recipient().is_none() {
                    return;
                }
                let generation = self.conversation.generation();
                let api = self.api.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = api.upload_file(bytes).await;
                    let _ = tx.send(Input::Uploaded { generation, result });
                });
            }
            DriverInput::Send => {
                let Some(outgoing) = self.conversation.begin_send() else {
                    return;
                };
                let api = self.api.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = api.send_message(outgoing.request).await;
                    let _ = tx.send(Input::Sent {
                        ticket: outgoing.ticket,
                        result,
                    });
                });
            }
            DriverInput::SetForeground(foreground) => self.conversation.set_foreground(foreground),
            DriverInput::Reset => self.conversation.reset(),
            DriverInput::Shutdown => {}
        }
    }

    fn fetch_snapshot(&self, ticket: SnapshotTicket, recipient: Recipient) {
        let api = self.api.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_conversation(recipient.target()).await;
            let _ = tx.send(Input::Snapshot { ticket, result });
        });
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::MarkRead { message_id } => {
                    let api = self.api.clone();
                    tokio::spawn(async move {
                        if let Err(e) = api.mark_read(message_id).await {
                            warn!("Failed to mark {} read: {}", message_id, e);
                        }
                    });
                }
                Effect::Notify { message } => self.host(HostEvent::Notify(message)),
                Effect::ScheduleReset { delay, generation } => {
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Input::ScheduledReset(generation));
                    });
                }
                Effect::RefreshRecipient(recipient) => self.host(HostEvent::RefreshRecipient(recipient)),
            }
        }
    }

    fn host(&self, event: HostEvent) {
        // The host may have stopped listening; the view channel still works.
        let _ = self.host_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::Instant;
    use uuid::Uuid;

    use huddle_types::api::SendMessageRequest;
    use huddle_types::events::GatewayEvent;
    use huddle_types::models::MessageTarget;

    use super::*;
    use crate::config::ClientConfig;
    use crate::reconciler::ConversationState;

    struct FakeApi {
        me: Uuid,
        snapshots: Arc<Mutex<HashMap<MessageTarget, Vec<Message>>>>,
        reads: mpsc::UnboundedSender<Uuid>,
        reject_sends: bool,
        /// Non-zero makes snapshot fetches fail with this status.
        fetch_status: Arc<AtomicU16>,
    }

    impl ChatApi for FakeApi {
        async fn fetch_conversation(&self, target: MessageTarget) -> Result<Vec<Message>> {
            let status = self.fetch_status.load(Ordering::SeqCst);
            if status != 0 {
                return Err(ClientError::Api {
                    status,
                    message: "unavailable".into(),
                });
            }
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .get(&target)
                .cloned()
                .unwrap_or_default())
        }

        async fn send_message(&self, request: SendMessageRequest) -> Result<Message> {
            if self.reject_sends {
                return Err(ClientError::Api {
                    status: 404,
                    message: "target not found".into(),
                });
            }
            Ok(Message {
                id: Uuid::new_v4(),
                sender_id: self.me,
                target: request.target,
                body: request.body,
                attachment: request.attachment,
                created_at: Utc::now(),
                is_read: false,
                reactions: vec![],
            })
        }

        async fn mark_read(&self, message_id: Uuid) -> Result<()> {
            let _ = self.reads.send(message_id);
            Ok(())
        }

        async fn upload_file(&self, bytes: Vec<u8>) -> Result<UploadResponse> {
            Ok(UploadResponse {
                path: format!("attachments/{}", Uuid::new_v4()),
                size: bytes.len() as u64,
            })
        }
    }

    struct Harness {
        me: Uuid,
        bob: Uuid,
        snapshots: Arc<Mutex<HashMap<MessageTarget, Vec<Message>>>>,
        reads: mpsc::UnboundedReceiver<Uuid>,
        fetch_status: Arc<AtomicU16>,
        channels: DriverChannels,
    }

    fn start(reject_sends: bool) -> Harness {
        let me = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let snapshots = Arc::new(Mutex::new(HashMap::new()));
        let (reads_tx, reads) = mpsc::unbounded_channel();
        let fetch_status = Arc::new(AtomicU16::new(0));
        let api = FakeApi {
            me,
            snapshots: snapshots.clone(),
            reads: reads_tx,
            reject_sends,
            fetch_status: fetch_status.clone(),
        };
        let config = ClientConfig::new("http://localhost:3000", "token", me);
        let (driver, channels) = ClientDriver::new(Conversation::from_config(&config), api);
        tokio::spawn(driver.run());
        Harness {
            me,
            bob,
            snapshots,
            reads,
            fetch_status,
            channels,
        }
    }

    fn from_bob(h: &Harness, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: h.bob,
            target: MessageTarget::Direct(h.me),
            body: body.into(),
            attachment: None,
            created_at: Utc::now(),
            is_read: false,
            reactions: vec![],
        }
    }

    fn frame(event: &GatewayEvent) -> String {
        serde_json::to_string(event).unwrap()
    }

    async fn wait_for(h: &mut Harness, f: impl FnMut(&ConversationView) -> bool) {
        h.channels.view.wait_for(f).await.unwrap();
    }

    async fn open_bob(h: &mut Harness) {
        h.channels.handle.select(Recipient::Direct(h.bob)).unwrap();
        wait_for(h, |v| v.state == ConversationState::Loaded).await;
    }

    #[tokio::test]
    async fn select_loads_snapshot() {
        let mut h = start(false);
        let earlier = from_bob(&h, "earlier");
        h.snapshots
            .lock()
            .unwrap()
            .insert(MessageTarget::Direct(h.bob), vec![earlier]);

        open_bob(&mut h).await;
        let view = h.channels.view.borrow().clone();
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.entries[0].message.body, "earlier");
    }

    #[tokio::test]
    async fn failed_snapshot_reports_and_keeps_pushes_live() {
        let mut h = start(false);
        h.fetch_status.store(503, Ordering::SeqCst);
        h.channels.handle.select(Recipient::Direct(h.bob)).unwrap();
        assert_eq!(
            h.channels.host_events.recv().await,
            Some(HostEvent::Error("server returned 503: unavailable".into()))
        );

        let incoming = from_bob(&h, "still here");
        h.channels
            .handle
            .push(frame(&GatewayEvent::MessageReceived { message: incoming }))
            .unwrap();
        wait_for(&mut h, |v| v.state == ConversationState::Live).await;
        assert_eq!(h.channels.view.borrow().entries.len(), 1);

        // The next resync succeeds and replaces the push-only list.
        h.fetch_status.store(0, Ordering::SeqCst);
        h.channels.handle.reconnected().unwrap();
        wait_for(&mut h, |v| v.state == ConversationState::Loaded).await;
        assert!(h.channels.view.borrow().entries.is_empty());
    }

    #[tokio::test]
    async fn rejected_resync_closes_conversation() {
        let mut h = start(false);
        open_bob(&mut h).await;

        h.fetch_status.store(403, Ordering::SeqCst);
        h.channels.handle.reconnected().unwrap();
        assert!(matches!(h.channels.host_events.recv().await, Some(HostEvent::Error(_))));
        wait_for(&mut h, |v| v.recipient.is_none()).await;
        assert_eq!(h.channels.view.borrow().state, ConversationState::Empty);
    }

    #[tokio::test]
    async fn pushed_message_is_merged_and_marked_read() {
        let mut h = start(false);
        open_bob(&mut h).await;

        let incoming = from_bob(&h, "hey");
        let id = incoming.id;
        h.channels
            .handle
            .push(frame(&GatewayEvent::MessageReceived { message: incoming }))
            .unwrap();
        h.channels.handle.push("{ not json".into()).unwrap();

        wait_for(&mut h, |v| v.state == ConversationState::Live).await;
        assert_eq!(h.reads.recv().await, Some(id));
        assert_eq!(h.channels.view.borrow().entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_by_other_closes_after_delay() {
        let mut h = start(false);
        open_bob(&mut h).await;

        let started = Instant::now();
        h.channels
            .handle
            .push(frame(&GatewayEvent::UserBlockedByOther { blocked_by_user_id: h.bob }))
            .unwrap();

        wait_for(&mut h, |v| v.recipient.is_none()).await;
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn failed_send_keeps_draft_and_reports() {
        let mut h = start(true);
        open_bob(&mut h).await;

        h.channels.handle.send(DriverInput::SetDraft("are you there".into())).unwrap();
        h.channels.handle.send(DriverInput::Send).unwrap();

        assert_eq!(
            h.channels.host_events.recv().await,
            Some(HostEvent::SendFailed("server returned 404: target not found".into()))
        );
        wait_for(&mut h, |v| !v.sending).await;
        let view = h.channels.view.borrow().clone();
        assert_eq!(view.draft, "are you there");
        assert!(view.entries.is_empty());
    }

    #[tokio::test]
    async fn successful_send_clears_draft() {
        let mut h = start(false);
        open_bob(&mut h).await;

        h.channels.handle.send(DriverInput::Attach(vec![1, 2, 3])).unwrap();
        wait_for(&mut h, |v| v.attachment.is_some()).await;
        h.channels.handle.send(DriverInput::Send).unwrap();

        wait_for(&mut h, |v| v.entries.len() == 1).await;
        let view = h.channels.view.borrow().clone();
        assert_eq!(view.attachment, None);
        assert_eq!(view.draft, "");
    }

    #[tokio::test]
    async fn reconnect_refetches_open_conversation() {
        let mut h = start(false);
        open_bob(&mut h).await;

        // Sent while the push channel was down.
        let missed = from_bob(&h, "missed");
        h.snapshots
            .lock()
            .unwrap()
            .insert(MessageTarget::Direct(h.bob), vec![missed]);

        h.channels.handle.reconnected().unwrap();
        wait_for(&mut h, |v| v.entries.len() == 1).await;
        assert_eq!(h.channels.view.borrow().entries[0].message.body, "missed");
    }
}
