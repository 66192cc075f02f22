use std::fmt;
use std::time::Duration;

use chrono::FixedOffset;
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::api::SendMessageRequest;
use huddle_types::events::{GatewayEvent, ThemeTarget};
use huddle_types::models::{Message, MessageTarget};

use crate::config::ClientConfig;
use crate::linkify::{TextSpan, linkify};
use crate::timeline::{DateLabel, date_labels};

/// The conversation partner: another user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    Direct(Uuid),
    Group(Uuid),
}

impl Recipient {
    pub fn target(self) -> MessageTarget {
        match self {
            Self::Direct(id) => MessageTarget::Direct(id),
            Self::Group(id) => MessageTarget::Group(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    /// Nothing shown yet, or waiting for the first snapshot.
    #[default]
    Empty,
    /// A snapshot has been applied.
    Loaded,
    /// Push events have been merged on top of the snapshot, or into the
    /// list after a failed fetch.
    Live,
}

/// Identifies a snapshot request; results for an outdated ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTicket {
    generation: u64,
    seq: u64,
}

impl SnapshotTicket {
    pub fn generation(self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTicket {
    generation: u64,
    seq: u64,
}

/// A send the host should perform, then report with
/// [`Conversation::complete_send`].
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub ticket: SendTicket,
    pub request: SendMessageRequest,
}

/// Work the reconciler asks its host to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    MarkRead { message_id: Uuid },
    Notify { message: Message },
    /// Call [`Conversation::apply_scheduled_reset`] with `generation` after `delay`.
    ScheduleReset { delay: Duration, generation: u64 },
    /// Recipient metadata (name, avatar, theme, members) changed.
    RefreshRecipient(Recipient),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Non-fatal: the draft is kept so the user can retry.
    Failed(String),
    /// The ticket no longer matches the in-flight send.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub message: Message,
    pub spans: Vec<TextSpan>,
    pub label: DateLabel,
    arrival: u64,
}

/// Immutable copy of what the conversation view should render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationView {
    pub state: ConversationState,
    pub recipient: Option<Recipient>,
    pub entries: Vec<TimelineEntry>,
    pub draft: String,
    pub attachment: Option<String>,
    pub sending: bool,
    pub last_error: Option<String>,
}

/// State of the one open conversation.
///
/// Snapshots replace the message list wholesale; push events are merged on
/// top, idempotently by message id. Events that arrive while a snapshot is
/// in flight are kept and re-merged once it lands, since the snapshot may
/// predate them.
pub struct Conversation {
    me: Uuid,
    offset: FixedOffset,
    reset_delay: Duration,

    state: ConversationState,
    recipient: Option<Recipient>,
    /// Bumped whenever the selected conversation changes or is reset.
    generation: u64,
    snapshot_seq: u64,
    awaiting: Option<u64>,
    replay: Vec<GatewayEvent>,

    entries: Vec<TimelineEntry>,
    next_arrival: u64,

    draft: String,
    attachment: Option<String>,
    send_seq: u64,
    in_flight: Option<SendTicket>,
    last_error: Option<String>,

    foreground: bool,
}

impl Conversation {
    pub fn new(me: Uuid, offset: FixedOffset, reset_delay: Duration) -> Self {
        Self {
            me,
            offset,
            reset_delay,
            state: ConversationState::Empty,
            recipient: None,
            generation: 0,
            snapshot_seq: 0,
            awaiting: None,
            replay: Vec::new(),
            entries: Vec::new(),
            next_arrival: 0,
            draft: String::new(),
            attachment: None,
            send_seq: 0,
            in_flight: None,
            last_error: None,
            foreground: true,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.user_id, config.tz_offset(), config.blocked_reset_delay)
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn recipient(&self) -> Option<Recipient> {
        self.recipient
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn attachment(&self) -> Option<&str> {
        self.attachment.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Attach a file-store path. Ignored when no conversation is open.
    pub fn set_attachment(&mut self, path: Option<String>) {
        if self.recipient.is_some() {
            self.attachment = path;
        }
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    pub fn view(&self) -> ConversationView {
        ConversationView {
            state: self.state,
            recipient: self.recipient,
            entries: self.entries.clone(),
            draft: self.draft.clone(),
            attachment: self.attachment.clone(),
            sending: self.in_flight.is_some(),
            last_error: self.last_error.clone(),
        }
    }

    /// Open `recipient` and return the ticket for the snapshot to fetch.
    /// Re-selecting the open conversation keeps its contents until the new
    /// snapshot arrives.
    pub fn select(&mut self, recipient: Recipient) -> SnapshotTicket {
        if self.recipient != Some(recipient) {
            self.clear_conversation();
            self.generation += 1;
            self.recipient = Some(recipient);
            self.state = ConversationState::Empty;
        }
        self.snapshot_seq += 1;
        self.awaiting = Some(self.snapshot_seq);
        self.replay.clear();

        SnapshotTicket {
            generation: self.generation,
            seq: self.snapshot_seq,
        }
    }

    /// Replace the message list with a snapshot. Returns false when the
    /// ticket is stale.
    pub fn apply_snapshot(&mut self, ticket: SnapshotTicket, messages: Vec<Message>) -> bool {
        if ticket.generation != self.generation || self.awaiting != Some(ticket.seq) {
            debug!("Dropping stale snapshot (generation {})", ticket.generation);
            return false;
        }
        self.awaiting = None;

        self.entries.clear();
        for message in messages {
            self.push_entry(message);
        }
        for event in std::mem::take(&mut self.replay) {
            self.merge(&event);
        }
        self.rebucket();
        self.state = ConversationState::Loaded;
        true
    }

    /// The fetch for `ticket` failed. Stops buffering for replay; events
    /// already merged stay in the list. Returns false when the ticket is stale.
    pub fn snapshot_failed(&mut self, ticket: SnapshotTicket) -> bool {
        if ticket.generation != self.generation || self.awaiting != Some(ticket.seq) {
            return false;
        }
        self.awaiting = None;
        self.replay.clear();
        if self.state == ConversationState::Empty && !self.entries.is_empty() {
            self.state = ConversationState::Live;
        }
        true
    }

    pub fn apply_event(&mut self, event: GatewayEvent) -> Vec<Effect> {
        let Some(recipient) = self.recipient else {
            return Vec::new();
        };

        match &event {
            GatewayEvent::MessageReceived { message } => {
                if !self.is_relevant(recipient, message) {
                    return Vec::new();
                }
                let effects = if self.contains(message.id) {
                    Vec::new()
                } else {
                    self.arrival_effects(message)
                };
                self.merge_and_track(event);
                effects
            }
            GatewayEvent::ReactionAdded { .. }
            | GatewayEvent::ReactionRemoved { .. }
            | GatewayEvent::MessageRead { .. } => {
                self.merge_and_track(event);
                Vec::new()
            }
            _ => self.apply_lifecycle(recipient, &event),
        }
    }

    /// Reset requested by an earlier [`Effect::ScheduleReset`]. Only applies
    /// if the same conversation is still open.
    pub fn apply_scheduled_reset(&mut self, generation: u64) -> bool {
        if self.recipient.is_none() || generation != self.generation {
            return false;
        }
        self.reset();
        true
    }

    /// Close the conversation, dropping messages, draft and attachment.
    pub fn reset(&mut self) {
        self.clear_conversation();
        self.recipient = None;
        self.state = ConversationState::Empty;
        self.generation += 1;
    }

    /// Start sending the draft. Returns `None` when there is nothing to send,
    /// no conversation is open, or a send is already in flight.
    pub fn begin_send(&mut self) -> Option<OutgoingMessage> {
        let recipient = self.recipient?;
        if self.in_flight.is_some() {
            return None;
        }
        if self.draft.trim().is_empty() && self.attachment.is_none() {
            return None;
        }

        self.send_seq += 1;
        let ticket = SendTicket {
            generation: self.generation,
            seq: self.send_seq,
        };
        self.in_flight = Some(ticket);
        self.last_error = None;

        Some(OutgoingMessage {
            ticket,
            request: SendMessageRequest {
                target: recipient.target(),
                body: self.draft.clone(),
                attachment: self.attachment.clone(),
            },
        })
    }

    /// Report the result of a send. The echo is merged like a push event, so
    /// it does not matter which of the two arrives first.
    pub fn complete_send<E: fmt::Display>(
        &mut self,
        ticket: SendTicket,
        result: Result<Message, E>,
    ) -> SendOutcome {
        if self.in_flight != Some(ticket) {
            return SendOutcome::Stale;
        }
        self.in_flight = None;

        match result {
            Ok(echo) => {
                self.draft.clear();
                self.attachment = None;
                self.merge_and_track(GatewayEvent::MessageReceived { message: echo });
                SendOutcome::Sent
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Send failed: {}", message);
                self.last_error = Some(message.clone());
                SendOutcome::Failed(message)
            }
        }
    }

    fn apply_lifecycle(&mut self, recipient: Recipient, event: &GatewayEvent) -> Vec<Effect> {
        let refresh = vec![Effect::RefreshRecipient(recipient)];
        match (recipient, event) {
            (Recipient::Group(open), GatewayEvent::GroupDeleted { group_id }) if open == *group_id => {
                self.reset();
                Vec::new()
            }
            (Recipient::Group(open), GatewayEvent::MemberRemoved { group_id, user_id })
                if open == *group_id =>
            {
                if *user_id == self.me {
                    self.reset();
                    Vec::new()
                } else {
                    refresh
                }
            }
            (Recipient::Group(open), GatewayEvent::GroupRenamed { group_id, .. })
            | (Recipient::Group(open), GatewayEvent::AvatarChanged { group_id, .. })
            | (Recipient::Group(open), GatewayEvent::MemberAdded { group_id, .. })
            | (Recipient::Group(open), GatewayEvent::AdminPromoted { group_id, .. })
            | (Recipient::Group(open), GatewayEvent::AdminRevoked { group_id, .. })
                if open == *group_id =>
            {
                refresh
            }
            (
                Recipient::Group(open),
                GatewayEvent::ThemeChanged {
                    target: ThemeTarget::Group(id),
                    ..
                },
            )
            | (
                Recipient::Direct(open),
                GatewayEvent::ThemeChanged {
                    target: ThemeTarget::Friend(id),
                    ..
                },
            ) if open == *id => refresh,
            (Recipient::Direct(open), GatewayEvent::FriendRemoved { friend_id: id })
            | (Recipient::Direct(open), GatewayEvent::UserBlocked { blocked_user_id: id })
                if open == *id =>
            {
                self.reset();
                Vec::new()
            }
            (Recipient::Direct(open), GatewayEvent::UserBlockedByOther { blocked_by_user_id })
                if open == *blocked_by_user_id =>
            {
                vec![Effect::ScheduleReset {
                    delay: self.reset_delay,
                    generation: self.generation,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn arrival_effects(&self, message: &Message) -> Vec<Effect> {
        if message.sender_id == self.me {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if !message.is_read {
            effects.push(Effect::MarkRead {
                message_id: message.id,
            });
        }
        if !self.foreground {
            effects.push(Effect::Notify {
                message: message.clone(),
            });
        }
        effects
    }

    fn is_relevant(&self, recipient: Recipient, message: &Message) -> bool {
        match (recipient, message.target) {
            (Recipient::Group(open), MessageTarget::Group(group_id)) => open == group_id,
            (Recipient::Direct(other), MessageTarget::Direct(to)) => {
                (message.sender_id == self.me && to == other)
                    || (message.sender_id == other && to == self.me)
            }
            _ => false,
        }
    }

    /// Merge a content event and keep it for replay if a snapshot is pending.
    fn merge_and_track(&mut self, event: GatewayEvent) {
        if self.merge(&event) {
            self.rebucket();
            let settled = self.state == ConversationState::Loaded
                || (self.state == ConversationState::Empty && self.awaiting.is_none());
            if settled {
                self.state = ConversationState::Live;
            }
        }
        if self.awaiting.is_some() {
            self.replay.push(event);
        }
    }

    /// Apply a content event to the list. Returns whether anything changed.
    fn merge(&mut self, event: &GatewayEvent) -> bool {
        match event {
            GatewayEvent::MessageReceived { message } => self.push_entry(message.clone()),
            GatewayEvent::ReactionAdded {
                message_id,
                reaction,
            } => match self.entry_mut(*message_id) {
                Some(entry) => {
                    let reactions = &mut entry.message.reactions;
                    reactions.retain(|r| r.user_id != reaction.user_id);
                    reactions.push(reaction.clone());
                    true
                }
                None => false,
            },
            GatewayEvent::ReactionRemoved {
                message_id,
                user_id,
            } => match self.entry_mut(*message_id) {
                Some(entry) => {
                    let before = entry.message.reactions.len();
                    entry.message.reactions.retain(|r| r.user_id != *user_id);
                    entry.message.reactions.len() != before
                }
                None => false,
            },
            GatewayEvent::MessageRead { message_id } => match self.entry_mut(*message_id) {
                Some(entry) if !entry.message.is_read => {
                    entry.message.is_read = true;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn contains(&self, message_id: Uuid) -> bool {
        self.entries.iter().any(|e| e.message.id == message_id)
    }

    fn entry_mut(&mut self, message_id: Uuid) -> Option<&mut TimelineEntry> {
        self.entries.iter_mut().find(|e| e.message.id == message_id)
    }

    fn push_entry(&mut self, message: Message) -> bool {
        if self.contains(message.id) {
            return false;
        }
        let spans = if message.attachment.is_none() {
            linkify(&message.body)
        } else if message.body.is_empty() {
            Vec::new()
        } else {
            vec![TextSpan::Text(message.body.clone())]
        };
        self.entries.push(TimelineEntry {
            message,
            spans,
            label: DateLabel::None,
            arrival: self.next_arrival,
        });
        self.next_arrival += 1;
        true
    }

    fn rebucket(&mut self) {
        self.entries
            .sort_by_key(|e| (e.message.created_at, e.arrival));
        let labels = date_labels(self.entries.iter().map(|e| e.message.created_at), &self.offset);
        for (entry, label) in self.entries.iter_mut().zip(labels) {
            entry.label = label;
        }
    }

    fn clear_conversation(&mut self) {
        self.entries.clear();
        self.replay.clear();
        self.awaiting = None;
        self.draft.clear();
        self.attachment = None;
        self.in_flight = None;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use huddle_types::models::{Reaction, ReactionKind};

    use super::*;

    struct Fixture {
        me: Uuid,
        bob: Uuid,
        group: Uuid,
        conv: Conversation,
    }

    fn fixture() -> Fixture {
        let me = Uuid::new_v4();
        Fixture {
            me,
            bob: Uuid::new_v4(),
            group: Uuid::new_v4(),
            conv: Conversation::new(
                me,
                FixedOffset::east_opt(7 * 3600).unwrap(),
                Duration::from_secs(3),
            ),
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 3, minute, 0).unwrap()
    }

    fn message(sender: Uuid, target: MessageTarget, body: &str, minute: u32) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            target,
            body: body.into(),
            attachment: None,
            created_at: at(minute),
            is_read: false,
            reactions: vec![],
        }
    }

    fn reaction(message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Reaction {
        Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            kind,
            created_at: at(30),
        }
    }

    fn bodies(conv: &Conversation) -> Vec<&str> {
        conv.entries().iter().map(|e| e.message.body.as_str()).collect()
    }

    fn open_dm(f: &mut Fixture) {
        let ticket = f.conv.select(Recipient::Direct(f.bob));
        assert!(f.conv.apply_snapshot(ticket, vec![]));
    }

    #[test]
    fn snapshot_loads_and_labels_messages() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Direct(f.bob));
        assert_eq!(f.conv.state(), ConversationState::Empty);

        let dm = MessageTarget::Direct(f.me);
        let snapshot = vec![
            message(f.bob, dm, "morning", 0),
            message(f.bob, dm, "see https://example.com", 5),
            message(f.bob, dm, "hello?", 22),
        ];
        assert!(f.conv.apply_snapshot(ticket, snapshot));
        assert_eq!(f.conv.state(), ConversationState::Loaded);

        let labels: Vec<&DateLabel> = f.conv.entries().iter().map(|e| &e.label).collect();
        assert_eq!(
            labels,
            [
                &DateLabel::FullDateTime("09/03/2024 10:00".into()),
                &DateLabel::None,
                &DateLabel::TimeOnly("10:22".into()),
            ]
        );
        assert_eq!(
            f.conv.entries()[1].spans,
            vec![
                TextSpan::Text("see ".into()),
                TextSpan::Link("https://example.com".into()),
            ]
        );
    }

    #[test]
    fn stale_snapshot_is_ignored() {
        let mut f = fixture();
        let old = f.conv.select(Recipient::Direct(f.bob));
        let new = f.conv.select(Recipient::Group(f.group));

        let stale = vec![message(f.bob, MessageTarget::Direct(f.me), "old", 0)];
        assert!(!f.conv.apply_snapshot(old, stale));
        assert!(f.conv.entries().is_empty());
        assert!(f.conv.apply_snapshot(new, vec![]));

        // Re-selecting the same conversation also supersedes the earlier ticket.
        let first = f.conv.select(Recipient::Group(f.group));
        let second = f.conv.select(Recipient::Group(f.group));
        assert!(!f.conv.apply_snapshot(first, vec![]));
        assert!(f.conv.apply_snapshot(second, vec![]));
    }

    #[test]
    fn duplicate_push_is_dropped_silently() {
        let mut f = fixture();
        open_dm(&mut f);

        let incoming = message(f.bob, MessageTarget::Direct(f.me), "hi", 1);
        let effects = f.conv.apply_event(GatewayEvent::MessageReceived {
            message: incoming.clone(),
        });
        assert_eq!(effects, vec![Effect::MarkRead { message_id: incoming.id }]);
        assert_eq!(f.conv.state(), ConversationState::Live);

        let effects = f.conv.apply_event(GatewayEvent::MessageReceived { message: incoming });
        assert!(effects.is_empty());
        assert_eq!(bodies(&f.conv), ["hi"]);
    }

    #[test]
    fn irrelevant_messages_are_ignored() {
        let mut f = fixture();
        open_dm(&mut f);
        let carol = Uuid::new_v4();

        for other in [
            message(carol, MessageTarget::Direct(f.me), "from carol", 1),
            message(f.bob, MessageTarget::Direct(carol), "bob to carol", 2),
            message(f.bob, MessageTarget::Group(f.group), "in a group", 3),
        ] {
            assert!(f.conv.apply_event(GatewayEvent::MessageReceived { message: other }).is_empty());
        }
        assert!(f.conv.entries().is_empty());
    }

    #[test]
    fn out_of_order_pushes_are_sorted() {
        let mut f = fixture();
        open_dm(&mut f);
        let dm = MessageTarget::Direct(f.me);

        f.conv.apply_event(GatewayEvent::MessageReceived { message: message(f.bob, dm, "second", 20) });
        f.conv.apply_event(GatewayEvent::MessageReceived { message: message(f.bob, dm, "first", 0) });
        assert_eq!(bodies(&f.conv), ["first", "second"]);
        assert_eq!(f.conv.entries()[1].label, DateLabel::TimeOnly("10:20".into()));
    }

    #[test]
    fn background_arrivals_notify() {
        let mut f = fixture();
        open_dm(&mut f);
        f.conv.set_foreground(false);

        let incoming = message(f.bob, MessageTarget::Direct(f.me), "ping", 1);
        let effects = f.conv.apply_event(GatewayEvent::MessageReceived {
            message: incoming.clone(),
        });
        assert_eq!(
            effects,
            vec![
                Effect::MarkRead { message_id: incoming.id },
                Effect::Notify { message: incoming },
            ]
        );

        let mine = message(f.me, MessageTarget::Direct(f.bob), "pong", 2);
        assert!(f.conv.apply_event(GatewayEvent::MessageReceived { message: mine }).is_empty());
    }

    #[test]
    fn reactions_replace_per_user() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Group(f.group));
        let target = message(f.bob, MessageTarget::Group(f.group), "photo", 0);
        let id = target.id;
        f.conv.apply_snapshot(ticket, vec![target]);

        let carol = Uuid::new_v4();
        for (user, kind) in [
            (f.bob, ReactionKind::Laugh),
            (carol, ReactionKind::Love),
            (f.bob, ReactionKind::ThumbsUp),
        ] {
            f.conv.apply_event(GatewayEvent::ReactionAdded {
                message_id: id,
                reaction: reaction(id, user, kind),
            });
        }
        let mut kinds: Vec<(Uuid, ReactionKind)> = f.conv.entries()[0]
            .message
            .reactions
            .iter()
            .map(|r| (r.user_id, r.kind))
            .collect();
        kinds.sort();
        let mut expected = vec![(f.bob, ReactionKind::ThumbsUp), (carol, ReactionKind::Love)];
        expected.sort();
        assert_eq!(kinds, expected);

        f.conv.apply_event(GatewayEvent::ReactionRemoved { message_id: id, user_id: carol });
        assert_eq!(f.conv.entries()[0].message.reactions.len(), 1);

        f.conv.apply_event(GatewayEvent::MessageRead { message_id: id });
        assert!(f.conv.entries()[0].message.is_read);
    }

    #[test]
    fn events_during_snapshot_fetch_survive_an_older_snapshot() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Direct(f.bob));

        let late = message(f.bob, MessageTarget::Direct(f.me), "late", 5);
        let effects = f.conv.apply_event(GatewayEvent::MessageReceived { message: late.clone() });
        assert_eq!(effects, vec![Effect::MarkRead { message_id: late.id }]);

        let early = message(f.bob, MessageTarget::Direct(f.me), "early", 0);
        assert!(f.conv.apply_snapshot(ticket, vec![early]));
        assert_eq!(bodies(&f.conv), ["early", "late"]);
    }

    #[test]
    fn failed_snapshot_stops_buffering_and_keeps_pushed_messages() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Direct(f.bob));

        let first = message(f.bob, MessageTarget::Direct(f.me), "first", 1);
        f.conv.apply_event(GatewayEvent::MessageReceived { message: first });
        assert_eq!(f.conv.replay.len(), 1);

        assert!(f.conv.snapshot_failed(ticket));
        assert!(!f.conv.snapshot_failed(ticket));
        assert!(f.conv.replay.is_empty());
        assert_eq!(f.conv.state(), ConversationState::Live);

        for minute in 2..50 {
            let m = message(f.bob, MessageTarget::Direct(f.me), "more", minute);
            f.conv.apply_event(GatewayEvent::MessageReceived { message: m });
        }
        assert!(f.conv.replay.is_empty());
        assert_eq!(f.conv.entries().len(), 49);
        assert_eq!(f.conv.entries()[0].message.body, "first");

        // A stale ticket from before a reselect cannot cancel the new fetch.
        let next = f.conv.select(Recipient::Direct(f.bob));
        assert!(!f.conv.snapshot_failed(ticket));
        assert!(f.conv.apply_snapshot(next, vec![]));
    }

    #[test]
    fn failed_first_snapshot_without_pushes_stays_empty() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Group(f.group));
        assert!(f.conv.snapshot_failed(ticket));
        assert_eq!(f.conv.state(), ConversationState::Empty);

        let m = message(f.bob, MessageTarget::Group(f.group), "hi", 3);
        f.conv.apply_event(GatewayEvent::MessageReceived { message: m });
        assert_eq!(f.conv.state(), ConversationState::Live);
    }

    #[test]
    fn already_read_arrival_is_not_marked_again() {
        let mut f = fixture();
        open_dm(&mut f);
        let mut seen = message(f.bob, MessageTarget::Direct(f.me), "seen", 4);
        seen.is_read = true;
        let effects = f.conv.apply_event(GatewayEvent::MessageReceived { message: seen });
        assert!(effects.is_empty());
        assert_eq!(bodies(&f.conv), ["seen"]);
    }

    #[test]
    fn removal_from_open_group_resets() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Group(f.group));
        f.conv.apply_snapshot(ticket, vec![]);
        f.conv.set_draft("half typed");

        let other = Uuid::new_v4();
        let effects = f.conv.apply_event(GatewayEvent::MemberRemoved { group_id: f.group, user_id: other });
        assert_eq!(effects, vec![Effect::RefreshRecipient(Recipient::Group(f.group))]);

        f.conv.apply_event(GatewayEvent::MemberRemoved { group_id: f.group, user_id: f.me });
        assert_eq!(f.conv.recipient(), None);
        assert_eq!(f.conv.state(), ConversationState::Empty);
        assert_eq!(f.conv.draft(), "");
    }

    #[test]
    fn group_deletion_and_metadata() {
        let mut f = fixture();
        let ticket = f.conv.select(Recipient::Group(f.group));
        f.conv.apply_snapshot(ticket, vec![]);

        let effects = f.conv.apply_event(GatewayEvent::GroupRenamed {
            group_id: f.group,
            name: "new".into(),
        });
        assert_eq!(effects, vec![Effect::RefreshRecipient(Recipient::Group(f.group))]);

        let elsewhere = f.conv.apply_event(GatewayEvent::GroupDeleted { group_id: Uuid::new_v4() });
        assert!(elsewhere.is_empty());
        assert!(f.conv.recipient().is_some());

        f.conv.apply_event(GatewayEvent::GroupDeleted { group_id: f.group });
        assert_eq!(f.conv.recipient(), None);
    }

    #[test]
    fn blocking_resets_immediately_but_being_blocked_is_delayed() {
        let mut f = fixture();
        open_dm(&mut f);
        f.conv.apply_event(GatewayEvent::UserBlocked { blocked_user_id: f.bob });
        assert_eq!(f.conv.recipient(), None);

        open_dm(&mut f);
        let effects = f.conv.apply_event(GatewayEvent::UserBlockedByOther { blocked_by_user_id: f.bob });
        let generation = f.conv.generation();
        assert_eq!(
            effects,
            vec![Effect::ScheduleReset {
                delay: Duration::from_secs(3),
                generation,
            }]
        );
        assert!(f.conv.recipient().is_some());
        assert!(f.conv.apply_scheduled_reset(generation));
        assert_eq!(f.conv.recipient(), None);
    }

    #[test]
    fn scheduled_reset_skips_a_different_conversation() {
        let mut f = fixture();
        open_dm(&mut f);
        let effects = f.conv.apply_event(GatewayEvent::UserBlockedByOther { blocked_by_user_id: f.bob });
        let Effect::ScheduleReset { generation, .. } = effects[0] else {
            panic!("expected a scheduled reset");
        };

        let ticket = f.conv.select(Recipient::Group(f.group));
        f.conv.apply_snapshot(ticket, vec![]);
        assert!(!f.conv.apply_scheduled_reset(generation));
        assert_eq!(f.conv.recipient(), Some(Recipient::Group(f.group)));
    }

    #[test]
    fn send_success_clears_draft_and_merges_echo_once() {
        let mut f = fixture();
        open_dm(&mut f);
        assert!(f.conv.begin_send().is_none());

        f.conv.set_draft("hello");
        let outgoing = f.conv.begin_send().unwrap();
        assert_eq!(outgoing.request.target, MessageTarget::Direct(f.bob));
        assert_eq!(outgoing.request.body, "hello");
        assert!(f.conv.begin_send().is_none());

        // No optimistic entry.
        assert!(f.conv.entries().is_empty());

        let echo = message(f.me, MessageTarget::Direct(f.bob), "hello", 1);
        f.conv.apply_event(GatewayEvent::MessageReceived { message: echo.clone() });
        assert_eq!(
            f.conv.complete_send(outgoing.ticket, Ok::<_, String>(echo)),
            SendOutcome::Sent
        );
        assert_eq!(f.conv.draft(), "");
        assert_eq!(bodies(&f.conv), ["hello"]);
    }

    #[test]
    fn send_failure_keeps_draft() {
        let mut f = fixture();
        open_dm(&mut f);
        f.conv.set_draft("important");
        f.conv.set_attachment(Some("attachments/x".into()));

        let outgoing = f.conv.begin_send().unwrap();
        let outcome = f.conv.complete_send(outgoing.ticket, Err::<Message, _>("server returned 404"));
        assert_eq!(outcome, SendOutcome::Failed("server returned 404".into()));
        assert_eq!(f.conv.draft(), "important");
        assert_eq!(f.conv.attachment(), Some("attachments/x"));
        assert_eq!(f.conv.last_error(), Some("server returned 404"));

        // Retry is allowed.
        assert!(f.conv.begin_send().is_some());
    }

    #[test]
    fn attachment_only_message_can_be_sent() {
        let mut f = fixture();
        open_dm(&mut f);
        f.conv.set_attachment(Some("attachments/x".into()));
        let outgoing = f.conv.begin_send().unwrap();
        assert_eq!(outgoing.request.body, "");
        assert_eq!(outgoing.request.attachment.as_deref(), Some("attachments/x"));
    }

    #[test]
    fn send_result_after_switch_is_stale() {
        let mut f = fixture();
        open_dm(&mut f);
        f.conv.set_draft("for bob");
        let outgoing = f.conv.begin_send().unwrap();

        f.conv.select(Recipient::Group(f.group));
        let echo = message(f.me, MessageTarget::Direct(f.bob), "for bob", 1);
        assert_eq!(
            f.conv.complete_send(outgoing.ticket, Ok::<_, String>(echo)),
            SendOutcome::Stale
        );
        assert!(f.conv.entries().is_empty());
    }

    #[test]
    fn events_without_open_conversation_are_ignored() {
        let mut f = fixture();
        let dm = message(f.bob, MessageTarget::Direct(f.me), "hi", 0);
        assert!(f.conv.apply_event(GatewayEvent::MessageReceived { message: dm }).is_empty());
        assert!(f.conv.entries().is_empty());
    }
}
