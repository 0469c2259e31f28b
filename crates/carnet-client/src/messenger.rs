//! Messaging synchronization state machine.
//!
//! [`Messenger`] owns everything the messaging screen shows: the
//! conversation list with unread badges, the active conversation's messages
//! (including optimistic, not yet acknowledged sends), presence, typing
//! indicators and the last user-facing error.
//!
//! It performs no I/O. Inputs arrive as [`ClientEvent`]s or user-intent
//! methods, and every mutation returns the [`ClientAction`]s a driver must
//! execute. Time is passed in explicitly so tests can drive the clock.
//!
//! # Invariants
//!
//! - The message list never holds two entries with the same server id.
//! - A temporary entry disappears once its server message is known or the
//!   send fails.
//! - The typing roster never lists the local user.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use carnet_types::api::SendMessageRequest;
use carnet_types::events::GatewayEvent;
use carnet_types::models::{Conversation, MediaType, Message, Reaction, UserInfo, toggle_reaction};

use crate::action::ClientAction;
use crate::error::ClientError;
use crate::event::ClientEvent;
use crate::outgoing::{OutgoingState, OutgoingTracker, TempId};
use crate::typing::{TypingDebouncer, TypingRoster};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The socket dropped after having been up; the session is retrying.
    Reconnecting,
    /// The token was refused. Only a new login recovers.
    SignedOut,
}

/// One row of the active message list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub message: Message,
    /// Set while the message only exists locally.
    pub temp_id: Option<TempId>,
}

impl ChatMessage {
    fn confirmed(message: Message) -> Self {
        Self {
            message,
            temp_id: None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_id.is_some()
    }
}

/// Media reference attached to an outgoing message. The upload itself
/// happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub media_type: MediaType,
    pub media_url: String,
}

#[derive(Debug, Clone)]
pub struct Messenger {
    me: Uuid,
    connection: ConnectionState,
    /// Most recently active first.
    conversations: Vec<Conversation>,
    active: Option<Uuid>,
    messages: Vec<ChatMessage>,
    presence: HashSet<Uuid>,
    typing: TypingRoster,
    debouncer: TypingDebouncer,
    outgoing: OutgoingTracker,
    error: Option<String>,
}

impl Messenger {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            connection: ConnectionState::Disconnected,
            conversations: Vec::new(),
            active: None,
            messages: Vec::new(),
            presence: HashSet::new(),
            typing: TypingRoster::new(me),
            debouncer: TypingDebouncer::new(),
            outgoing: OutgoingTracker::new(),
            error: None,
        }
    }

    /// Process an event and return actions.
    pub fn handle(&mut self, event: ClientEvent, now: Instant) -> Vec<ClientAction> {
        match event {
            ClientEvent::Connecting => {
                // A retry keeps Reconnecting so Ready knows to resync
                if self.connection != ConnectionState::Reconnecting {
                    self.connection = ConnectionState::Connecting;
                }
                vec![]
            }
            ClientEvent::Disconnected => {
                self.on_disconnected();
                vec![]
            }
            ClientEvent::Unauthorized => {
                self.on_disconnected();
                self.connection = ConnectionState::SignedOut;
                self.error = Some(format!("{}, please sign in again", ClientError::Unauthorized));
                vec![]
            }
            ClientEvent::Gateway(event) => self.on_gateway(event, now),
            ClientEvent::ConversationsLoaded(conversations) => {
                self.on_conversations_loaded(conversations);
                vec![]
            }
            ClientEvent::MessagesLoaded {
                conversation_id,
                messages,
            } => {
                self.on_messages_loaded(conversation_id, messages);
                vec![]
            }
            ClientEvent::SendSucceeded { temp_id, message } => {
                self.on_send_succeeded(temp_id, message);
                vec![]
            }
            ClientEvent::SendFailed { temp_id, error } => {
                self.on_send_failed(temp_id, &error);
                vec![]
            }
            ClientEvent::RequestFailed { error } => {
                warn!("Request failed: {}", error);
                self.error = Some(error);
                vec![]
            }
        }
    }

    // -- User intents --

    /// Make `conversation_id` the active one: badge cleared, history and read
    /// receipt requested, local typing stopped.
    pub fn open_conversation(&mut self, conversation_id: Uuid) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        if let Some(cmd) = self.debouncer.stop() {
            actions.push(ClientAction::Gateway(cmd));
        }

        if self.active != Some(conversation_id) {
            self.messages.clear();
        }
        self.active = Some(conversation_id);
        self.typing.clear();
        self.outgoing.prune_settled();
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            conversation.unread_count = 0;
        }

        actions.push(ClientAction::FetchMessages { conversation_id });
        actions.push(ClientAction::MarkRead { conversation_id });
        actions
    }

    pub fn close_conversation(&mut self) -> Vec<ClientAction> {
        let actions: Vec<ClientAction> =
            self.debouncer.stop().map(ClientAction::Gateway).into_iter().collect();
        self.active = None;
        self.messages.clear();
        self.typing.clear();
        actions
    }

    /// Optimistic send into the active conversation.
    pub fn send_message(
        &mut self,
        content: &str,
        attachment: Option<Attachment>,
        reply_to: Option<Uuid>,
    ) -> Vec<ClientAction> {
        let Some(conversation_id) = self.active else {
            self.error = Some("Open a conversation before sending".into());
            return vec![];
        };

        let content = content.trim().to_string();
        if content.is_empty() && attachment.is_none() {
            return vec![];
        }

        let temp_id = TempId::new();
        let (media_type, media_url) = match attachment {
            Some(a) => (a.media_type, Some(a.media_url)),
            None => (MediaType::None, None),
        };
        let request = SendMessageRequest {
            content: content.clone(),
            media_type,
            media_url: media_url.clone(),
            reply_to,
            client_ref: Some(temp_id.client_ref()),
        };

        self.outgoing.begin(temp_id, conversation_id);
        self.messages.push(ChatMessage {
            message: Message {
                id: temp_id.as_uuid(),
                conversation_id,
                sender_id: self.me,
                content,
                media_type,
                media_url,
                reply_to,
                reactions: vec![],
                is_read: false,
                read_at: None,
                created_at: Utc::now(),
                client_ref: Some(temp_id.client_ref()),
            },
            temp_id: Some(temp_id),
        });
        self.error = None;

        let mut actions = Vec::new();
        if let Some(cmd) = self.debouncer.stop() {
            actions.push(ClientAction::Gateway(cmd));
        }
        actions.push(ClientAction::SendMessage {
            temp_id,
            conversation_id,
            request,
        });
        actions
    }

    /// The compose box changed. Drives the local typing edges.
    pub fn input_changed(&mut self, text: &str, now: Instant) -> Vec<ClientAction> {
        let Some(conversation_id) = self.active else {
            return vec![];
        };
        if text.trim().is_empty() {
            return self.debouncer.stop().map(ClientAction::Gateway).into_iter().collect();
        }
        self.debouncer
            .keystroke(conversation_id, now)
            .into_iter()
            .map(ClientAction::Gateway)
            .collect()
    }

    /// Optimistic reaction toggle; the server's `ReactionUpdated` wins.
    pub fn toggle_reaction(&mut self, message_id: Uuid, emoji: &str) -> Vec<ClientAction> {
        let Some(conversation_id) = self.active else {
            return vec![];
        };
        let me = self.me;
        let Some(entry) = self
            .messages
            .iter_mut()
            .find(|m| !m.is_temporary() && m.message.id == message_id)
        else {
            return vec![];
        };

        toggle_reaction(&mut entry.message.reactions, me, emoji);
        vec![ClientAction::ToggleReaction {
            conversation_id,
            message_id,
            emoji: emoji.to_string(),
        }]
    }

    /// Periodic clock: typing stop edge and remote typing expiry.
    pub fn tick(&mut self, now: Instant) -> Vec<ClientAction> {
        let actions: Vec<ClientAction> =
            self.debouncer.tick(now).map(ClientAction::Gateway).into_iter().collect();
        self.typing.expire(now);
        actions
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    // -- Views --

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn unread_total(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        self.active
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.presence.contains(&user_id)
    }

    pub fn online_users(&self) -> &HashSet<Uuid> {
        &self.presence
    }

    pub fn typing_users(&self) -> Vec<&UserInfo> {
        self.typing.users()
    }

    pub fn is_typing(&self) -> bool {
        self.debouncer.is_typing()
    }

    pub fn outgoing_state(&self, temp_id: TempId) -> Option<&OutgoingState> {
        self.outgoing.state(temp_id)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // -- Event handlers --

    fn on_disconnected(&mut self) {
        if self.connection == ConnectionState::Connected {
            info!("Gateway connection lost, waiting for reconnect");
        }
        self.connection = ConnectionState::Reconnecting;
        self.presence.clear();
        self.typing.clear();
        self.debouncer.reset();
    }

    fn on_gateway(&mut self, event: GatewayEvent, now: Instant) -> Vec<ClientAction> {
        match event {
            GatewayEvent::Ready { user_id } => {
                if user_id != self.me {
                    warn!("Gateway identified {} but the session belongs to {}", user_id, self.me);
                }
                let resync = self.connection == ConnectionState::Reconnecting;
                self.connection = ConnectionState::Connected;

                let mut actions = vec![ClientAction::FetchConversations];
                if let (true, Some(conversation_id)) = (resync, self.active) {
                    actions.push(ClientAction::FetchMessages { conversation_id });
                    actions.push(ClientAction::MarkRead { conversation_id });
                }
                actions
            }

            GatewayEvent::NewMessage { message } => self.on_new_message(message),

            GatewayEvent::MessagesRead {
                conversation_id,
                reader_id,
                message_ids,
                read_at,
            } => {
                if reader_id == self.me {
                    if let Some(conversation) = self.conversation_mut(conversation_id) {
                        conversation.unread_count = 0;
                    }
                }
                if self.active == Some(conversation_id) {
                    self.patch_read(&message_ids, read_at);
                }
                vec![]
            }

            GatewayEvent::TypingStart {
                conversation_id,
                user,
            } => {
                if self.active == Some(conversation_id) {
                    self.typing.start(user, now);
                }
                vec![]
            }

            GatewayEvent::TypingStop {
                conversation_id,
                user_id,
            } => {
                if self.active == Some(conversation_id) {
                    self.typing.stop(user_id);
                }
                vec![]
            }

            GatewayEvent::PresenceUpdate { user_id, online } => {
                if online {
                    self.presence.insert(user_id);
                } else {
                    self.presence.remove(&user_id);
                }
                vec![]
            }

            GatewayEvent::ReactionUpdated {
                conversation_id,
                message_id,
                reactions,
            } => {
                if self.active == Some(conversation_id) {
                    self.patch_reactions(message_id, reactions);
                }
                vec![]
            }

            GatewayEvent::ConversationCreated { conversation } => {
                if self.conversation(conversation.id).is_none() {
                    self.conversations.push(conversation);
                    self.sort_conversations();
                }
                vec![]
            }
        }
    }

    fn on_new_message(&mut self, message: Message) -> Vec<ClientAction> {
        let conversation_id = message.conversation_id;
        let from_me = message.sender_id == self.me;
        let is_active = self.active == Some(conversation_id);
        let mut actions = Vec::new();

        let preview = message.preview();
        let known = match self.conversation_mut(conversation_id) {
            Some(conversation) => {
                let repeated = conversation
                    .last_message
                    .as_ref()
                    .is_some_and(|last| last.id == preview.id);
                if !from_me && !is_active && !repeated {
                    conversation.unread_count += 1;
                }
                conversation.last_message = Some(preview);
                true
            }
            None => false,
        };

        if known {
            self.sort_conversations();
        } else {
            debug!("Message for unknown conversation {}, refreshing list", conversation_id);
            actions.push(ClientAction::FetchConversations);
        }

        if is_active {
            self.reconcile(&message);
            self.insert_message(message);
            if !from_me {
                actions.push(ClientAction::MarkRead { conversation_id });
            }
        }

        actions
    }

    fn on_conversations_loaded(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        if let Some(active) = self.active {
            if let Some(conversation) = self.conversation_mut(active) {
                conversation.unread_count = 0;
            }
        }
        self.sort_conversations();
    }

    /// Merge a loaded page with what is already shown: server copies win,
    /// ids stay unique, pending sends stay at the end unless the page
    /// already contains them.
    fn on_messages_loaded(&mut self, conversation_id: Uuid, loaded: Vec<Message>) {
        if self.active != Some(conversation_id) {
            debug!("Dropping stale history for {}", conversation_id);
            return;
        }

        let previous = std::mem::take(&mut self.messages);
        let (temporary, shown): (Vec<_>, Vec<_>) =
            previous.into_iter().partition(ChatMessage::is_temporary);

        let mut seen = HashSet::new();
        let mut merged: Vec<Message> = loaded
            .into_iter()
            .chain(shown.into_iter().map(|m| m.message))
            .filter(|m| m.conversation_id == conversation_id && seen.insert(m.id))
            .collect();
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.messages = merged.into_iter().map(ChatMessage::confirmed).collect();

        for entry in temporary {
            let Some(temp_id) = entry.temp_id else {
                continue;
            };
            let stored = self
                .messages
                .iter()
                .find(|m| m.message.sender_id == self.me && temp_id.matches(m.message.client_ref.as_deref()))
                .map(|m| m.message.id);
            match stored {
                Some(message_id) => {
                    self.outgoing.confirm(temp_id, message_id);
                }
                None => self.messages.push(entry),
            }
        }
    }

    fn on_send_succeeded(&mut self, temp_id: TempId, message: Message) {
        self.outgoing.confirm(temp_id, message.id);
        self.messages.retain(|m| m.temp_id != Some(temp_id));

        let preview = message.preview();
        if let Some(conversation) = self.conversation_mut(message.conversation_id) {
            conversation.last_message = Some(preview);
        }
        self.sort_conversations();

        if self.active == Some(message.conversation_id) {
            self.insert_message(message);
        }
    }

    /// No retry: every temporary message is dropped and the error surfaced.
    fn on_send_failed(&mut self, temp_id: TempId, error: &str) {
        warn!("Send {} failed: {}", temp_id, error);
        self.outgoing.fail(temp_id, error);
        let others = self.outgoing.fail_all_pending(error);
        if !others.is_empty() {
            debug!("Also failing {} other pending send(s)", others.len());
        }
        self.messages.retain(|m| !m.is_temporary());
        self.error = Some(format!("Message not sent: {}", error));
    }

    // -- Helpers --

    fn conversation_mut(&mut self, conversation_id: Uuid) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    fn sort_conversations(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    }

    /// Drop the temporary copy that `message` stands for. Matches on
    /// `client_ref`; echoes without one fall back to sender and content.
    fn reconcile(&mut self, message: &Message) {
        if message.sender_id != self.me {
            return;
        }
        let position = match message.client_ref.as_deref() {
            Some(client_ref) => self
                .messages
                .iter()
                .position(|m| m.temp_id.is_some_and(|t| t.matches(Some(client_ref)))),
            None => self.messages.iter().position(|m| {
                m.is_temporary()
                    && m.message.conversation_id == message.conversation_id
                    && m.message.content == message.content
            }),
        };

        if let Some(position) = position {
            let entry = self.messages.remove(position);
            if let Some(temp_id) = entry.temp_id {
                self.outgoing.confirm(temp_id, message.id);
            }
        }
    }

    /// Insert a server message, replacing a copy with the same id.
    /// Confirmed messages stay ahead of pending ones.
    fn insert_message(&mut self, message: Message) {
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| !m.is_temporary() && m.message.id == message.id)
        {
            existing.message = message;
            return;
        }
        let at = self
            .messages
            .iter()
            .position(ChatMessage::is_temporary)
            .unwrap_or(self.messages.len());
        self.messages.insert(at, ChatMessage::confirmed(message));
    }

    fn patch_read(&mut self, message_ids: &[Uuid], read_at: DateTime<Utc>) {
        let ids: HashSet<&Uuid> = message_ids.iter().collect();
        for entry in self.messages.iter_mut() {
            if !entry.is_temporary() && ids.contains(&entry.message.id) {
                entry.message.is_read = true;
                entry.message.read_at = Some(read_at);
            }
        }
    }

    fn patch_reactions(&mut self, message_id: Uuid, reactions: Vec<Reaction>) {
        if let Some(entry) = self
            .messages
            .iter_mut()
            .find(|m| !m.is_temporary() && m.message.id == message_id)
        {
            entry.message.reactions = reactions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use carnet_types::events::GatewayCommand;
    use carnet_types::models::Role;

    struct Fixture {
        me: Uuid,
        doctor: Uuid,
        a: Uuid,
        b: Uuid,
        messenger: Messenger,
        now: Instant,
    }

    fn conversation(id: Uuid, patient_id: Uuid, doctor_id: Uuid) -> Conversation {
        Conversation {
            id,
            patient_id,
            doctor_id,
            last_message: None,
            unread_count: 0,
            created_at: Utc::now(),
        }
    }

    fn message(conversation_id: Uuid, sender_id: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.into(),
            media_type: MediaType::None,
            media_url: None,
            reply_to: None,
            reactions: vec![],
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
            client_ref: None,
        }
    }

    /// A patient with two conversations (`a`, `b`) loaded and connected.
    fn fixture() -> Fixture {
        let me = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut messenger = Messenger::new(me);
        let now = Instant::now();
        messenger.handle(ClientEvent::Gateway(GatewayEvent::Ready { user_id: me }), now);
        messenger.handle(
            ClientEvent::ConversationsLoaded(vec![
                conversation(a, me, doctor),
                conversation(b, me, Uuid::new_v4()),
            ]),
            now,
        );
        Fixture {
            me,
            doctor,
            a,
            b,
            messenger,
            now,
        }
    }

    fn new_message(m: Message) -> ClientEvent {
        ClientEvent::Gateway(GatewayEvent::NewMessage { message: m })
    }

    fn sent_temp(actions: &[ClientAction]) -> (TempId, SendMessageRequest) {
        actions
            .iter()
            .find_map(|a| match a {
                ClientAction::SendMessage { temp_id, request, .. } => Some((*temp_id, request.clone())),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn echo_replaces_temporary_message() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);

        let actions = f.messenger.send_message("Bonjour", None, None);
        let (temp_id, request) = sent_temp(&actions);
        assert_eq!(f.messenger.messages().len(), 1);
        assert!(f.messenger.messages()[0].is_temporary());

        let mut echo = message(f.a, f.me, "Bonjour");
        echo.client_ref = request.client_ref.clone();
        f.messenger.handle(new_message(echo.clone()), f.now);
        f.messenger.handle(
            ClientEvent::SendSucceeded {
                temp_id,
                message: echo.clone(),
            },
            f.now,
        );

        let messages = f.messenger.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.id, echo.id);
        assert!(!messages[0].is_temporary());
        assert_eq!(
            f.messenger.outgoing_state(temp_id),
            Some(&OutgoingState::Confirmed { message_id: echo.id })
        );
    }

    #[test]
    fn response_before_echo_keeps_single_copy() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let (temp_id, request) = sent_temp(&f.messenger.send_message("Merci", None, None));

        let mut stored = message(f.a, f.me, "Merci");
        stored.client_ref = request.client_ref;
        f.messenger.handle(
            ClientEvent::SendSucceeded {
                temp_id,
                message: stored.clone(),
            },
            f.now,
        );
        f.messenger.handle(new_message(stored.clone()), f.now);

        assert_eq!(f.messenger.messages().len(), 1);
        assert_eq!(f.messenger.messages()[0].message.id, stored.id);
    }

    #[test]
    fn echo_without_client_ref_matches_on_content() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        f.messenger.send_message("Rendez-vous demain ?", None, None);

        f.messenger.handle(new_message(message(f.a, f.me, "Rendez-vous demain ?")), f.now);
        assert_eq!(f.messenger.messages().len(), 1);
        assert!(!f.messenger.messages()[0].is_temporary());
    }

    #[test]
    fn failure_purges_all_temporary_messages() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let (first, _) = sent_temp(&f.messenger.send_message("one", None, None));
        let (second, _) = sent_temp(&f.messenger.send_message("two", None, None));
        assert_eq!(f.messenger.messages().len(), 2);

        f.messenger.handle(
            ClientEvent::SendFailed {
                temp_id: first,
                error: "network down".into(),
            },
            f.now,
        );

        assert!(f.messenger.messages().is_empty());
        assert!(f.messenger.error().unwrap().contains("network down"));
        assert!(matches!(f.messenger.outgoing_state(first), Some(OutgoingState::Failed { .. })));
        assert!(matches!(f.messenger.outgoing_state(second), Some(OutgoingState::Failed { .. })));
    }

    #[test]
    fn unread_badges_follow_active_conversation() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);

        f.messenger.handle(new_message(message(f.b, Uuid::new_v4(), "hello")), f.now);
        assert_eq!(f.messenger.conversation(f.b).unwrap().unread_count, 1);
        assert_eq!(f.messenger.conversation(f.a).unwrap().unread_count, 0);

        let actions = f.messenger.open_conversation(f.b);
        assert_eq!(f.messenger.conversation(f.b).unwrap().unread_count, 0);
        assert!(actions.contains(&ClientAction::MarkRead { conversation_id: f.b }));
        assert!(actions.contains(&ClientAction::FetchMessages { conversation_id: f.b }));
    }

    #[test]
    fn identical_texts_with_distinct_ids_each_count() {
        let mut f = fixture();
        let first = message(f.b, f.doctor, "ok");
        let second = Message {
            id: Uuid::new_v4(),
            ..first.clone()
        };

        f.messenger.handle(new_message(first), f.now);
        f.messenger.handle(new_message(second.clone()), f.now);
        assert_eq!(f.messenger.conversation(f.b).unwrap().unread_count, 2);

        // Redelivery of the latest message is not a new one
        f.messenger.handle(new_message(second), f.now);
        assert_eq!(f.messenger.conversation(f.b).unwrap().unread_count, 2);
    }

    #[test]
    fn own_messages_do_not_count_as_unread() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        f.messenger.handle(new_message(message(f.b, f.me, "from my other tab")), f.now);
        assert_eq!(f.messenger.conversation(f.b).unwrap().unread_count, 0);
        assert_eq!(
            f.messenger.conversations()[0].id,
            f.b,
            "latest activity moves to the top"
        );
    }

    #[test]
    fn active_conversation_message_requests_read_receipt() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let incoming = message(f.a, f.doctor, "Vos résultats sont prêts");
        let actions = f.messenger.handle(new_message(incoming.clone()), f.now);

        assert_eq!(actions, vec![ClientAction::MarkRead { conversation_id: f.a }]);
        assert_eq!(f.messenger.messages().len(), 1);

        // A duplicate push does not add a second row
        f.messenger.handle(new_message(incoming), f.now);
        assert_eq!(f.messenger.messages().len(), 1);
    }

    #[test]
    fn unknown_conversation_triggers_refresh() {
        let mut f = fixture();
        let actions = f
            .messenger
            .handle(new_message(message(Uuid::new_v4(), f.doctor, "hi")), f.now);
        assert_eq!(actions, vec![ClientAction::FetchConversations]);
    }

    #[test]
    fn read_receipts_and_reactions_patch_by_id() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let mine = message(f.a, f.me, "question");
        let other = message(f.a, f.doctor, "answer");
        f.messenger.handle(
            ClientEvent::MessagesLoaded {
                conversation_id: f.a,
                messages: vec![mine.clone(), other.clone()],
            },
            f.now,
        );

        let read_at = Utc::now();
        f.messenger.handle(
            ClientEvent::Gateway(GatewayEvent::MessagesRead {
                conversation_id: f.a,
                reader_id: f.doctor,
                message_ids: vec![mine.id],
                read_at,
            }),
            f.now,
        );
        let reactions = vec![Reaction {
            emoji: "👍".into(),
            user_id: f.doctor,
        }];
        f.messenger.handle(
            ClientEvent::Gateway(GatewayEvent::ReactionUpdated {
                conversation_id: f.a,
                message_id: mine.id,
                reactions: reactions.clone(),
            }),
            f.now,
        );

        let shown = f.messenger.messages();
        assert!(shown[0].message.is_read);
        assert_eq!(shown[0].message.read_at, Some(read_at));
        assert_eq!(shown[0].message.reactions, reactions);
        assert!(!shown[1].message.is_read);
        assert!(shown[1].message.reactions.is_empty());
    }

    #[test]
    fn local_reaction_toggle_is_optimistic() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let mut m = message(f.a, f.doctor, "ok");
        m.reactions.push(Reaction {
            emoji: "👍".into(),
            user_id: f.doctor,
        });
        f.messenger.handle(
            ClientEvent::MessagesLoaded {
                conversation_id: f.a,
                messages: vec![m.clone()],
            },
            f.now,
        );

        let actions = f.messenger.toggle_reaction(m.id, "👍");
        assert_eq!(actions.len(), 1);
        assert_eq!(f.messenger.messages()[0].message.reactions.len(), 2);

        f.messenger.toggle_reaction(m.id, "👍");
        assert_eq!(
            f.messenger.messages()[0].message.reactions,
            vec![Reaction {
                emoji: "👍".into(),
                user_id: f.doctor
            }]
        );
    }

    #[test]
    fn typing_events_scoped_to_active_conversation() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let doctor = UserInfo {
            id: f.doctor,
            name: "Dr Martin".into(),
            role: Role::Doctor,
        };

        f.messenger.handle(
            ClientEvent::Gateway(GatewayEvent::TypingStart {
                conversation_id: f.b,
                user: doctor.clone(),
            }),
            f.now,
        );
        assert!(f.messenger.typing_users().is_empty());

        f.messenger.handle(
            ClientEvent::Gateway(GatewayEvent::TypingStart {
                conversation_id: f.a,
                user: doctor.clone(),
            }),
            f.now,
        );
        assert_eq!(f.messenger.typing_users(), vec![&doctor]);

        f.messenger.tick(f.now + Duration::from_secs(6));
        assert!(f.messenger.typing_users().is_empty());
    }

    #[test]
    fn local_typing_edges() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);

        let actions = f.messenger.input_changed("B", f.now);
        assert_eq!(
            actions,
            vec![ClientAction::Gateway(GatewayCommand::TypingStart { conversation_id: f.a })]
        );
        assert!(f.messenger.input_changed("Bo", f.now + Duration::from_millis(200)).is_empty());
        assert!(f.messenger.tick(f.now + Duration::from_millis(900)).is_empty());
        assert_eq!(
            f.messenger.tick(f.now + Duration::from_millis(1300)),
            vec![ClientAction::Gateway(GatewayCommand::TypingStop { conversation_id: f.a })]
        );

        // Sending stops immediately
        f.messenger.input_changed("Bonjour", f.now + Duration::from_secs(2));
        let actions = f.messenger.send_message("Bonjour", None, None);
        assert_eq!(
            actions[0],
            ClientAction::Gateway(GatewayCommand::TypingStop { conversation_id: f.a })
        );
    }

    #[test]
    fn switching_conversation_stops_typing_and_clears_roster() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        f.messenger.input_changed("x", f.now);
        f.messenger.handle(
            ClientEvent::Gateway(GatewayEvent::TypingStart {
                conversation_id: f.a,
                user: UserInfo {
                    id: f.doctor,
                    name: "Dr Martin".into(),
                    role: Role::Doctor,
                },
            }),
            f.now,
        );

        let actions = f.messenger.open_conversation(f.b);
        assert_eq!(
            actions[0],
            ClientAction::Gateway(GatewayCommand::TypingStop { conversation_id: f.a })
        );
        assert!(f.messenger.typing_users().is_empty());
        assert!(!f.messenger.is_typing());
    }

    #[test]
    fn reconnect_clears_presence_and_resyncs() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        f.messenger.handle(
            ClientEvent::Gateway(GatewayEvent::PresenceUpdate {
                user_id: f.doctor,
                online: true,
            }),
            f.now,
        );
        assert!(f.messenger.is_online(f.doctor));

        f.messenger.handle(ClientEvent::Disconnected, f.now);
        assert_eq!(f.messenger.connection(), ConnectionState::Reconnecting);
        assert!(!f.messenger.is_online(f.doctor));

        let actions = f
            .messenger
            .handle(ClientEvent::Gateway(GatewayEvent::Ready { user_id: f.me }), f.now);
        assert_eq!(f.messenger.connection(), ConnectionState::Connected);
        assert_eq!(
            actions,
            vec![
                ClientAction::FetchConversations,
                ClientAction::FetchMessages { conversation_id: f.a },
                ClientAction::MarkRead { conversation_id: f.a },
            ]
        );
    }

    #[test]
    fn refused_token_signs_out() {
        let mut f = fixture();
        f.messenger.handle(ClientEvent::Unauthorized, f.now);
        assert_eq!(f.messenger.connection(), ConnectionState::SignedOut);
        assert!(f.messenger.error().unwrap().contains("sign in again"));
    }

    #[test]
    fn history_merge_dedups_and_keeps_pending() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let pushed = message(f.a, f.doctor, "pushed while loading");
        f.messenger.handle(new_message(pushed.clone()), f.now);
        f.messenger.send_message("still sending", None, None);

        let older = message(f.a, f.doctor, "older");
        f.messenger.handle(
            ClientEvent::MessagesLoaded {
                conversation_id: f.a,
                messages: vec![older.clone(), pushed.clone()],
            },
            f.now,
        );

        let ids: Vec<Uuid> = f.messenger.messages().iter().map(|m| m.message.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().filter(|id| **id == pushed.id).count(), 1);
        assert!(f.messenger.messages()[2].is_temporary());
    }

    #[test]
    fn stale_history_is_ignored() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        f.messenger.open_conversation(f.b);
        f.messenger.handle(
            ClientEvent::MessagesLoaded {
                conversation_id: f.a,
                messages: vec![message(f.a, f.doctor, "late")],
            },
            f.now,
        );
        assert!(f.messenger.messages().is_empty());
    }

    #[test]
    fn send_without_active_conversation_sets_error() {
        let mut f = fixture();
        assert!(f.messenger.send_message("hi", None, None).is_empty());
        assert!(f.messenger.error().is_some());
        f.messenger.clear_error();
        assert!(f.messenger.error().is_none());
    }

    #[test]
    fn attachment_only_message_is_sent() {
        let mut f = fixture();
        f.messenger.open_conversation(f.a);
        let actions = f.messenger.send_message(
            "",
            Some(Attachment {
                media_type: MediaType::Image,
                media_url: "uploads/radio.png".into(),
            }),
            None,
        );
        let (_, request) = sent_temp(&actions);
        assert_eq!(request.media_type, MediaType::Image);
        assert_eq!(request.media_url.as_deref(), Some("uploads/radio.png"));
        assert!(f.messenger.send_message("   ", None, None).is_empty());
    }
}
