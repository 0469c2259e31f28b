//! Typing indicators: the local debouncer that decides when to emit
//! `TypingStart`/`TypingStop`, and the roster of remote users typing in the
//! active conversation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use carnet_types::events::GatewayCommand;
use carnet_types::models::UserInfo;

/// Quiet period after the last keystroke before `TypingStop` is sent.
pub const TYPING_STOP_AFTER: Duration = Duration::from_secs(1);

/// While typing continues, `TypingStart` is re-sent this often so the
/// remote side does not expire the indicator.
pub const TYPING_KEEPALIVE: Duration = Duration::from_secs(3);

/// Remote entries not refreshed within this window are dropped.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct TypingDebouncer {
    state: Option<LocalTyping>,
}

#[derive(Debug, Clone, Copy)]
struct LocalTyping {
    conversation_id: Uuid,
    last_keystroke: Instant,
    last_start_sent: Instant,
}

impl TypingDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A keystroke in `conversation_id`. Emits `TypingStart` on the rising
    /// edge and as keepalive; switching conversation stops the previous one.
    pub fn keystroke(&mut self, conversation_id: Uuid, now: Instant) -> Vec<GatewayCommand> {
        let mut commands = Vec::new();

        match &mut self.state {
            Some(typing) if typing.conversation_id == conversation_id => {
                typing.last_keystroke = now;
                if now.saturating_duration_since(typing.last_start_sent) >= TYPING_KEEPALIVE {
                    typing.last_start_sent = now;
                    commands.push(GatewayCommand::TypingStart { conversation_id });
                }
                return commands;
            }
            Some(previous) => commands.push(GatewayCommand::TypingStop {
                conversation_id: previous.conversation_id,
            }),
            None => {}
        }

        self.state = Some(LocalTyping {
            conversation_id,
            last_keystroke: now,
            last_start_sent: now,
        });
        commands.push(GatewayCommand::TypingStart { conversation_id });
        commands
    }

    /// Falling edge after [`TYPING_STOP_AFTER`] without a keystroke.
    pub fn tick(&mut self, now: Instant) -> Option<GatewayCommand> {
        let typing = self.state?;
        if now.saturating_duration_since(typing.last_keystroke) >= TYPING_STOP_AFTER {
            return self.stop();
        }
        None
    }

    /// Immediate stop (message sent, input cleared, conversation left).
    pub fn stop(&mut self) -> Option<GatewayCommand> {
        self.state.take().map(|typing| GatewayCommand::TypingStop {
            conversation_id: typing.conversation_id,
        })
    }

    /// Forget local typing without emitting anything (socket is gone).
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn is_typing(&self) -> bool {
        self.state.is_some()
    }
}

/// Remote users currently typing. The local user is never listed.
#[derive(Debug, Clone)]
pub struct TypingRoster {
    me: Uuid,
    entries: HashMap<Uuid, (UserInfo, Instant)>,
}

impl TypingRoster {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            entries: HashMap::new(),
        }
    }

    /// Insert or refresh `user`. Returns false for the local user.
    pub fn start(&mut self, user: UserInfo, now: Instant) -> bool {
        if user.id == self.me {
            return false;
        }
        self.entries.insert(user.id, (user, now));
        true
    }

    pub fn stop(&mut self, user_id: Uuid) -> bool {
        self.entries.remove(&user_id).is_some()
    }

    /// Drop entries older than [`TYPING_EXPIRY`]. Returns true if any went.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < TYPING_EXPIRY);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// Typing users sorted by name.
    pub fn users(&self) -> Vec<&UserInfo> {
        let mut users: Vec<&UserInfo> = self.entries.values().map(|(u, _)| u).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }
}
