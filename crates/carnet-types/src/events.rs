use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message, Reaction, UserInfo};

/// WebSocket close code sent when `Identify` carries an invalid or expired
/// token. Clients must sign in again instead of reconnecting.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A message was posted in one of the recipient's conversations
    NewMessage { message: Message },

    /// `reader_id` read the listed messages
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    /// A participant started typing
    TypingStart { conversation_id: Uuid, user: UserInfo },

    /// A participant stopped typing
    TypingStop { conversation_id: Uuid, user_id: Uuid },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },

    /// The full reaction list of a message after a toggle
    ReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },

    /// A conversation the recipient takes part in was opened
    ConversationCreated { conversation: Conversation },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to.
    /// Events that return `None` are global (presence, handshake).
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::NewMessage { message } => Some(message.conversation_id),
            Self::MessagesRead { conversation_id, .. }
            | Self::TypingStart { conversation_id, .. }
            | Self::TypingStop { conversation_id, .. }
            | Self::ReactionUpdated { conversation_id, .. } => Some(*conversation_id),
            Self::ConversationCreated { conversation } => Some(conversation.id),
            Self::Ready { .. } | Self::PresenceUpdate { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing in a conversation
    TypingStart { conversation_id: Uuid },

    /// Typing ended (debounce elapsed, message sent, or conversation left)
    TypingStop { conversation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_tagged_layout() {
        let event = GatewayEvent::PresenceUpdate {
            user_id: Uuid::nil(),
            online: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PresenceUpdate");
        assert_eq!(json["data"]["online"], true);
    }

    #[test]
    fn command_parses_from_client_json() {
        let raw = r#"{"type":"TypingStop","data":{"conversation_id":"00000000-0000-0000-0000-000000000007"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(
            cmd,
            GatewayCommand::TypingStop {
                conversation_id: Uuid::from_u128(7)
            }
        );
    }
}
