//! Inputs of the [`crate::Messenger`] state machine.
//!
//! Events come from two places: the gateway session (push events and
//! connection lifecycle) and the completion of REST calls started by a
//! [`crate::ClientAction`].

use uuid::Uuid;

use carnet_types::events::GatewayEvent;
use carnet_types::models::{Conversation, Message};

use crate::outgoing::TempId;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The session is opening its first socket.
    Connecting,

    /// The socket dropped; the session will retry.
    Disconnected,

    /// The gateway refused the token; the session stopped for good.
    Unauthorized,

    /// Push event from the gateway, including `Ready`.
    Gateway(GatewayEvent),

    /// Result of `FetchConversations`.
    ConversationsLoaded(Vec<Conversation>),

    /// Result of `FetchMessages`, oldest first.
    MessagesLoaded {
        conversation_id: Uuid,
        messages: Vec<Message>,
    },

    /// The server stored an optimistic send.
    SendSucceeded { temp_id: TempId, message: Message },

    /// The server refused or the request never completed.
    SendFailed { temp_id: TempId, error: String },

    /// Any other REST call failed.
    RequestFailed { error: String },
}
