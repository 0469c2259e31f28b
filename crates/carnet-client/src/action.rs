//! Side effects requested by the [`crate::Messenger`] state machine.

use uuid::Uuid;

use carnet_types::api::SendMessageRequest;
use carnet_types::events::GatewayCommand;

use crate::outgoing::TempId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// `GET /conversations`
    FetchConversations,

    /// `GET /conversations/{id}/messages`
    FetchMessages { conversation_id: Uuid },

    /// `POST /conversations/{id}/messages`; completion is reported as
    /// `SendSucceeded` / `SendFailed` for `temp_id`.
    SendMessage {
        temp_id: TempId,
        conversation_id: Uuid,
        request: SendMessageRequest,
    },

    /// `POST /conversations/{id}/read`
    MarkRead { conversation_id: Uuid },

    /// `POST /conversations/{id}/messages/{message_id}/reactions`
    ToggleReaction {
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: String,
    },

    /// Frame for the gateway socket.
    Gateway(GatewayCommand),
}
