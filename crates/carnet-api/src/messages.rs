use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use carnet_db::models::NewMessage;
use carnet_types::api::{Claims, MarkReadResponse, SendMessageRequest};
use carnet_types::events::GatewayEvent;
use carnet_types::models::{MediaType, Message};

use crate::auth::{AppState, blocking};
use crate::conversations::participant_conversation;
use crate::convert;
use crate::error::ApiError;

const MAX_CONTENT_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `created_at` of the oldest message already loaded.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    participant_conversation(&state, conversation_id, claims.sub).await?;

    let cid = conversation_id.to_string();
    let limit = query.limit.clamp(1, 200);
    let before = query.before.map(convert::db_timestamp);

    let (rows, reaction_rows) = blocking(&state, move |db| {
        let rows = db.get_messages(&cid, limit, before.as_deref())?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
        Ok((rows, reaction_rows))
    })
    .await?;

    let mut reactions = convert::reactions_by_message(reaction_rows);
    let messages = rows
        .into_iter()
        .map(|row| {
            let r = reactions.remove(&row.id).unwrap_or_default();
            convert::message(row, r)
        })
        .collect();

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_message(&req)?;
    let conversation = participant_conversation(&state, conversation_id, claims.sub).await?;

    let message_id = Uuid::new_v4();
    let cid = conversation_id.to_string();
    let sender = claims.sub.to_string();
    let row = blocking(&state, move |db| {
        if let Some(reply_to) = req.reply_to {
            match db.get_message(&reply_to.to_string())? {
                Some(parent) if parent.conversation_id == cid => {}
                _ => return Ok(None),
            }
        }
        let reply_to = req.reply_to.map(|id| id.to_string());
        let row = db.insert_message(&NewMessage {
            id: &message_id.to_string(),
            conversation_id: &cid,
            sender_id: &sender,
            content: &req.content,
            media_type: req.media_type.as_str(),
            media_url: req.media_url.as_deref(),
            reply_to: reply_to.as_deref(),
            client_ref: req.client_ref.as_deref(),
        })?;
        Ok(Some(row))
    })
    .await?
    .ok_or_else(|| ApiError::validation("reply_to must reference a message of this conversation"))?;

    let message = convert::message(row, vec![]);
    let participants = convert::participants(&conversation);
    let delivered = state
        .dispatcher
        .send_to_users(
            &participants,
            GatewayEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;
    debug!("Message {} pushed to {} connection(s)", message.id, delivered);

    Ok((StatusCode::CREATED, Json(message)))
}

/// Mark everything the other participant sent as read and tell both sides.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let conversation = participant_conversation(&state, conversation_id, claims.sub).await?;

    // Millisecond precision, as stored
    let read_at = Utc::now().trunc_subsecs(3);
    let cid = conversation_id.to_string();
    let reader = claims.sub.to_string();
    let stamp = convert::db_timestamp(read_at);
    let ids = blocking(&state, move |db| db.mark_conversation_read(&cid, &reader, &stamp)).await?;

    let message_ids: Vec<Uuid> = ids
        .iter()
        .map(|id| convert::uuid(id, "id", id))
        .collect();

    if !message_ids.is_empty() {
        let participants = convert::participants(&conversation);
        state
            .dispatcher
            .send_to_users(
                &participants,
                GatewayEvent::MessagesRead {
                    conversation_id,
                    reader_id: claims.sub,
                    message_ids: message_ids.clone(),
                    read_at,
                },
            )
            .await;
    }

    Ok(Json(MarkReadResponse {
        message_ids,
        read_at,
    }))
}

fn validate_message(req: &SendMessageRequest) -> Result<(), ApiError> {
    let has_media = req.media_type != MediaType::None;
    if req.content.trim().is_empty() && !has_media {
        return Err(ApiError::validation("message must have content or media"));
    }
    if req.content.chars().count() > MAX_CONTENT_LEN {
        return Err(ApiError::validation("message content is too long"));
    }
    match (&req.media_url, has_media) {
        (None, true) => Err(ApiError::validation("media_url is required for media messages")),
        (Some(_), false) => Err(ApiError::validation("media_url requires a media_type")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_or_media_is_required() {
        assert!(validate_message(&SendMessageRequest::default()).is_err());
        assert!(
            validate_message(&SendMessageRequest {
                content: "bonjour".into(),
                ..Default::default()
            })
            .is_ok()
        );
        assert!(
            validate_message(&SendMessageRequest {
                media_type: MediaType::Image,
                media_url: Some("uploads/scan.png".into()),
                ..Default::default()
            })
            .is_ok()
        );
    }

    #[test]
    fn media_type_and_url_go_together() {
        assert!(
            validate_message(&SendMessageRequest {
                content: "see attached".into(),
                media_type: MediaType::File,
                ..Default::default()
            })
            .is_err()
        );
        assert!(
            validate_message(&SendMessageRequest {
                content: "see attached".into(),
                media_url: Some("uploads/a.pdf".into()),
                ..Default::default()
            })
            .is_err()
        );
    }
}
