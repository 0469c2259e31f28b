use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use carnet_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use carnet_types::events::GatewayEvent;

use crate::auth::{AppState, blocking};
use crate::conversations::participant_conversation;
use crate::convert;
use crate::error::ApiError;

const MAX_EMOJI_LEN: usize = 32;

/// Toggle the caller's reaction and push the full, authoritative list.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ApiError> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
        return Err(ApiError::validation("emoji must be 1 to 32 bytes"));
    }

    let conversation = participant_conversation(&state, conversation_id, claims.sub).await?;

    let cid = conversation_id.to_string();
    let mid = message_id.to_string();
    let uid = claims.sub.to_string();
    let (added, rows) = blocking(&state, move |db| {
        match db.get_message(&mid)? {
            Some(m) if m.conversation_id == cid => {}
            _ => return Ok(None),
        }
        let added = db.toggle_reaction(&mid, &uid, &emoji)?;
        Ok(Some((added, db.get_reactions(&mid)?)))
    })
    .await?
    .ok_or(ApiError::NotFound("message"))?;

    let reactions = convert::reactions(rows);
    let participants = convert::participants(&conversation);
    state
        .dispatcher
        .send_to_users(
            &participants,
            GatewayEvent::ReactionUpdated {
                conversation_id,
                message_id,
                reactions: reactions.clone(),
            },
        )
        .await;

    Ok(Json(ToggleReactionResponse { added, reactions }))
}
