use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use carnet_db::models::ConversationRow;
use carnet_types::api::{Claims, CreateConversationRequest};
use carnet_types::events::GatewayEvent;
use carnet_types::models::{Conversation, Role};

use crate::auth::{AppState, blocking};
use crate::convert;
use crate::error::ApiError;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let user_id = claims.sub.to_string();
    let rows = blocking(&state, move |db| db.list_conversations(&user_id)).await?;
    Ok(Json(rows.into_iter().map(convert::conversation_summary).collect()))
}

/// Open the conversation with a linked doctor or patient. Asking again
/// returns the existing conversation with 200.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.participant_id == claims.sub {
        return Err(ApiError::validation("cannot open a conversation with yourself"));
    }

    let other_id = req.participant_id.to_string();
    let other = blocking(&state, move |db| db.get_user_by_id(&other_id))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    let expected = match claims.role {
        Role::Patient => Role::Doctor,
        Role::Doctor => Role::Patient,
    };
    if other.role != expected.as_str() {
        return Err(ApiError::validation(format!(
            "conversations are between a patient and a doctor, {} is not a {}",
            req.participant_id,
            expected.as_str()
        )));
    }

    let (patient_id, doctor_id) = match claims.role {
        Role::Patient => (claims.sub, req.participant_id),
        Role::Doctor => (req.participant_id, claims.sub),
    };

    let (row, created) = blocking(&state, move |db| {
        let (p, d) = (patient_id.to_string(), doctor_id.to_string());
        if !db.is_linked(&d, &p)? {
            return Ok(None);
        }
        db.get_or_create_conversation(&Uuid::new_v4().to_string(), &p, &d)
            .map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::forbidden("the patient is not assigned to this doctor"))?;

    let conversation = convert::conversation(row);
    if created {
        info!("Conversation {} opened between {} and {}", conversation.id, patient_id, doctor_id);
        state
            .dispatcher
            .send_to_users(
                &conversation.participants(),
                GatewayEvent::ConversationCreated {
                    conversation: conversation.clone(),
                },
            )
            .await;
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(conversation)))
}

/// Load a conversation the caller takes part in.
pub(crate) async fn participant_conversation(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<ConversationRow, ApiError> {
    let cid = conversation_id.to_string();
    let row = blocking(state, move |db| db.get_conversation(&cid))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;

    let uid = user_id.to_string();
    if row.patient_id != uid && row.doctor_id != uid {
        return Err(ApiError::forbidden("not a participant of this conversation"));
    }
    Ok(row)
}
