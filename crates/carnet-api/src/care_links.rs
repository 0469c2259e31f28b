use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use carnet_types::api::{Claims, CreateCareLinkRequest};
use carnet_types::models::{Role, UserProfile};

use crate::auth::{AppState, blocking};
use crate::convert;
use crate::error::ApiError;
use crate::middleware::require_role;

/// A patient picks a doctor. Linking twice is a no-op (200 instead of 201).
pub async fn create_care_link(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCareLinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Patient)?;

    let doctor_id = req.doctor_id.to_string();
    let patient_id = claims.sub.to_string();
    let (doctor, created) = blocking(&state, move |db| {
        let Some(doctor) = db.get_user_by_id(&doctor_id)? else {
            return Ok(None);
        };
        if doctor.role != Role::Doctor.as_str() {
            return Ok(None);
        }
        let created = db.create_care_link(&doctor_id, &patient_id)?;
        Ok(Some((doctor, created)))
    })
    .await?
    .ok_or(ApiError::NotFound("doctor"))?;

    if created {
        info!("Patient {} linked to doctor {}", claims.sub, req.doctor_id);
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(convert::user_profile(doctor))))
}

/// Assigned doctors for a patient, followed patients for a doctor.
pub async fn list_care_links(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let user_id = claims.sub.to_string();
    let rows = blocking(&state, move |db| db.linked_users(&user_id, claims.role.as_str())).await?;
    Ok(Json(rows.into_iter().map(convert::user_profile).collect()))
}
