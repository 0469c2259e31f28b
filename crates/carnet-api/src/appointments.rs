use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Local, Utc};
use tracing::info;
use uuid::Uuid;

use carnet_db::models::AppointmentRow;
use carnet_scheduling::{BookingError, validate_booking};
use carnet_types::api::{BookAppointmentRequest, Claims};
use carnet_types::models::{Appointment, AppointmentStatus, Role};

use crate::auth::{AppState, blocking};
use crate::convert;
use crate::error::ApiError;
use crate::middleware::require_role;
use crate::schedules::{booking_context, ensure_doctor};

/// Book one of the doctor's offered slots. 400 when the start is not
/// bookable, 409 when another confirmed appointment holds it.
pub async fn book_appointment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BookAppointmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Patient)?;
    ensure_doctor(&state, req.doctor_id).await?;

    let (schedule, booked) = booking_context(&state, req.doctor_id, req.date)
        .await?
        .ok_or(BookingError::NoSchedule)?;

    let end = validate_booking(
        &schedule,
        req.date,
        req.start_time,
        &booked,
        Local::now().naive_local(),
    )?;

    let row = AppointmentRow {
        id: Uuid::new_v4().to_string(),
        doctor_id: req.doctor_id.to_string(),
        patient_id: claims.sub.to_string(),
        date: req.date.format("%Y-%m-%d").to_string(),
        start_time: req.start_time.to_string(),
        end_time: end.to_string(),
        reason: req.reason.filter(|r| !r.trim().is_empty()),
        status: AppointmentStatus::Confirmed.as_str().to_string(),
        created_at: convert::db_timestamp(Utc::now()),
    };

    // The overlap check is repeated under the writer lock: a concurrent
    // booking may have taken the slot since it was offered.
    let insert = row.clone();
    if !blocking(&state, move |db| db.book_appointment(&insert)).await? {
        return Err(BookingError::Conflict.into());
    }

    info!(
        "Appointment {} booked: patient {} with doctor {} on {} {}-{}",
        row.id, row.patient_id, row.doctor_id, row.date, row.start_time, row.end_time
    );

    Ok((StatusCode::CREATED, Json(convert::appointment(row))))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let user_id = claims.sub.to_string();
    let rows = blocking(&state, move |db| db.list_appointments(&user_id)).await?;
    Ok(Json(rows.into_iter().map(convert::appointment).collect()))
}

/// Either participant may cancel. The slot becomes bookable again.
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Appointment>, ApiError> {
    let id = appointment_id.to_string();
    let row = blocking(&state, move |db| db.get_appointment(&id))
        .await?
        .ok_or(ApiError::NotFound("appointment"))?;

    let uid = claims.sub.to_string();
    if row.doctor_id != uid && row.patient_id != uid {
        return Err(ApiError::forbidden("not a participant of this appointment"));
    }

    let id = appointment_id.to_string();
    let updated = blocking(&state, move |db| {
        if !db.cancel_appointment(&id)? {
            return Ok(None);
        }
        db.get_appointment(&id)
    })
    .await?
    .ok_or_else(|| ApiError::Conflict("appointment is already cancelled".into()))?;

    info!("Appointment {} cancelled by {}", appointment_id, claims.sub);
    Ok(Json(convert::appointment(updated)))
}
