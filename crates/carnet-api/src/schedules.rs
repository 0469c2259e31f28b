use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use carnet_db::models::UnavailabilityRow;
use carnet_scheduling::{
    BookedInterval, DEFAULT_SLOT_MINUTES, available_slots, validate_schedule, validate_window,
};
use carnet_types::api::{Claims, SlotsResponse, UnavailabilityRequest, UpdateScheduleRequest};
use carnet_types::models::{ClockTime, DoctorSchedule, Role, Unavailability};

use crate::auth::{AppState, blocking};
use crate::convert;
use crate::error::ApiError;
use crate::middleware::require_role;

/// Upper bound for "every window from now on".
const FAR_FUTURE: &str = "9999-12-31T23:59:59";

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

pub async fn get_my_schedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<DoctorSchedule>, ApiError> {
    require_role(&claims, Role::Doctor)?;
    Ok(Json(upcoming_schedule(&state, claims.sub).await?))
}

/// Replace the weekly hours and slot duration. Unavailability windows are
/// kept.
pub async fn put_my_schedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<DoctorSchedule>, ApiError> {
    require_role(&claims, Role::Doctor)?;
    validate_schedule(req.slot_duration_minutes, &req.working_hours)?;

    let rows: Vec<_> = req.working_hours.iter().map(convert::working_hours_row).collect();
    let doctor_id = claims.sub.to_string();
    let duration = req.slot_duration_minutes;
    blocking(&state, move |db| db.replace_schedule(&doctor_id, duration, &rows)).await?;
    info!(
        "Doctor {} set {} working range(s), {} min slots",
        claims.sub,
        req.working_hours.len(),
        duration
    );

    Ok(Json(upcoming_schedule(&state, claims.sub).await?))
}

pub async fn add_unavailability(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UnavailabilityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, Role::Doctor)?;
    validate_window(req.start, req.end)?;

    let window = Unavailability {
        id: Uuid::new_v4(),
        start: req.start,
        end: req.end,
        reason: req.reason.filter(|r| !r.trim().is_empty()),
    };
    let row = UnavailabilityRow {
        id: window.id.to_string(),
        doctor_id: claims.sub.to_string(),
        start_at: convert::db_datetime(window.start),
        end_at: convert::db_datetime(window.end),
        reason: window.reason.clone(),
    };
    blocking(&state, move |db| db.add_unavailability(&row)).await?;

    Ok((StatusCode::CREATED, Json(window)))
}

/// Bookable start times of a doctor on one date.
pub async fn get_slots(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<SlotsResponse>, ApiError> {
    ensure_doctor(&state, doctor_id).await?;

    let response = match booking_context(&state, doctor_id, query.date).await? {
        Some((schedule, booked)) => SlotsResponse {
            doctor_id,
            date: query.date,
            slot_duration_minutes: schedule.slot_duration_minutes,
            slots: available_slots(&schedule, query.date, &booked, Local::now().naive_local()),
        },
        None => SlotsResponse {
            doctor_id,
            date: query.date,
            slot_duration_minutes: DEFAULT_SLOT_MINUTES,
            slots: vec![],
        },
    };

    Ok(Json(response))
}

pub(crate) async fn ensure_doctor(state: &AppState, doctor_id: Uuid) -> Result<(), ApiError> {
    let id = doctor_id.to_string();
    let user = blocking(state, move |db| db.get_user_by_id(&id)).await?;
    match user {
        Some(u) if u.role == Role::Doctor.as_str() => Ok(()),
        _ => Err(ApiError::NotFound("doctor")),
    }
}

/// The doctor's schedule restricted to windows touching `date`, plus the
/// confirmed appointments of that day. `None` when no schedule was set.
pub(crate) async fn booking_context(
    state: &AppState,
    doctor_id: Uuid,
    date: NaiveDate,
) -> Result<Option<(DoctorSchedule, Vec<BookedInterval>)>, ApiError> {
    let id = doctor_id.to_string();
    let day_start = date.and_time(NaiveTime::default());
    let day_end = day_start
        .checked_add_signed(Duration::days(1))
        .unwrap_or(NaiveDateTime::MAX);
    let (from, to) = (convert::db_datetime(day_start), convert::db_datetime(day_end));
    let day = date.format("%Y-%m-%d").to_string();

    let loaded = blocking(state, move |db| {
        let Some(schedule) = db.get_schedule(&id)? else {
            return Ok(None);
        };
        let windows = db.unavailability_between(&id, &from, &to)?;
        let appointments = db.confirmed_appointments_on(&id, &day)?;
        Ok(Some((schedule, windows, appointments)))
    })
    .await?;

    let Some((schedule, windows, appointments)) = loaded else {
        return Ok(None);
    };

    let booked = appointments
        .into_iter()
        .filter_map(|a| {
            let start = a.start_time.parse::<ClockTime>();
            let end = a.end_time.parse::<ClockTime>();
            match (start, end) {
                (Ok(start), Ok(end)) => Some(BookedInterval { start, end }),
                _ => {
                    warn!("Skipping appointment '{}' with corrupt times", a.id);
                    None
                }
            }
        })
        .collect();

    Ok(Some((convert::schedule(schedule, windows), booked)))
}

async fn upcoming_schedule(state: &AppState, doctor_id: Uuid) -> Result<DoctorSchedule, ApiError> {
    let id = doctor_id.to_string();
    let now = convert::db_datetime(Local::now().naive_local());
    let (schedule, windows) = blocking(state, move |db| {
        let schedule = db.get_schedule(&id)?;
        let windows = db.unavailability_between(&id, &now, FAR_FUTURE)?;
        Ok((schedule, windows))
    })
    .await?;

    Ok(match schedule {
        Some(row) => convert::schedule(row, windows),
        None => DoctorSchedule {
            doctor_id,
            slot_duration_minutes: DEFAULT_SLOT_MINUTES,
            working_hours: vec![],
            unavailability: windows.into_iter().filter_map(convert::unavailability).collect(),
        },
    })
}
