//! Slot rendering and the booking round-trip.

use std::fmt;

use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use carnet_scheduling::end_time;
use carnet_types::api::{BookAppointmentRequest, SlotsResponse};
use carnet_types::models::{Appointment, ClockTime};

use crate::api::ApiClient;
use crate::error::ClientError;

/// A bookable slot with its inclusive end, e.g. `09:00-09:29`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotView {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl SlotView {
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SlotView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Pair each offered start with its end time. Starts whose end would pass
/// midnight are not shown.
pub fn slot_views(response: &SlotsResponse) -> Vec<SlotView> {
    response
        .slots
        .iter()
        .filter_map(|&start| {
            end_time(start, response.slot_duration_minutes).map(|end| SlotView { start, end })
        })
        .collect()
}

#[derive(Debug)]
pub enum BookingOutcome {
    Booked(Appointment),
    /// Someone else got the slot first; these are the slots still open.
    Taken(Vec<SlotView>),
}

/// Book `start` and, if it was taken in the meantime, reload what is left.
pub async fn book_slot(
    api: &ApiClient,
    doctor_id: Uuid,
    date: NaiveDate,
    start: ClockTime,
    reason: Option<String>,
) -> Result<BookingOutcome, ClientError> {
    let request = BookAppointmentRequest {
        doctor_id,
        date,
        start_time: start,
        reason,
    };
    match api.book(&request).await {
        Ok(appointment) => Ok(BookingOutcome::Booked(appointment)),
        Err(e) if e.is_conflict() => {
            info!("Slot {} on {} was taken, reloading", start, date);
            let remaining = api.slots(doctor_id, date).await?;
            Ok(BookingOutcome::Taken(slot_views(&remaining)))
        }
        Err(e) => Err(e),
    }
}
