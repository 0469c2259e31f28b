//! Appointment slot computation.
//!
//! Pure functions over a [`DoctorSchedule`]: which start times can be booked
//! on a given date, where an appointment ends, and whether a requested
//! booking is acceptable. Nothing here touches the database or the clock;
//! callers pass `now` explicitly.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use thiserror::Error;

use carnet_types::models::{ClockTime, DoctorSchedule, WorkingHours};

pub const DEFAULT_SLOT_MINUTES: u32 = 30;
pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 240;

/// An already-booked appointment, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedInterval {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl BookedInterval {
    pub fn overlaps(&self, start: ClockTime, end: ClockTime) -> bool {
        start <= self.end && self.start <= end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("the doctor has not configured a schedule")]
    NoSchedule,
    #[error("appointment time is in the past")]
    InPast,
    #[error("the doctor does not work on {0}")]
    DoctorNotWorking(Weekday),
    #[error("{0} is not an available slot")]
    NotASlot(ClockTime),
    #[error("the doctor is unavailable at that time")]
    Unavailable,
    #[error("this slot is already booked")]
    Conflict,
}

impl BookingError {
    /// Collisions map to 409, everything else is a validation failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("slot duration must be between 5 and 240 minutes, got {0}")]
    InvalidDuration(u32),
    #[error("working range {start}-{end} on {weekday} is empty")]
    EmptyRange {
        weekday: Weekday,
        start: ClockTime,
        end: ClockTime,
    },
    #[error("working ranges overlap on {0}")]
    Overlap(Weekday),
    #[error("unavailability must end after it starts")]
    InvalidWindow,
}

/// Inclusive end of an appointment: `start + duration - 1 minute`.
///
/// Returns `None` for a zero duration or when the end would pass midnight.
pub fn end_time(start: ClockTime, duration_minutes: u32) -> Option<ClockTime> {
    let last = start.minutes().checked_add(duration_minutes.checked_sub(1)?)?;
    ClockTime::from_minutes(last)
}

/// Check a weekly schedule before it is stored.
pub fn validate_schedule(
    slot_duration_minutes: u32,
    working_hours: &[WorkingHours],
) -> Result<(), ScheduleError> {
    if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&slot_duration_minutes) {
        return Err(ScheduleError::InvalidDuration(slot_duration_minutes));
    }

    for range in working_hours {
        if range.start >= range.end {
            return Err(ScheduleError::EmptyRange {
                weekday: range.weekday,
                start: range.start,
                end: range.end,
            });
        }
    }

    for (i, a) in working_hours.iter().enumerate() {
        for b in &working_hours[i + 1..] {
            if a.weekday == b.weekday && a.start < b.end && b.start < a.end {
                return Err(ScheduleError::Overlap(a.weekday));
            }
        }
    }

    Ok(())
}

pub fn validate_window(start: NaiveDateTime, end: NaiveDateTime) -> Result<(), ScheduleError> {
    if end <= start {
        return Err(ScheduleError::InvalidWindow);
    }
    Ok(())
}

/// Bookable start times on `date`, sorted and de-duplicated.
///
/// A start `t` is offered when `t + duration` fits in a working range of the
/// date's weekday, the slot is still in the future, and it overlaps neither
/// an unavailability window nor a booked appointment.
pub fn available_slots(
    schedule: &DoctorSchedule,
    date: NaiveDate,
    booked: &[BookedInterval],
    now: NaiveDateTime,
) -> Vec<ClockTime> {
    let duration = schedule.slot_duration_minutes;
    if duration == 0 || date < now.date() {
        return vec![];
    }

    let mut slots = Vec::new();
    for range in ranges_on(schedule, date.weekday()) {
        let mut minute = range.start.minutes();
        while minute
            .checked_add(duration)
            .is_some_and(|end| end <= range.end.minutes())
        {
            if let Some(start) = ClockTime::from_minutes(minute) {
                if check_slot(schedule, date, start, booked, now).is_ok() {
                    slots.push(start);
                }
            }
            minute += duration;
        }
    }

    slots.sort();
    slots.dedup();
    slots
}

/// Validate a requested booking. Returns the inclusive end time on success.
pub fn validate_booking(
    schedule: &DoctorSchedule,
    date: NaiveDate,
    start: ClockTime,
    booked: &[BookedInterval],
    now: NaiveDateTime,
) -> Result<ClockTime, BookingError> {
    let duration = schedule.slot_duration_minutes;
    if duration == 0 || schedule.working_hours.is_empty() {
        return Err(BookingError::NoSchedule);
    }

    let weekday = date.weekday();
    let mut ranges = ranges_on(schedule, weekday).peekable();
    if ranges.peek().is_none() {
        return Err(BookingError::DoctorNotWorking(weekday));
    }

    let on_grid = ranges.any(|range| {
        let (s, e, t) = (range.start.minutes(), range.end.minutes(), start.minutes());
        t >= s && t + duration <= e && (t - s) % duration == 0
    });
    if !on_grid {
        return Err(BookingError::NotASlot(start));
    }

    check_slot(schedule, date, start, booked, now)?;

    end_time(start, duration).ok_or(BookingError::NotASlot(start))
}

fn ranges_on(schedule: &DoctorSchedule, weekday: Weekday) -> impl Iterator<Item = &WorkingHours> {
    schedule
        .working_hours
        .iter()
        .filter(move |range| range.weekday == weekday)
}

fn check_slot(
    schedule: &DoctorSchedule,
    date: NaiveDate,
    start: ClockTime,
    booked: &[BookedInterval],
    now: NaiveDateTime,
) -> Result<(), BookingError> {
    let duration = schedule.slot_duration_minutes;
    let slot_start = start.on(date);
    if slot_start <= now {
        return Err(BookingError::InPast);
    }

    let slot_end = slot_start + Duration::minutes(i64::from(duration));
    if schedule
        .unavailability
        .iter()
        .any(|u| slot_start < u.end && u.start < slot_end)
    {
        return Err(BookingError::Unavailable);
    }

    let last_minute = end_time(start, duration).ok_or(BookingError::NotASlot(start))?;
    if booked.iter().any(|b| b.overlaps(start, last_minute)) {
        return Err(BookingError::Conflict);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carnet_types::models::Unavailability;
    use uuid::Uuid;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn hours(weekday: Weekday, start: &str, end: &str) -> WorkingHours {
        WorkingHours {
            weekday,
            start: t(start),
            end: t(end),
        }
    }

    fn schedule(working_hours: Vec<WorkingHours>) -> DoctorSchedule {
        DoctorSchedule {
            doctor_id: Uuid::nil(),
            slot_duration_minutes: 30,
            working_hours,
            unavailability: vec![],
        }
    }

    // 2030-01-07 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn long_ago() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn render(slots: &[ClockTime]) -> Vec<String> {
        slots.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn end_time_is_inclusive() {
        assert_eq!(end_time(t("09:00"), 30), Some(t("09:29")));
        assert_eq!(end_time(t("09:45"), 15), Some(t("09:59")));
        assert_eq!(end_time(t("23:45"), 30), None);
        assert_eq!(end_time(t("09:00"), 0), None);
        assert_eq!(end_time(t("09:00"), u32::MAX), None);
    }

    #[test]
    fn slots_fill_each_working_range() {
        let s = schedule(vec![
            hours(Weekday::Mon, "09:00", "11:00"),
            hours(Weekday::Mon, "14:00", "15:15"),
            hours(Weekday::Tue, "08:00", "18:00"),
        ]);
        let slots = available_slots(&s, monday(), &[], long_ago());
        assert_eq!(
            render(&slots),
            vec!["09:00", "09:30", "10:00", "10:30", "14:00", "14:30"]
        );
    }

    #[test]
    fn no_slots_on_days_off_or_past_dates() {
        let s = schedule(vec![hours(Weekday::Mon, "09:00", "12:00")]);
        let sunday = NaiveDate::from_ymd_opt(2030, 1, 6).unwrap();
        assert!(available_slots(&s, sunday, &[], long_ago()).is_empty());

        let after = monday().succ_opt().unwrap().and_hms_opt(8, 0, 0).unwrap();
        assert!(available_slots(&s, monday(), &[], after).is_empty());
    }

    #[test]
    fn past_slots_of_today_are_hidden() {
        let s = schedule(vec![hours(Weekday::Mon, "09:00", "11:00")]);
        let now = monday().and_hms_opt(9, 40, 0).unwrap();
        let slots = available_slots(&s, monday(), &[], now);
        assert_eq!(render(&slots), vec!["10:00", "10:30"]);
    }

    #[test]
    fn booked_and_unavailable_slots_are_removed() {
        let mut s = schedule(vec![hours(Weekday::Mon, "09:00", "12:00")]);
        s.unavailability.push(Unavailability {
            id: Uuid::new_v4(),
            start: monday().and_hms_opt(10, 15, 0).unwrap(),
            end: monday().and_hms_opt(11, 0, 0).unwrap(),
            reason: Some("staff meeting".into()),
        });
        let booked = [BookedInterval {
            start: t("09:30"),
            end: t("09:59"),
        }];
        let slots = available_slots(&s, monday(), &booked, long_ago());
        assert_eq!(render(&slots), vec!["09:00", "11:00", "11:30"]);
    }

    #[test]
    fn booking_collision_is_a_conflict() {
        let s = schedule(vec![hours(Weekday::Mon, "09:00", "12:00")]);
        let booked = [BookedInterval {
            start: t("10:00"),
            end: t("10:29"),
        }];
        let err = validate_booking(&s, monday(), t("10:00"), &booked, long_ago()).unwrap_err();
        assert_eq!(err, BookingError::Conflict);
        assert!(err.is_conflict());

        let end = validate_booking(&s, monday(), t("10:30"), &booked, long_ago()).unwrap();
        assert_eq!(end, t("10:59"));
    }

    #[test]
    fn booking_rejects_off_grid_and_off_days() {
        let s = schedule(vec![hours(Weekday::Mon, "09:00", "12:00")]);
        assert_eq!(
            validate_booking(&s, monday(), t("09:10"), &[], long_ago()),
            Err(BookingError::NotASlot(t("09:10")))
        );
        assert_eq!(
            validate_booking(&s, monday(), t("11:45"), &[], long_ago()),
            Err(BookingError::NotASlot(t("11:45")))
        );
        let tuesday = monday().succ_opt().unwrap();
        assert_eq!(
            validate_booking(&s, tuesday, t("09:00"), &[], long_ago()),
            Err(BookingError::DoctorNotWorking(Weekday::Tue))
        );
        assert_eq!(
            validate_booking(&schedule(vec![]), monday(), t("09:00"), &[], long_ago()),
            Err(BookingError::NoSchedule)
        );
    }

    #[test]
    fn booking_in_the_past_is_rejected() {
        let s = schedule(vec![hours(Weekday::Mon, "09:00", "12:00")]);
        let now = monday().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(
            validate_booking(&s, monday(), t("09:30"), &[], now),
            Err(BookingError::InPast)
        );
    }

    #[test]
    fn every_offered_slot_validates() {
        let mut s = schedule(vec![
            hours(Weekday::Mon, "08:00", "12:00"),
            hours(Weekday::Mon, "13:30", "19:00"),
        ]);
        s.slot_duration_minutes = 20;
        let booked = [BookedInterval {
            start: t("08:40"),
            end: t("08:59"),
        }];
        let now = monday().and_hms_opt(8, 5, 0).unwrap();
        let slots = available_slots(&s, monday(), &booked, now);
        assert!(!slots.is_empty());
        for slot in slots {
            let end = validate_booking(&s, monday(), slot, &booked, now).unwrap();
            assert_eq!(end.minutes(), slot.minutes() + 19);
        }
    }

    #[test]
    fn schedule_validation() {
        assert_eq!(validate_schedule(0, &[]), Err(ScheduleError::InvalidDuration(0)));
        assert!(validate_schedule(30, &[hours(Weekday::Mon, "09:00", "12:00")]).is_ok());
        assert!(matches!(
            validate_schedule(30, &[hours(Weekday::Mon, "12:00", "09:00")]),
            Err(ScheduleError::EmptyRange { .. })
        ));
        assert_eq!(
            validate_schedule(
                30,
                &[
                    hours(Weekday::Wed, "09:00", "12:00"),
                    hours(Weekday::Wed, "11:00", "13:00"),
                ]
            ),
            Err(ScheduleError::Overlap(Weekday::Wed))
        );
        assert!(validate_schedule(
            30,
            &[
                hours(Weekday::Wed, "09:00", "12:00"),
                hours(Weekday::Wed, "12:00", "13:00"),
            ]
        )
        .is_ok());
    }
}
