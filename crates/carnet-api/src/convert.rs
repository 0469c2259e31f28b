//! Row -> API model conversion.
//!
//! Corrupt values are logged and replaced with defaults rather than failing
//! the whole request.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc, Weekday};
use tracing::warn;
use uuid::Uuid;

use carnet_db::models::{
    AppointmentRow, ConversationRow, ConversationSummaryRow, MessageRow, ReactionRow, ScheduleRow,
    UnavailabilityRow, UserRow, WorkingHoursRow,
};
use carnet_types::models::{
    Appointment, AppointmentStatus, ClockTime, Conversation, DoctorSchedule, MediaType, Message,
    Reaction, Role, Unavailability, UserProfile, WorkingHours,
};

/// Timestamp layout used by the SQLite defaults; keeps text comparison in
/// queries consistent with values written by the server.
const DB_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Local date-time layout for unavailability windows.
const DB_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";

pub fn db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(DB_TIMESTAMP).to_string()
}

pub fn db_datetime(dt: NaiveDateTime) -> String {
    dt.format(DB_DATETIME).to_string()
}

pub fn uuid(raw: &str, what: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", what, raw, owner, e);
        Uuid::default()
    })
}

fn opt_uuid(raw: Option<&str>, what: &str, owner: &str) -> Option<Uuid> {
    raw.map(|r| uuid(r, what, owner))
}

pub fn timestamp(raw: &str, owner: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's CURRENT_TIMESTAMP shape, no timezone
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", raw, owner, e);
            DateTime::default()
        })
}

fn parsed<T: FromStr + Default>(raw: &str, what: &str, owner: &str) -> T
where
    T::Err: std::fmt::Display,
{
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", what, raw, owner, e);
        T::default()
    })
}

pub fn user_profile(row: UserRow) -> UserProfile {
    let role = row.role.parse::<Role>().unwrap_or_else(|e| {
        warn!("Corrupt role on user '{}': {}", row.id, e);
        Role::Patient
    });
    UserProfile {
        id: uuid(&row.id, "id", &row.id),
        created_at: timestamp(&row.created_at, &row.id),
        email: row.email,
        role,
        first_name: row.first_name,
        last_name: row.last_name,
    }
}

/// Group reaction rows by message id, keeping insertion order.
pub fn reactions_by_message(rows: Vec<ReactionRow>) -> HashMap<String, Vec<Reaction>> {
    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in rows {
        let user_id = uuid(&r.user_id, "user_id", &r.message_id);
        map.entry(r.message_id).or_default().push(Reaction {
            emoji: r.emoji,
            user_id,
        });
    }
    map
}

pub fn reactions(rows: Vec<ReactionRow>) -> Vec<Reaction> {
    rows.into_iter()
        .map(|r| Reaction {
            user_id: uuid(&r.user_id, "user_id", &r.message_id),
            emoji: r.emoji,
        })
        .collect()
}

pub fn message(row: MessageRow, reactions: Vec<Reaction>) -> Message {
    let media_type = parsed::<MediaType>(&row.media_type, "media_type", &row.id);
    Message {
        id: uuid(&row.id, "id", &row.id),
        conversation_id: uuid(&row.conversation_id, "conversation_id", &row.id),
        sender_id: uuid(&row.sender_id, "sender_id", &row.id),
        reply_to: opt_uuid(row.reply_to.as_deref(), "reply_to", &row.id),
        read_at: row.read_at.as_deref().map(|r| timestamp(r, &row.id)),
        created_at: timestamp(&row.created_at, &row.id),
        content: row.content,
        media_type,
        media_url: row.media_url,
        reactions,
        is_read: row.is_read,
        client_ref: row.client_ref,
    }
}

pub fn conversation(row: ConversationRow) -> Conversation {
    Conversation {
        id: uuid(&row.id, "id", &row.id),
        patient_id: uuid(&row.patient_id, "patient_id", &row.id),
        doctor_id: uuid(&row.doctor_id, "doctor_id", &row.id),
        last_message: None,
        unread_count: 0,
        created_at: timestamp(&row.created_at, &row.id),
    }
}

pub fn participants(row: &ConversationRow) -> [Uuid; 2] {
    [
        uuid(&row.patient_id, "patient_id", &row.id),
        uuid(&row.doctor_id, "doctor_id", &row.id),
    ]
}

pub fn conversation_summary(row: ConversationSummaryRow) -> Conversation {
    let mut conv = conversation(row.conversation);
    conv.last_message = row.last_message.map(|m| message(m, vec![]).preview());
    conv.unread_count = row.unread_count;
    conv
}

pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_monday() as u8
}

pub fn working_hours_row(hours: &WorkingHours) -> WorkingHoursRow {
    WorkingHoursRow {
        weekday: weekday_index(hours.weekday),
        start_time: hours.start.to_string(),
        end_time: hours.end.to_string(),
    }
}

fn working_hours(row: WorkingHoursRow, doctor_id: &str) -> Option<WorkingHours> {
    let weekday = Weekday::try_from(row.weekday)
        .map_err(|e| warn!("Corrupt weekday {} for doctor '{}': {}", row.weekday, doctor_id, e))
        .ok()?;
    let start = row
        .start_time
        .parse::<ClockTime>()
        .map_err(|e| warn!("Corrupt start '{}' for doctor '{}': {}", row.start_time, doctor_id, e))
        .ok()?;
    let end = row
        .end_time
        .parse::<ClockTime>()
        .map_err(|e| warn!("Corrupt end '{}' for doctor '{}': {}", row.end_time, doctor_id, e))
        .ok()?;
    Some(WorkingHours { weekday, start, end })
}

pub fn unavailability(row: UnavailabilityRow) -> Option<Unavailability> {
    let start = NaiveDateTime::parse_from_str(&row.start_at, DB_DATETIME)
        .map_err(|e| warn!("Corrupt start_at '{}' on '{}': {}", row.start_at, row.id, e))
        .ok()?;
    let end = NaiveDateTime::parse_from_str(&row.end_at, DB_DATETIME)
        .map_err(|e| warn!("Corrupt end_at '{}' on '{}': {}", row.end_at, row.id, e))
        .ok()?;
    Some(Unavailability {
        id: uuid(&row.id, "id", &row.id),
        start,
        end,
        reason: row.reason,
    })
}

/// Rows that fail to parse are skipped: a broken range must not widen the
/// bookable hours.
pub fn schedule(row: ScheduleRow, windows: Vec<UnavailabilityRow>) -> DoctorSchedule {
    let doctor_id = uuid(&row.doctor_id, "doctor_id", &row.doctor_id);
    let working_hours = row
        .working_hours
        .into_iter()
        .filter_map(|h| working_hours(h, &row.doctor_id))
        .collect();
    DoctorSchedule {
        doctor_id,
        slot_duration_minutes: row.slot_duration_minutes,
        working_hours,
        unavailability: windows.into_iter().filter_map(unavailability).collect(),
    }
}

pub fn appointment(row: AppointmentRow) -> Appointment {
    let status = row.status.parse::<AppointmentStatus>().unwrap_or_else(|e| {
        warn!("Corrupt status on appointment '{}': {}", row.id, e);
        AppointmentStatus::Cancelled
    });
    let clock = |raw: &str| {
        raw.parse::<ClockTime>().unwrap_or_else(|e| {
            warn!("Corrupt time '{}' on appointment '{}': {}", raw, row.id, e);
            ClockTime::default()
        })
    };
    Appointment {
        id: uuid(&row.id, "id", &row.id),
        doctor_id: uuid(&row.doctor_id, "doctor_id", &row.id),
        patient_id: uuid(&row.patient_id, "patient_id", &row.id),
        date: parsed(&row.date, "date", &row.id),
        start_time: clock(&row.start_time),
        end_time: clock(&row.end_time),
        status,
        created_at: timestamp(&row.created_at, &row.id),
        reason: row.reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn db_timestamps_round_trip_through_parser() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 9, 5, 0).unwrap();
        let raw = db_timestamp(ts);
        assert_eq!(raw, "2026-03-02T09:05:00.000Z");
        assert_eq!(timestamp(&raw, "t"), ts);
    }

    #[test]
    fn sqlite_current_timestamp_is_accepted() {
        let ts = timestamp("2026-03-02 09:05:00", "t");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 3, 2, 9, 5, 0).unwrap());
    }

    #[test]
    fn corrupt_weekday_is_dropped_from_schedule() {
        let row = ScheduleRow {
            doctor_id: Uuid::new_v4().to_string(),
            slot_duration_minutes: 30,
            working_hours: vec![
                WorkingHoursRow {
                    weekday: 0,
                    start_time: "09:00".into(),
                    end_time: "12:00".into(),
                },
                WorkingHoursRow {
                    weekday: 9,
                    start_time: "09:00".into(),
                    end_time: "12:00".into(),
                },
            ],
        };
        let schedule = schedule(row, vec![]);
        assert_eq!(schedule.working_hours.len(), 1);
        assert_eq!(schedule.working_hours[0].weekday, Weekday::Mon);
    }

    #[test]
    fn unavailability_uses_local_datetime_layout() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let row = UnavailabilityRow {
            id: Uuid::new_v4().to_string(),
            doctor_id: Uuid::new_v4().to_string(),
            start_at: db_datetime(start),
            end_at: "2026-03-02T11:00:00".into(),
            reason: None,
        };
        let window = unavailability(row).unwrap();
        assert_eq!(window.start, start);
        assert_eq!(window.end - window.start, chrono::Duration::hours(1));
    }
}
