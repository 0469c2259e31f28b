//! Row types as stored in SQLite. Ids and timestamps stay strings here;
//! the API layer parses them into domain types.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub created_at: String,
}

/// A conversation as seen by one participant.
pub struct ConversationSummaryRow {
    pub conversation: ConversationRow,
    pub last_message: Option<MessageRow>,
    pub unread_count: u32,
}

#[derive(Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub media_type: String,
    pub media_url: Option<String>,
    pub reply_to: Option<String>,
    pub client_ref: Option<String>,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub media_type: &'a str,
    pub media_url: Option<&'a str>,
    pub reply_to: Option<&'a str>,
    pub client_ref: Option<&'a str>,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

pub struct WorkingHoursRow {
    /// 0 = Monday .. 6 = Sunday
    pub weekday: u8,
    pub start_time: String,
    pub end_time: String,
}

pub struct ScheduleRow {
    pub doctor_id: String,
    pub slot_duration_minutes: u32,
    pub working_hours: Vec<WorkingHoursRow>,
}

pub struct UnavailabilityRow {
    pub id: String,
    pub doctor_id: String,
    pub start_at: String,
    pub end_at: String,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct AppointmentRow {
    pub id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: String,
}
