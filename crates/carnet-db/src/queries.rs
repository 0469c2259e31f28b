use crate::Database;
use crate::models::{
    AppointmentRow, ConversationRow, ConversationSummaryRow, MessageRow, NewMessage, ReactionRow,
    ScheduleRow, UnavailabilityRow, UserRow, WorkingHoursRow,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, email, password, role, first_name, last_name, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, media_type, media_url, \
     reply_to, client_ref, is_read, read_at, created_at";

const APPOINTMENT_COLUMNS: &str =
    "id, doctor_id, patient_id, date, start_time, end_time, reason, status, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, role, first_name, last_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, email, password_hash, role, first_name, last_name),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Care links --

    /// Link a patient to a doctor. Returns false if the link already existed.
    pub fn create_care_link(&self, doctor_id: &str, patient_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO care_links (doctor_id, patient_id) VALUES (?1, ?2)",
                (doctor_id, patient_id),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn is_linked(&self, doctor_id: &str, patient_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM care_links WHERE doctor_id = ?1 AND patient_id = ?2",
                (doctor_id, patient_id),
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Doctors assigned to a patient, or patients followed by a doctor.
    pub fn linked_users(&self, user_id: &str, role: &str) -> Result<Vec<UserRow>> {
        let (own, other) = if role == "doctor" {
            ("doctor_id", "patient_id")
        } else {
            ("patient_id", "doctor_id")
        };
        let sql = format!(
            "SELECT u.id, u.email, u.password, u.role, u.first_name, u.last_name, u.created_at
             FROM care_links l JOIN users u ON u.id = l.{other}
             WHERE l.{own} = ?1
             ORDER BY u.last_name, u.first_name"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    /// Create the conversation between a patient and a doctor, or return the
    /// existing one. The flag is true when a new row was inserted.
    pub fn get_or_create_conversation(
        &self,
        id: &str,
        patient_id: &str,
        doctor_id: &str,
    ) -> Result<(ConversationRow, bool)> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversations (id, patient_id, doctor_id) VALUES (?1, ?2, ?3)",
                (id, patient_id, doctor_id),
            )?;
            let row = conn.query_row(
                "SELECT id, patient_id, doctor_id, created_at FROM conversations
                 WHERE patient_id = ?1 AND doctor_id = ?2",
                (patient_id, doctor_id),
                conversation_from_row,
            )?;
            Ok((row, inserted > 0))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, patient_id, doctor_id, created_at FROM conversations WHERE id = ?1",
                    [id],
                    conversation_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Conversations of `user_id`, most recently active first, with the last
    /// message and the number of messages from the other side not yet read.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.patient_id, c.doctor_id, c.created_at,
                        (SELECT COUNT(*) FROM messages m
                          WHERE m.conversation_id = c.id AND m.sender_id != ?1 AND m.is_read = 0)
                 FROM conversations c
                 WHERE c.patient_id = ?1 OR c.doctor_id = ?1",
            )?;
            let conversations = stmt
                .query_map([user_id], |row| {
                    Ok((conversation_from_row(row)?, row.get::<_, u32>(4)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut last_stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ))?;

            let mut summaries = Vec::with_capacity(conversations.len());
            for (conversation, unread_count) in conversations {
                let last_message = last_stmt
                    .query_row([&conversation.id], message_from_row)
                    .optional()?;
                summaries.push(ConversationSummaryRow {
                    conversation,
                    last_message,
                    unread_count,
                });
            }

            summaries.sort_by(|a, b| activity(b).cmp(activity(a)));
            Ok(summaries)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender_id, content, media_type, media_url, reply_to, client_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.id,
                    msg.conversation_id,
                    msg.sender_id,
                    msg.content,
                    msg.media_type,
                    msg.media_url,
                    msg.reply_to,
                    msg.client_ref,
                ],
            )?;
            let row = query_message(conn, msg.id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished after insert", msg.id))?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// A page of history, oldest first. `before` is the `created_at` of the
    /// oldest message already shown.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            ))?;
            let mut rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, before, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Mark every unread message the other participant sent as read.
    /// Returns the ids that changed, oldest first.
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        read_at: &str,
    ) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0
                     ORDER BY created_at, rowid",
                )?;
                let ids = stmt
                    .query_map((conversation_id, reader_id), |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            };
            tx.execute(
                "UPDATE messages SET is_read = 1, read_at = ?3
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
                (conversation_id, reader_id, read_at),
            )?;
            tx.commit()?;
            Ok(ids)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if exists, inserts if not.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                (message_id, user_id, emoji),
            )?;
            if removed > 0 {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                (message_id, user_id, emoji),
            )?;
            Ok(true)
        })
    }

    pub fn get_reactions(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.get_reactions_for_messages(&[message_id.to_string()])
    }

    /// Batch-fetch reactions for a set of message IDs, in insertion order.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at, rowid",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Schedules --

    pub fn get_schedule(&self, doctor_id: &str) -> Result<Option<ScheduleRow>> {
        self.with_conn(|conn| {
            let duration: Option<u32> = conn
                .query_row(
                    "SELECT slot_duration_minutes FROM doctor_schedules WHERE doctor_id = ?1",
                    [doctor_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(slot_duration_minutes) = duration else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT weekday, start_time, end_time FROM working_hours
                 WHERE doctor_id = ?1 ORDER BY weekday, start_time",
            )?;
            let working_hours = stmt
                .query_map([doctor_id], |row| {
                    Ok(WorkingHoursRow {
                        weekday: row.get(0)?,
                        start_time: row.get(1)?,
                        end_time: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(ScheduleRow {
                doctor_id: doctor_id.to_string(),
                slot_duration_minutes,
                working_hours,
            }))
        })
    }

    /// Replace a doctor's weekly hours and slot duration in one transaction.
    pub fn replace_schedule(
        &self,
        doctor_id: &str,
        slot_duration_minutes: u32,
        working_hours: &[WorkingHoursRow],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO doctor_schedules (doctor_id, slot_duration_minutes) VALUES (?1, ?2)
                 ON CONFLICT(doctor_id) DO UPDATE SET slot_duration_minutes = excluded.slot_duration_minutes",
                (doctor_id, slot_duration_minutes),
            )?;
            tx.execute("DELETE FROM working_hours WHERE doctor_id = ?1", [doctor_id])?;
            for hours in working_hours {
                tx.execute(
                    "INSERT INTO working_hours (doctor_id, weekday, start_time, end_time)
                     VALUES (?1, ?2, ?3, ?4)",
                    (doctor_id, hours.weekday, &hours.start_time, &hours.end_time),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn add_unavailability(&self, row: &UnavailabilityRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO unavailability (id, doctor_id, start_at, end_at, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (&row.id, &row.doctor_id, &row.start_at, &row.end_at, &row.reason),
            )?;
            Ok(())
        })
    }

    /// Windows of `doctor_id` intersecting `[from, to)`.
    pub fn unavailability_between(
        &self,
        doctor_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<UnavailabilityRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, doctor_id, start_at, end_at, reason FROM unavailability
                 WHERE doctor_id = ?1 AND start_at < ?3 AND end_at > ?2
                 ORDER BY start_at",
            )?;
            let rows = stmt
                .query_map((doctor_id, from, to), |row| {
                    Ok(UnavailabilityRow {
                        id: row.get(0)?,
                        doctor_id: row.get(1)?,
                        start_at: row.get(2)?,
                        end_at: row.get(3)?,
                        reason: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Appointments --

    pub fn confirmed_appointments_on(&self, doctor_id: &str, date: &str) -> Result<Vec<AppointmentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE doctor_id = ?1 AND date = ?2 AND status = 'confirmed'
                 ORDER BY start_time"
            ))?;
            let rows = stmt
                .query_map((doctor_id, date), appointment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert a confirmed appointment unless it overlaps another confirmed
    /// appointment of the same doctor. The check and the insert run under the
    /// writer lock, so two concurrent bookings cannot both succeed.
    pub fn book_appointment(&self, row: &AppointmentRow) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let overlapping: i64 = tx.query_row(
                "SELECT COUNT(*) FROM appointments
                 WHERE doctor_id = ?1 AND date = ?2 AND status = 'confirmed'
                   AND start_time <= ?4 AND end_time >= ?3",
                (&row.doctor_id, &row.date, &row.start_time, &row.end_time),
                |r| r.get(0),
            )?;
            if overlapping > 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO appointments
                    (id, doctor_id, patient_id, date, start_time, end_time, reason, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'confirmed', ?8)",
                rusqlite::params![
                    row.id,
                    row.doctor_id,
                    row.patient_id,
                    row.date,
                    row.start_time,
                    row.end_time,
                    row.reason,
                    row.created_at,
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_appointment(&self, id: &str) -> Result<Option<AppointmentRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                    [id],
                    appointment_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Appointments where `user_id` is the doctor or the patient.
    pub fn list_appointments(&self, user_id: &str) -> Result<Vec<AppointmentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE doctor_id = ?1 OR patient_id = ?1
                 ORDER BY date, start_time"
            ))?;
            let rows = stmt
                .query_map([user_id], appointment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if the appointment was already cancelled or missing.
    pub fn cancel_appointment(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE appointments SET status = 'cancelled' WHERE id = ?1 AND status = 'confirmed'",
                [id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn activity(summary: &ConversationSummaryRow) -> &str {
    summary
        .last_message
        .as_ref()
        .map(|m| m.created_at.as_str())
        .unwrap_or(summary.conversation.created_at.as_str())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"
    ))?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            message_from_row,
        )
        .optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        role: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        media_type: row.get(4)?,
        media_url: row.get(5)?,
        reply_to: row.get(6)?,
        client_ref: row.get(7)?,
        is_read: row.get(8)?,
        read_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        doctor_id: row.get(1)?,
        patient_id: row.get(2)?,
        date: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        reason: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("carnet.db")).unwrap();
        (dir, db)
    }

    fn seed_pair(db: &Database) {
        db.create_user("p1", "pat@example.org", "hash", "patient", "Alice", "Martin")
            .unwrap();
        db.create_user("d1", "doc@example.org", "hash", "doctor", "Jean", "Dupont")
            .unwrap();
    }

    fn message<'a>(id: &'a str, conv: &'a str, sender: &'a str, content: &'a str) -> NewMessage<'a> {
        NewMessage {
            id,
            conversation_id: conv,
            sender_id: sender,
            content,
            media_type: "none",
            media_url: None,
            reply_to: None,
            client_ref: None,
        }
    }

    #[test]
    fn users_round_trip_by_email_and_id() {
        let (_dir, db) = open();
        seed_pair(&db);
        let user = db.get_user_by_email("pat@example.org").unwrap().unwrap();
        assert_eq!(user.id, "p1");
        assert_eq!(user.role, "patient");
        assert!(db.get_user_by_id("d1").unwrap().is_some());
        assert!(db.get_user_by_email("nobody@example.org").unwrap().is_none());
        assert!(db.create_user("p2", "pat@example.org", "h", "patient", "A", "B").is_err());
    }

    #[test]
    fn care_links_are_idempotent() {
        let (_dir, db) = open();
        seed_pair(&db);
        assert!(db.create_care_link("d1", "p1").unwrap());
        assert!(!db.create_care_link("d1", "p1").unwrap());
        assert!(db.is_linked("d1", "p1").unwrap());
        let doctors = db.linked_users("p1", "patient").unwrap();
        assert_eq!(doctors.len(), 1);
        assert_eq!(doctors[0].id, "d1");
        let patients = db.linked_users("d1", "doctor").unwrap();
        assert_eq!(patients[0].id, "p1");
    }

    #[test]
    fn conversation_creation_returns_existing_row() {
        let (_dir, db) = open();
        seed_pair(&db);
        let (first, created) = db.get_or_create_conversation("c1", "p1", "d1").unwrap();
        assert!(created);
        let (second, created) = db.get_or_create_conversation("c2", "p1", "d1").unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn unread_counts_and_mark_read() {
        let (_dir, db) = open();
        seed_pair(&db);
        db.get_or_create_conversation("c1", "p1", "d1").unwrap();
        db.insert_message(&message("m1", "c1", "d1", "Bonjour")).unwrap();
        db.insert_message(&message("m2", "c1", "d1", "Vos résultats sont prêts")).unwrap();
        db.insert_message(&message("m3", "c1", "p1", "Merci")).unwrap();

        let summaries = db.list_conversations("p1").unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].unread_count, 2);
        assert_eq!(summaries[0].last_message.as_ref().unwrap().id, "m3");

        let doctor_view = db.list_conversations("d1").unwrap();
        assert_eq!(doctor_view[0].unread_count, 1);

        let read = db
            .mark_conversation_read("c1", "p1", "2030-01-01T10:00:00.000Z")
            .unwrap();
        assert_eq!(read, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(db.list_conversations("p1").unwrap()[0].unread_count, 0);
        assert!(db.mark_conversation_read("c1", "p1", "later").unwrap().is_empty());

        let m1 = db.get_message("m1").unwrap().unwrap();
        assert!(m1.is_read);
        assert_eq!(m1.read_at.as_deref(), Some("2030-01-01T10:00:00.000Z"));
    }

    #[test]
    fn message_pages_are_oldest_first() {
        let (_dir, db) = open();
        seed_pair(&db);
        db.get_or_create_conversation("c1", "p1", "d1").unwrap();
        for i in 0..5 {
            let id = format!("m{}", i);
            db.insert_message(&message(&id, "c1", "p1", "x")).unwrap();
        }
        let page = db.get_messages("c1", 3, None).unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn reaction_toggle_adds_and_removes() {
        let (_dir, db) = open();
        seed_pair(&db);
        db.get_or_create_conversation("c1", "p1", "d1").unwrap();
        db.insert_message(&message("m1", "c1", "d1", "Bonjour")).unwrap();

        assert!(db.toggle_reaction("m1", "p1", "👍").unwrap());
        assert!(db.toggle_reaction("m1", "d1", "👍").unwrap());
        assert!(db.toggle_reaction("m1", "p1", "❤️").unwrap());
        assert_eq!(db.get_reactions("m1").unwrap().len(), 3);

        assert!(!db.toggle_reaction("m1", "p1", "👍").unwrap());
        let left: Vec<_> = db
            .get_reactions("m1")
            .unwrap()
            .into_iter()
            .map(|r| (r.user_id, r.emoji))
            .collect();
        assert_eq!(
            left,
            vec![("d1".to_string(), "👍".to_string()), ("p1".to_string(), "❤️".to_string())]
        );
    }

    #[test]
    fn schedule_replace_and_unavailability() {
        let (_dir, db) = open();
        seed_pair(&db);
        assert!(db.get_schedule("d1").unwrap().is_none());

        let hours = vec![WorkingHoursRow {
            weekday: 0,
            start_time: "09:00".into(),
            end_time: "12:00".into(),
        }];
        db.replace_schedule("d1", 30, &hours).unwrap();
        db.replace_schedule("d1", 20, &hours).unwrap();
        let schedule = db.get_schedule("d1").unwrap().unwrap();
        assert_eq!(schedule.slot_duration_minutes, 20);
        assert_eq!(schedule.working_hours.len(), 1);

        db.add_unavailability(&UnavailabilityRow {
            id: "u1".into(),
            doctor_id: "d1".into(),
            start_at: "2030-01-07T10:00:00".into(),
            end_at: "2030-01-07T11:00:00".into(),
            reason: None,
        })
        .unwrap();
        assert_eq!(
            db.unavailability_between("d1", "2030-01-07T00:00:00", "2030-01-08T00:00:00")
                .unwrap()
                .len(),
            1
        );
        assert!(db
            .unavailability_between("d1", "2030-01-08T00:00:00", "2030-01-09T00:00:00")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn overlapping_booking_is_refused() {
        let (_dir, db) = open();
        seed_pair(&db);
        let booking = |id: &str, start: &str, end: &str| AppointmentRow {
            id: id.into(),
            doctor_id: "d1".into(),
            patient_id: "p1".into(),
            date: "2030-01-07".into(),
            start_time: start.into(),
            end_time: end.into(),
            reason: None,
            status: "confirmed".into(),
            created_at: "2030-01-01T00:00:00.000Z".into(),
        };

        assert!(db.book_appointment(&booking("a1", "09:00", "09:29")).unwrap());
        assert!(!db.book_appointment(&booking("a2", "09:00", "09:29")).unwrap());
        assert!(db.book_appointment(&booking("a3", "09:30", "09:59")).unwrap());
        assert_eq!(db.confirmed_appointments_on("d1", "2030-01-07").unwrap().len(), 2);

        assert!(db.cancel_appointment("a1").unwrap());
        assert!(!db.cancel_appointment("a1").unwrap());
        assert!(db.book_appointment(&booking("a4", "09:00", "09:29")).unwrap());
        assert_eq!(db.list_appointments("p1").unwrap().len(), 3);
    }
}
