use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, care links, messaging)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('patient', 'doctor')),
                first_name  TEXT NOT NULL,
                last_name   TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE care_links (
                doctor_id   TEXT NOT NULL REFERENCES users(id),
                patient_id  TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (doctor_id, patient_id)
            );

            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                patient_id  TEXT NOT NULL REFERENCES users(id),
                doctor_id   TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(patient_id, doctor_id)
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                media_type      TEXT NOT NULL DEFAULT 'none',
                media_url       TEXT,
                reply_to        TEXT REFERENCES messages(id),
                client_ref      TEXT,
                is_read         INTEGER NOT NULL DEFAULT 0,
                read_at         TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE reactions (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (message_id, user_id, emoji)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (schedules, appointments)");
        conn.execute_batch(
            "
            CREATE TABLE doctor_schedules (
                doctor_id               TEXT PRIMARY KEY REFERENCES users(id),
                slot_duration_minutes   INTEGER NOT NULL DEFAULT 30
            );

            CREATE TABLE working_hours (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                doctor_id   TEXT NOT NULL REFERENCES users(id),
                weekday     INTEGER NOT NULL CHECK (weekday BETWEEN 0 AND 6),
                start_time  TEXT NOT NULL,
                end_time    TEXT NOT NULL
            );

            CREATE INDEX idx_working_hours_doctor ON working_hours(doctor_id);

            CREATE TABLE unavailability (
                id          TEXT PRIMARY KEY,
                doctor_id   TEXT NOT NULL REFERENCES users(id),
                start_at    TEXT NOT NULL,
                end_at      TEXT NOT NULL,
                reason      TEXT
            );

            CREATE INDEX idx_unavailability_doctor ON unavailability(doctor_id, start_at);

            CREATE TABLE appointments (
                id          TEXT PRIMARY KEY,
                doctor_id   TEXT NOT NULL REFERENCES users(id),
                patient_id  TEXT NOT NULL REFERENCES users(id),
                date        TEXT NOT NULL,
                start_time  TEXT NOT NULL,
                end_time    TEXT NOT NULL,
                reason      TEXT,
                status      TEXT NOT NULL DEFAULT 'confirmed',
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_appointments_doctor_date ON appointments(doctor_id, date);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
