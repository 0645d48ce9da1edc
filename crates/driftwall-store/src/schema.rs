use rusqlite::Connection;

use driftwall_core::DriftwallError;

pub fn init_db(conn: &Connection) -> Result<(), DriftwallError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS state_records (
            key TEXT PRIMARY KEY,
            entity_num INTEGER NOT NULL UNIQUE,
            value TEXT NOT NULL, -- JSON
            active INTEGER NOT NULL DEFAULT 0,
            created_seq INTEGER NOT NULL,
            updated_seq INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_state_records_active
            ON state_records(active, entity_num);

        CREATE TABLE IF NOT EXISTS state_events (
            seq INTEGER PRIMARY KEY,
            op TEXT NOT NULL CHECK(op IN ('set', 'clear')),
            key TEXT NOT NULL,
            value TEXT, -- JSON, NULL for clear
            entity_id TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| DriftwallError::Database(e.to_string()))
}

/// Drop all rows, keeping the schema.
pub fn truncate(conn: &Connection) -> Result<(), DriftwallError> {
    conn.execute_batch("DELETE FROM state_records; DELETE FROM state_events;")
        .map_err(|e| DriftwallError::Database(e.to_string()))
}
