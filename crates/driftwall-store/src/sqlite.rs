use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use driftwall_core::state::{claim_entity_num, format_entity_id};
use driftwall_core::{
    Backend, DriftwallError, DriftwallResult, Event, EventOp, Snapshot, StateRecord, StateStore,
};

use crate::schema::{init_db, truncate};

/// Experimental backend: records and the event log live in SQLite tables and
/// ordering queries go through indexes instead of an in-process vector.
pub struct SqliteStateStore {
    conn: Connection,
    counters: Counters,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    seq: u64,
    next_id: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Self { seq: 0, next_id: 1 }
    }
}

impl SqliteStateStore {
    pub fn in_memory() -> DriftwallResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DriftwallError::Database(format!("cannot open in-memory db: {e}")))?;
        init_db(&conn)?;
        Ok(Self {
            conn,
            counters: Counters::default(),
        })
    }

    fn query_records(&self, active_only: bool) -> DriftwallResult<Vec<StateRecord>> {
        let filter = if active_only { "WHERE active = 1" } else { "" };
        let sql = format!("SELECT {RECORD_COLS} FROM state_records {filter} ORDER BY entity_num");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| DriftwallError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], read_record_row)
            .map_err(|e| DriftwallError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| DriftwallError::Database(e.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

const RECORD_COLS: &str = "key, entity_num, value, active, created_seq, updated_seq";

struct RawRecord {
    key: String,
    entity_num: i64,
    value: String,
    active: bool,
    created_seq: i64,
    updated_seq: i64,
}

impl RawRecord {
    fn into_record(self) -> DriftwallResult<StateRecord> {
        Ok(StateRecord {
            entity_id: format_entity_id(self.entity_num as u64),
            key: self.key,
            value: serde_json::from_str(&self.value)?,
            active: self.active,
            created_seq: self.created_seq as u64,
            updated_seq: self.updated_seq as u64,
        })
    }
}

fn read_record_row(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        key: row.get(0)?,
        entity_num: row.get(1)?,
        value: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        created_seq: row.get(4)?,
        updated_seq: row.get(5)?,
    })
}

fn entity_taken(conn: &Connection, n: u64) -> DriftwallResult<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM state_records WHERE entity_num = ?1",
        params![n as i64],
        |row| row.get(0),
    )
    .map_err(|e| DriftwallError::Database(e.to_string()))
}

/// Entity number for `key`, inserting an inactive record stamped with `seq`
/// if the key is new. `id_hint` is only used for a new key and must not be
/// taken.
fn touch(
    conn: &Connection,
    counters: &mut Counters,
    key: &str,
    id_hint: Option<u64>,
    seq: u64,
) -> DriftwallResult<u64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT entity_num FROM state_records WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| DriftwallError::Database(e.to_string()))?;
    if let Some(n) = existing {
        return Ok(n as u64);
    }

    let n = claim_entity_num(counters.next_id, id_hint)?;
    conn.execute(
        "INSERT INTO state_records (key, entity_num, value, active, created_seq, updated_seq)
         VALUES (?1, ?2, 'null', 0, ?3, ?3)",
        params![key, n as i64, seq as i64],
    )
    .map_err(|e| DriftwallError::Database(e.to_string()))?;
    counters.next_id = counters.next_id.max(n + 1);
    Ok(n)
}

fn mutate(
    conn: &Connection,
    counters: &mut Counters,
    op: EventOp,
    key: &str,
    value: &Value,
    id_hint: Option<u64>,
) -> DriftwallResult<String> {
    let next_seq = counters.seq + 1;
    let entity_id = format_entity_id(touch(conn, counters, key, id_hint, next_seq)?);
    let seq = next_seq as i64;

    let (stored, logged, active) = match op {
        EventOp::Set => {
            let json = serde_json::to_string(value)?;
            (json.clone(), Some(json), true)
        }
        EventOp::Clear => ("null".to_string(), None, false),
    };

    conn.execute(
        "UPDATE state_records SET value = ?2, active = ?3, updated_seq = ?4 WHERE key = ?1",
        params![key, stored, i64::from(active), seq],
    )
    .map_err(|e| DriftwallError::Database(e.to_string()))?;
    conn.execute(
        "INSERT INTO state_events (seq, op, key, value, entity_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![seq, op.to_string(), key, logged, entity_id],
    )
    .map_err(|e| DriftwallError::Database(e.to_string()))?;

    counters.seq = next_seq;
    Ok(entity_id)
}

// ---------------------------------------------------------------------------
// StateStore impl
// ---------------------------------------------------------------------------

impl StateStore for SqliteStateStore {
    fn backend(&self) -> Backend {
        Backend::Experimental
    }

    fn get(&mut self, key: &str) -> DriftwallResult<Option<Value>> {
        let seq = self.counters.seq;
        touch(&self.conn, &mut self.counters, key, None, seq)?;
        let (active, value): (i64, String) = self
            .conn
            .query_row(
                "SELECT active, value FROM state_records WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| DriftwallError::Database(e.to_string()))?;
        if active == 0 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&value)?))
    }

    fn list_active(&self) -> DriftwallResult<Vec<StateRecord>> {
        self.query_records(true)
    }

    fn snapshot(&self) -> DriftwallResult<Snapshot> {
        Ok(Snapshot::from_parts(
            self.backend(),
            self.counters.next_id,
            self.query_records(false)?,
            self.events()?,
        ))
    }

    fn events(&self) -> DriftwallResult<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, op, key, value, entity_id FROM state_events ORDER BY seq")
            .map_err(|e| DriftwallError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| DriftwallError::Database(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, op, key, value, entity_id) =
                row.map_err(|e| DriftwallError::Database(e.to_string()))?;
            let op: EventOp = op.parse().map_err(DriftwallError::Database)?;
            let value = match value {
                Some(json) => Some(serde_json::from_str(&json)?),
                None => None,
            };
            events.push(Event {
                op,
                key,
                value,
                entity_id,
                seq: seq as u64,
            });
        }
        Ok(events)
    }

    fn set(&mut self, key: &str, value: Value) -> DriftwallResult<String> {
        mutate(&self.conn, &mut self.counters, EventOp::Set, key, &value, None)
    }

    fn clear(&mut self, key: &str) -> DriftwallResult<String> {
        mutate(
            &self.conn,
            &mut self.counters,
            EventOp::Clear,
            key,
            &Value::Null,
            None,
        )
    }

    fn replay(&mut self, events: &[Event]) -> DriftwallResult<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| DriftwallError::Database(e.to_string()))?;
        truncate(&self.conn)?;

        // Counters only take effect once the rebuilt tables are committed.
        let mut counters = Counters::default();
        for event in events {
            let hint = match event.entity_num() {
                Some(n) if entity_taken(&self.conn, n)? => None,
                other => other,
            };
            let value = event.value.clone().unwrap_or(Value::Null);
            mutate(&self.conn, &mut counters, event.op, &event.key, &value, hint)?;
        }

        tx.commit()
            .map_err(|e| DriftwallError::Database(e.to_string()))?;
        self.counters = counters;
        Ok(())
    }
}
