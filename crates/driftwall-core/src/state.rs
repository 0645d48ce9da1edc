use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{DriftwallError, DriftwallResult};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Implementation strategy behind a [`crate::StateStore`].
///
/// Both backends honour the same external contract; `Experimental` differs
/// only in how records and events are indexed internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Current,
    Experimental,
}

impl Backend {
    pub fn is_experimental(self) -> bool {
        matches!(self, Self::Experimental)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Experimental => write!(f, "experimental"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "experimental" => Ok(Self::Experimental),
            _ => Err(format!("invalid backend: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity ids
// ---------------------------------------------------------------------------

/// Largest entity number a store will accept; ids must fit an SQLite INTEGER.
pub const MAX_ENTITY_NUM: u64 = i64::MAX as u64;

/// Render the `n`-th allocated entity id.
pub fn format_entity_id(n: u64) -> String {
    format!("e{n}")
}

/// Entity number for a newly seen key: `hint` if given, else `next_id`.
/// Fails once the id space is exhausted.
pub fn claim_entity_num(next_id: u64, hint: Option<u64>) -> DriftwallResult<u64> {
    let n = hint.unwrap_or(next_id);
    if n == 0 || n > MAX_ENTITY_NUM {
        return Err(DriftwallError::Precondition(format!(
            "entity id {} is outside 1..={MAX_ENTITY_NUM}",
            format_entity_id(n)
        )));
    }
    Ok(n)
}

/// Parse an id produced by [`format_entity_id`].
pub fn parse_entity_id(id: &str) -> Option<u64> {
    let digits = id.strip_prefix('e')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// StateRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub entity_id: String,
    pub key: String,
    pub value: Value,
    pub active: bool,
    pub created_seq: u64,
    pub updated_seq: u64,
}

impl StateRecord {
    /// Inactive record for a key seen for the first time.
    pub fn untouched(entity_id: String, key: String, seq: u64) -> Self {
        Self {
            entity_id,
            key,
            value: Value::Null,
            active: false,
            created_seq: seq,
            updated_seq: seq,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Set,
    Clear,
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => write!(f, "set"),
            Self::Clear => write!(f, "clear"),
        }
    }
}

impl std::str::FromStr for EventOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(Self::Set),
            "clear" => Ok(Self::Clear),
            _ => Err(format!("invalid op: {s}")),
        }
    }
}

/// Append-only log entry. `value` is present for `set` (possibly `null`) and
/// absent for `clear`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub op: EventOp,
    pub key: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    pub entity_id: String,
    pub seq: u64,
}

/// Keeps an explicit `"value": null` distinct from a missing field.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Event {
    pub fn set(key: String, value: Value, entity_id: String, seq: u64) -> Self {
        Self {
            op: EventOp::Set,
            key,
            value: Some(value),
            entity_id,
            seq,
        }
    }

    pub fn clear(key: String, entity_id: String, seq: u64) -> Self {
        Self {
            op: EventOp::Clear,
            key,
            value: None,
            entity_id,
            seq,
        }
    }

    /// Numeric id carried by the event, if well-formed and in
    /// `1..=MAX_ENTITY_NUM`.
    pub fn entity_num(&self) -> Option<u64> {
        parse_entity_id(&self.entity_id).filter(|n| (1..=MAX_ENTITY_NUM).contains(n))
    }

    /// Lenient decode of a raw log entry.
    ///
    /// Returns `None` when `op` is missing or unknown, or `key` is not a
    /// string. `entity_id` and `seq` are optional on input.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let op: EventOp = obj.get("op")?.as_str()?.parse().ok()?;
        let key = obj.get("key")?.as_str()?.to_string();
        let entity_id = obj
            .get("entity_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let seq = obj.get("seq").and_then(Value::as_u64).unwrap_or(0);
        let value = match op {
            EventOp::Set => Some(obj.get("value").cloned().unwrap_or(Value::Null)),
            EventOp::Clear => None,
        };
        Some(Self {
            op,
            key,
            value,
            entity_id,
            seq,
        })
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// Batch of mutations: every `set` entry (in mapping order), then every
/// `clear` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patch {
    pub set: Map<String, Value>,
    pub clear: Vec<String>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.clear.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time dump of a store. `active` and `records` follow first-seen
/// order, i.e. entity id allocation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub backend: Backend,
    pub experimental: bool,
    pub next_id: u64,
    pub active: Map<String, Value>,
    pub records: Vec<StateRecord>,
    pub events: Vec<Event>,
}

impl Snapshot {
    pub fn from_parts(
        backend: Backend,
        next_id: u64,
        records: Vec<StateRecord>,
        events: Vec<Event>,
    ) -> Self {
        let active = records
            .iter()
            .filter(|r| r.active)
            .map(|r| (r.key.clone(), r.value.clone()))
            .collect();
        Self {
            backend,
            experimental: backend.is_experimental(),
            next_id,
            active,
            records,
            events,
        }
    }
}
