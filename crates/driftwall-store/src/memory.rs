use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use driftwall_core::state::{claim_entity_num, format_entity_id};
use driftwall_core::{
    Backend, DriftwallResult, Event, EventOp, Snapshot, StateRecord, StateStore,
};

/// Default backend: records keyed by entity number (which is first-seen
/// order) plus a key index.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    seq: u64,
    next_id: u64,
    index: HashMap<String, u64>,
    records: BTreeMap<u64, StateRecord>,
    log: Vec<Event>,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            seq: 0,
            next_id: 1,
            index: HashMap::new(),
            records: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    /// Record for `key`, creating an inactive one stamped with `seq` if
    /// needed. `id_hint` is only used for a new key and must not be taken.
    fn touch(
        &mut self,
        key: &str,
        id_hint: Option<u64>,
        seq: u64,
    ) -> DriftwallResult<&mut StateRecord> {
        let n = match self.index.get(key) {
            Some(&n) => n,
            None => {
                let n = claim_entity_num(self.next_id, id_hint)?;
                self.next_id = self.next_id.max(n + 1);
                self.index.insert(key.to_string(), n);
                n
            }
        };
        Ok(self
            .records
            .entry(n)
            .or_insert_with(|| StateRecord::untouched(format_entity_id(n), key.to_string(), seq)))
    }

    fn mutate(
        &mut self,
        op: EventOp,
        key: &str,
        value: Value,
        id_hint: Option<u64>,
    ) -> DriftwallResult<String> {
        let seq = self.seq + 1;
        let record = self.touch(key, id_hint, seq)?;
        record.updated_seq = seq;
        let event = match op {
            EventOp::Set => {
                record.value = value.clone();
                record.active = true;
                Event::set(key.to_string(), value, record.entity_id.clone(), seq)
            }
            EventOp::Clear => {
                record.value = Value::Null;
                record.active = false;
                Event::clear(key.to_string(), record.entity_id.clone(), seq)
            }
        };
        let entity_id = event.entity_id.clone();
        self.seq = seq;
        self.log.push(event);
        Ok(entity_id)
    }
}

impl StateStore for MemoryStateStore {
    fn backend(&self) -> Backend {
        Backend::Current
    }

    fn get(&mut self, key: &str) -> DriftwallResult<Option<Value>> {
        let seq = self.seq;
        let record = self.touch(key, None, seq)?;
        Ok(record.active.then(|| record.value.clone()))
    }

    fn list_active(&self) -> DriftwallResult<Vec<StateRecord>> {
        Ok(self.records.values().filter(|r| r.active).cloned().collect())
    }

    fn snapshot(&self) -> DriftwallResult<Snapshot> {
        Ok(Snapshot::from_parts(
            self.backend(),
            self.next_id,
            self.records.values().cloned().collect(),
            self.log.clone(),
        ))
    }

    fn events(&self) -> DriftwallResult<Vec<Event>> {
        Ok(self.log.clone())
    }

    fn set(&mut self, key: &str, value: Value) -> DriftwallResult<String> {
        self.mutate(EventOp::Set, key, value, None)
    }

    fn clear(&mut self, key: &str) -> DriftwallResult<String> {
        self.mutate(EventOp::Clear, key, Value::Null, None)
    }

    fn replay(&mut self, events: &[Event]) -> DriftwallResult<()> {
        // Swapped in only once every event has applied.
        let mut fresh = Self::new();
        for event in events {
            let hint = event
                .entity_num()
                .filter(|n| !fresh.records.contains_key(n));
            let value = event.value.clone().unwrap_or(Value::Null);
            fresh.mutate(event.op, &event.key, value, hint)?;
        }
        *self = fresh;
        Ok(())
    }
}
