use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::DriftwallResult;
use crate::state::{Backend, Event, Patch, Snapshot, StateRecord};

/// Event-sourced key-value store with stable per-key entity ids.
///
/// Single owner: mutating calls take `&mut self` and a store must not be
/// shared across threads without an external lock.
pub trait StateStore {
    fn backend(&self) -> Backend;

    // Reads

    /// Current value if `key` is active. An unseen key gets an inactive
    /// record and an entity id; no event is logged and seq does not move.
    fn get(&mut self, key: &str) -> DriftwallResult<Option<Value>>;
    fn list_active(&self) -> DriftwallResult<Vec<StateRecord>>;
    fn snapshot(&self) -> DriftwallResult<Snapshot>;
    fn events(&self) -> DriftwallResult<Vec<Event>>;

    // Mutations
    fn set(&mut self, key: &str, value: Value) -> DriftwallResult<String>;
    fn clear(&mut self, key: &str) -> DriftwallResult<String>;

    /// Reset to empty, then re-apply `events` in order.
    fn replay(&mut self, events: &[Event]) -> DriftwallResult<()>;

    fn is_experimental(&self) -> bool {
        self.backend().is_experimental()
    }

    /// Apply every `set` entry, then every `clear` entry. Returns the touched
    /// entity ids in application order.
    fn apply_patch(&mut self, patch: &Patch) -> DriftwallResult<Vec<String>> {
        let mut touched = Vec::with_capacity(patch.set.len() + patch.clear.len());
        for (key, value) in &patch.set {
            touched.push(self.set(key, value.clone())?);
        }
        for key in &patch.clear {
            touched.push(self.clear(key)?);
        }
        Ok(touched)
    }

    /// Replay a raw log, skipping entries that cannot be decoded.
    /// Returns the number of skipped entries.
    fn replay_raw(&mut self, raw: &[Value]) -> DriftwallResult<usize> {
        let mut events = Vec::with_capacity(raw.len());
        let mut skipped = 0;
        for (idx, entry) in raw.iter().enumerate() {
            match Event::from_value(entry) {
                Some(ev) => events.push(ev),
                None => {
                    tracing::debug!("skipping malformed replay entry at index {idx}");
                    skipped += 1;
                }
            }
        }
        self.replay(&events)?;
        Ok(skipped)
    }

    /// Key to entity id for every record the store knows about.
    fn entity_ids(&self) -> DriftwallResult<BTreeMap<String, String>> {
        Ok(self
            .snapshot()?
            .records
            .into_iter()
            .map(|r| (r.key, r.entity_id))
            .collect())
    }
}
