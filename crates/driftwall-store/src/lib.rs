pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

use driftwall_core::{Backend, DriftwallResult, StateStore};

/// Construct an empty store for the configured backend.
pub fn open_store(backend: Backend) -> DriftwallResult<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match backend {
        Backend::Current => Box::new(MemoryStateStore::new()),
        Backend::Experimental => Box::new(SqliteStateStore::in_memory()?),
    };
    tracing::debug!(%backend, "opened state store");
    Ok(store)
}
