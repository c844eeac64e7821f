// Storage layer: interfaces, PostgreSQL repositories and the in-process store

pub mod memory;
pub mod pool;
pub mod repositories;
pub mod store;

pub use memory::MemoryStore;
pub use pool::DbPool;
pub use repositories::{PgMenuSnapshotStore, PgPreferenceStore};
pub use store::{MenuSnapshotStore, PreferenceStore};
