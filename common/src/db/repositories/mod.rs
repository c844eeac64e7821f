// PostgreSQL implementations of the storage interfaces

pub mod menu;
pub mod preference;
pub mod queries;

pub use menu::PgMenuSnapshotStore;
pub use preference::PgPreferenceStore;
