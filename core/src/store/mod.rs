mod backup;
mod connection;
mod migrations;
mod recovery;
mod sqlite_store;
pub mod traits;

pub use backup::{calculate_next_backup, BackupManager};
pub use connection::Database;
pub use recovery::{recover, RecoveryOutcome};
pub use sqlite_store::SqliteControlStore;
pub use traits::ControlStore;
