pub mod cursor;
pub mod engine;
pub mod keycode;
pub mod legacy;
pub mod records;
pub mod schema;
pub mod sqlite;
pub mod upgrade;

pub use engine::{ObjectStore, Txn};
pub use legacy::{LegacyMigration, MigrationDescriptor};
pub use sqlite::Database;
