//! # DBQ Persistence
//!
//! SQLite storage for the job queue. Workers in separate processes share a
//! database file; claims stay exclusive through a single conditional
//! `UPDATE ... RETURNING`.

pub mod sqlite;
pub mod store;

pub use sqlite::{connect, SqliteConfig, DEFAULT_DATABASE_URL};
pub use store::SqliteJobStore;
