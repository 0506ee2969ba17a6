//! Database layer for Picklist

mod connection;
mod migrations;
mod store;
mod sync_repository;

pub use connection::Database;
pub use store::SyncStore;
pub use sync_repository::{LibSqlSyncRecordRepository, SyncRecordRepository};
