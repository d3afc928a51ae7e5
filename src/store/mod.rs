//! Record Store Module
//!
//! Durable storage for shard records. Each consensus node owns one
//! store and mirrors committed log entries into it.

mod sqlite;

pub use sqlite::{sqlite_store_factory, SqliteStore};

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{NodeId, Record, RecordId, Row};

/// Opens the record store of a node
pub type StoreFactory = Arc<dyn Fn(NodeId) -> Result<Arc<dyn RecordStore>> + Send + Sync>;

/// Storage backend for a node's shard tables
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a table if it does not exist yet
    async fn create_table(&self, table: &str) -> Result<()>;

    /// Insert a record into a table
    async fn insert_record(&self, table: &str, record_id: RecordId, record: &Record) -> Result<()>;

    /// Scan every row of every table
    async fn query_all_records(&self) -> Result<Vec<Row>>;
}

/// Check that a table name is a plain SQL identifier
///
/// Table names are interpolated into statements, so only ASCII
/// letters, digits and underscores are accepted.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid && !table.starts_with("sqlite_") {
        Ok(())
    } else {
        Err(Error::InvalidTableName(table.to_string()))
    }
}
