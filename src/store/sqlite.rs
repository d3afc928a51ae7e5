//! SQLite Record Store
//!
//! One SQLite database per node, one table per shard.

use std::path::Path;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use std::sync::Arc;

use super::{validate_table_name, RecordStore, StoreFactory};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::types::{Record, RecordId, Row};

/// Store factory opening `node_{id}.db` under the data directory, or an
/// in-memory database when none is configured
pub fn sqlite_store_factory(storage: StorageConfig) -> StoreFactory {
    Arc::new(move |node_id| {
        let store = match storage.node_db_path(node_id) {
            Some(path) => SqliteStore::open(&path)?,
            None => SqliteStore::open_in_memory()?,
        };
        Ok(Arc::new(store) as Arc<dyn RecordStore>)
    })
}

/// Record store backed by SQLite
pub struct SqliteStore {
    /// Database connection
    conn: Mutex<Connection>,
    /// Where the database lives, for logging
    location: String,
}

impl SqliteStore {
    /// Create or open a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening SQLite record store at {}", path.display());
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    /// Create a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        Ok(Self {
            conn: Mutex::new(conn),
            location: ":memory:".to_string(),
        })
    }

    /// Where this store keeps its data
    pub fn location(&self) -> &str {
        &self.location
    }

    /// List user tables in name order
    fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteStore {
    async fn create_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;

        let conn = self.conn.lock().await;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#
        ))?;

        tracing::debug!("Ensured table '{}' in {}", table, self.location);
        Ok(())
    }

    async fn insert_record(&self, table: &str, record_id: RecordId, record: &Record) -> Result<()> {
        validate_table_name(table)?;
        let stored_id = i64::try_from(record_id)
            .map_err(|_| Error::Internal(format!("record id {} does not fit in a SQLite integer", record_id)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT INTO {table} (record_id, name, email, data) VALUES (?1, ?2, ?3, ?4)"),
            params![stored_id, record.name, record.email, record.data],
        )?;

        tracing::debug!(
            "Inserted record {} into '{}' table: {}, {}, {}",
            record_id,
            table,
            record.name,
            record.email,
            record.data
        );
        Ok(())
    }

    async fn query_all_records(&self) -> Result<Vec<Row>> {
        let conn = self.conn.lock().await;
        let mut rows = Vec::new();

        for table in Self::table_names(&conn)? {
            let mut stmt = conn.prepare(&format!(
                "SELECT record_id, name, email, data FROM {table} ORDER BY id"
            ))?;
            let table_rows = stmt
                .query_map([], |row| {
                    let raw: i64 = row.get(0)?;
                    let record_id = RecordId::try_from(raw)
                        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, raw))?;
                    Ok(Row {
                        table: table.clone(),
                        record_id,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        data: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.extend(table_rows);
        }

        tracing::debug!("Queried {} records from {}", rows.len(), self.location);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_insert_and_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table("shard_0").await.unwrap();
        store.create_table("shard_1").await.unwrap();

        store
            .insert_record("shard_0", 1, &Record::new("Name1", "email1@example.com", "Sample data 1"))
            .await
            .unwrap();
        store
            .insert_record("shard_1", 12, &Record::new("Name12", "email12@example.com", "Sample data 12"))
            .await
            .unwrap();

        let rows = store.query_all_records().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].table, "shard_0");
        assert_eq!(rows[0].record_id, 1);
        assert_eq!(rows[1].table, "shard_1");
        assert_eq!(rows[1].record().name, "Name12");
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table("shard_3").await.unwrap();
        store.create_table("shard_3").await.unwrap();

        assert!(store.query_all_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.create_table("shard-1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTableName(_)));
    }

    #[tokio::test]
    async fn test_insert_into_missing_table_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .insert_record("shard_9", 90, &Record::new("a", "b", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes").join("node_1.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_table("shard_0").await.unwrap();
            store
                .insert_record("shard_0", 5, &Record::new("n", "e", "d"))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let rows = reopened.query_all_records().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_id, 5);
    }

    #[tokio::test]
    async fn test_rejects_record_id_beyond_sqlite_range() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table("shard_0").await.unwrap();

        let err = store
            .insert_record("shard_0", u64::MAX, &Record::new("a", "b", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        store
            .insert_record("shard_0", i64::MAX as RecordId, &Record::new("a", "b", "c"))
            .await
            .unwrap();
        let rows = store.query_all_records().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_id, i64::MAX as RecordId);
    }

    #[tokio::test]
    async fn test_factory_opens_per_node_files() {
        let dir = tempdir().unwrap();
        let storage = StorageConfig {
            data_dir: Some(dir.path().to_path_buf()),
        };

        let factory = sqlite_store_factory(storage);
        let store = factory(3).unwrap();
        store.create_table("shard_0").await.unwrap();

        assert!(dir.path().join("node_3.db").exists());
        assert!(sqlite_store_factory(StorageConfig::default())(1).is_ok());
    }
}
