// src/db/mod.rs

//! Header store
//!
//! Persistent home for package headers, keyed by a 32-bit instance id.
//! Elements that refer to an installed package carry the instance of its
//! header row; fetching by instance returns at most one header, or None
//! when the row no longer exists.

use crate::error::{Error, Result};
use crate::header::Header;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

/// Database contract the transaction engine depends on.
pub trait HeaderStore {
    /// At most one header per instance; None when the row is gone.
    fn fetch(&self, instance: u32) -> Result<Option<Header>>;
}

/// SQLite-backed header store.
pub struct SqliteHeaderStore {
    conn: Connection,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS headers (
        instance    INTEGER PRIMARY KEY AUTOINCREMENT,
        nevra       TEXT NOT NULL,
        blob        TEXT NOT NULL,
        sha256      TEXT NOT NULL,
        imported_at TEXT DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_headers_nevra ON headers(nevra);
";

impl SqliteHeaderStore {
    /// Initialize a store at the specified path.
    ///
    /// Creates the database file and schema. This is idempotent - calling
    /// it on an existing database is safe.
    pub fn init(db_path: &str) -> Result<Self> {
        debug!("Initializing header store at: {}", db_path);

        // Create parent directories if they don't exist
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // Set pragmas for better performance and reliability
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        info!("Header store initialized successfully");
        Ok(Self { conn })
    }

    /// Open an existing store.
    pub fn open(db_path: &str) -> Result<Self> {
        if !Path::new(db_path).exists() {
            return Err(Error::DatabaseNotFound(db_path.to_string()));
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self { conn })
    }

    /// Insert a header; assigns and returns its instance id.
    pub fn insert(&self, h: &mut Header, nevra: &str) -> Result<u32> {
        let blob = serde_json::to_string(h)?;
        let digest = hex::encode(Sha256::digest(blob.as_bytes()));

        self.conn.execute(
            "INSERT INTO headers (nevra, blob, sha256) VALUES (?1, ?2, ?3)",
            params![nevra, &blob, &digest],
        )?;

        let instance = self.conn.last_insert_rowid() as u32;
        h.set_instance(instance);
        debug!("Stored header {} as instance {}", nevra, instance);
        Ok(instance)
    }

    /// Remove a header row; missing rows are a no-op.
    pub fn remove(&self, instance: u32) -> Result<()> {
        self.conn
            .execute("DELETE FROM headers WHERE instance = ?1", [instance])?;
        Ok(())
    }

    /// List (instance, nevra) for every stored header.
    pub fn list(&self) -> Result<Vec<(u32, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT instance, nevra FROM headers ORDER BY instance")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl HeaderStore for SqliteHeaderStore {
    fn fetch(&self, instance: u32) -> Result<Option<Header>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT blob, sha256 FROM headers WHERE instance = ?1",
                [instance],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((blob, stored_digest)) = row else {
            return Ok(None);
        };

        let digest = hex::encode(Sha256::digest(blob.as_bytes()));
        if digest != stored_digest {
            return Err(Error::CorruptHeader(instance));
        }

        let mut h: Header = serde_json::from_str(&blob)?;
        h.set_instance(instance);
        Ok(Some(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Tag, Value};
    use tempfile::NamedTempFile;

    fn temp_store() -> (SqliteHeaderStore, String) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        drop(temp_file);
        (SqliteHeaderStore::init(&db_path).unwrap(), db_path)
    }

    fn sample_header() -> Header {
        let mut h = Header::new();
        h.insert(Tag::Name, Value::Str("bash".to_string()));
        h.insert(Tag::Version, Value::Str("5.2".to_string()));
        h.insert(Tag::Release, Value::Str("1".to_string()));
        h
    }

    #[test]
    fn test_insert_assigns_instance() {
        let (store, _path) = temp_store();
        let mut h = sample_header();
        let instance = store.insert(&mut h, "bash-5.2-1.x86_64").unwrap();
        assert!(instance > 0);
        assert_eq!(h.instance(), instance);
    }

    #[test]
    fn test_fetch_round_trip() {
        let (store, _path) = temp_store();
        let mut h = sample_header();
        let instance = store.insert(&mut h, "bash-5.2-1.x86_64").unwrap();

        let fetched = store.fetch(instance).unwrap().expect("row exists");
        assert_eq!(fetched.get_str(Tag::Name), Some("bash"));
        assert_eq!(fetched.instance(), instance);
    }

    #[test]
    fn test_fetch_missing_row_is_none() {
        let (store, _path) = temp_store();
        assert!(store.fetch(999).unwrap().is_none());
    }

    #[test]
    fn test_remove_then_fetch() {
        let (store, _path) = temp_store();
        let mut h = sample_header();
        let instance = store.insert(&mut h, "bash-5.2-1.x86_64").unwrap();
        store.remove(instance).unwrap();
        assert!(store.fetch(instance).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_blob_is_an_error() {
        let (store, _path) = temp_store();
        let mut h = sample_header();
        let instance = store.insert(&mut h, "bash-5.2-1.x86_64").unwrap();

        store
            .conn
            .execute(
                "UPDATE headers SET blob = '{}' WHERE instance = ?1",
                [instance],
            )
            .unwrap();
        assert!(matches!(
            store.fetch(instance),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = SqliteHeaderStore::open("/nonexistent/path/db.sqlite");
        assert!(matches!(result, Err(Error::DatabaseNotFound(_))));
    }

    #[test]
    fn test_list_orders_by_instance() {
        let (store, _path) = temp_store();
        store.insert(&mut sample_header(), "bash-5.2-1.x86_64").unwrap();
        store.insert(&mut sample_header(), "bash-5.2-2.x86_64").unwrap();
        let rows = store.list().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].0 < rows[1].0);
    }
}
