//! Embedded SQLite store.
use std::path::PathBuf;

use bitcoin::hashes::Hash;
use rusqlite::{params, Connection};

use crate::{
    error::StoreError,
    header::{self, Digest},
    requests::{Request, RequestId},
    store::{ChangeSet, HeaderRecord, HeaderStore, RelayStore, Slot},
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS headers (
        digest BLOB PRIMARY KEY,
        record BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS requests (
        id   BLOB PRIMARY KEY,
        body TEXT NOT NULL
    );
"#;

/// Tables:
///   state(key TEXT PRIMARY KEY, value TEXT NOT NULL)
///   headers(digest BLOB PRIMARY KEY, record BLOB NOT NULL)
///   requests(id BLOB PRIMARY KEY, body TEXT NOT NULL)
///
/// `state` holds one row per [`Slot`], keyed by [`Slot::key`], valued with the
/// digest as storage-order hex. Header records use [`HeaderRecord::to_bytes`];
/// request bodies are JSON.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let conn = Connection::open(&path)
            .map_err(|e| StoreError::Backend(format!("open sqlite at {}: {e}", path.display())))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Convenient in-memory store (useful for tests)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let mut stmt = conn.prepare("SELECT value FROM state WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            let v: String = row.get(0)?;
            Ok(Some(v))
        } else {
            Ok(None)
        }
    }

    fn kv_set(conn: &Connection, key: &str, val: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO state(key,value) VALUES(?1,?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, val],
        )?;
        Ok(())
    }

    fn record_bytes(conn: &Connection, digest: &Digest) -> Result<Option<Vec<u8>>, StoreError> {
        let mut stmt = conn.prepare("SELECT record FROM headers WHERE digest = ?1")?;
        let mut rows = stmt.query(params![digest.as_byte_array().as_slice()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

impl HeaderStore for SqliteStore {
    fn header(&self, digest: &Digest) -> Result<Option<HeaderRecord>, StoreError> {
        Self::record_bytes(&self.conn, digest)?
            .map(|bytes| HeaderRecord::from_bytes(&bytes))
            .transpose()
    }

    fn slot(&self, slot: Slot) -> Result<Option<Digest>, StoreError> {
        let Some(hex) = Self::kv_get(&self.conn, slot.key())? else {
            return Ok(None);
        };
        header::digest_from_hex_le(&hex)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: slot.key().into(),
                reason: e.to_string(),
            })
    }

    fn request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT body FROM requests WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.as_bytes().as_slice()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let body: String = row.get(0)?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: format!("request {id}"),
                reason: e.to_string(),
            })
    }
}

impl RelayStore for SqliteStore {
    fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError> {
        // Dropping `tx` on an early return rolls everything back.
        let tx = self.conn.transaction()?;

        for (digest, record) in &changes.headers {
            let bytes = record.to_bytes();
            match Self::record_bytes(&tx, digest)? {
                Some(existing) if existing == bytes => continue,
                Some(_) => return Err(StoreError::Conflict(*digest)),
                None => {
                    tx.execute(
                        "INSERT INTO headers(digest, record) VALUES(?1, ?2)",
                        params![digest.as_byte_array().as_slice(), bytes],
                    )?;
                }
            }
        }

        for (slot, digest) in &changes.slots {
            Self::kv_set(&tx, slot.key(), &header::digest_to_hex_le(digest))?;
        }

        for (id, request) in &changes.requests {
            let body = serde_json::to_string(request).map_err(|e| StoreError::Corrupt {
                key: format!("request {id}"),
                reason: e.to_string(),
            })?;
            tx.execute(
                "INSERT INTO requests(id, body) VALUES(?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET body=excluded.body",
                params![id.as_bytes().as_slice(), body],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
