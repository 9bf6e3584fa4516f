//! # Statestore
//!
//! Categorized per-device record store for canonical network-element state.
//!
//! Records are addressed by `(device, category, natural key)` and carry a JSON
//! payload. The store knows nothing about the meaning of a category: the
//! schema of each record lives with the code that reads it.
//!
//! ## Example
//!
//! ```no_run
//! use statestore::{RecordKey, SqliteStore, StateStore, WriteRequest};
//! use std::path::Path;
//!
//! let store = SqliteStore::open(Path::new("/var/lib/fabricctl/state.db"))?;
//!
//! let key = RecordKey::new().with("if_name", "swp1").with("vlan_id", 100);
//! store.write_all(&[WriteRequest::upsert(
//!     "leaf1",
//!     "vlan_if",
//!     key,
//!     serde_json::json!({"if_name": "swp1", "vlan_id": 100}),
//! )])?;
//!
//! for record in store.read("leaf1", "vlan_if")? {
//!     println!("{}", record.key);
//! }
//! # Ok::<(), statestore::Error>(())
//! ```

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{RecordKey, StoredRecord, WriteOp, WriteRequest};

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;

/// Interface of the persisted-state store
///
/// `write_all` is atomic: either every request in the batch is applied or
/// none is. Multi-category updates (recovery rebuilds, post-commit state
/// projection) always go through it.
pub trait StateStore: Send + Sync {
    /// Read every record of one category for a device
    fn read(&self, device: &str, category: &str) -> Result<Vec<StoredRecord>>;

    /// Apply a batch of writes in one transaction
    fn write_all(&self, batch: &[WriteRequest]) -> Result<()>;

    /// Apply a single write
    fn write(&self, request: &WriteRequest) -> Result<()> {
        self.write_all(std::slice::from_ref(request))
    }

    /// List devices that have at least one record
    fn devices(&self) -> Result<Vec<String>>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store database at the given path
    ///
    /// Creates the database file and necessary tables if they don't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        if db_path.as_os_str().is_empty() {
            return Err(Error::InvalidPath(db_path.to_path_buf()));
        }

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        log::debug!("Opened state store at {}", db_path.display());
        Self::init(conn)
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                device TEXT NOT NULL,
                category TEXT NOT NULL,
                record_key TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (device, category, record_key)
            );

            CREATE INDEX IF NOT EXISTS idx_device_category ON records(device, category);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of records stored for a device across all categories
    pub fn record_count(&self, device: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE device = ?1",
            params![device],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl StateStore for SqliteStore {
    fn read(&self, device: &str, category: &str) -> Result<Vec<StoredRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record_key, data FROM records
             WHERE device = ?1 AND category = ?2
             ORDER BY record_key",
        )?;

        let rows = stmt
            .query_map(params![device, category], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, data)| {
                Ok(StoredRecord {
                    key: RecordKey::decode(&key)?,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    fn write_all(&self, batch: &[WriteRequest]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Validate before touching the database so a bad request cannot
        // leave a half-applied batch behind
        for request in batch {
            if request.op == WriteOp::Upsert && request.data.is_none() {
                return Err(Error::InvalidWrite {
                    device: request.device.clone(),
                    category: request.category.clone(),
                    message: format!("upsert of {} without data", request.key),
                });
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for request in batch {
            let key = request.key.encode();
            match (request.op, &request.data) {
                (WriteOp::Upsert, Some(data)) => {
                    tx.execute(
                        "INSERT INTO records (device, category, record_key, data, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(device, category, record_key)
                         DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                        params![
                            request.device,
                            request.category,
                            key,
                            serde_json::to_string(data)?,
                            now
                        ],
                    )?;
                }
                // Upserts without data were rejected above
                (WriteOp::Delete, _) | (WriteOp::Upsert, None) => {
                    tx.execute(
                        "DELETE FROM records WHERE device = ?1 AND category = ?2 AND record_key = ?3",
                        params![request.device, request.category, key],
                    )?;
                }
            }
        }

        tx.commit()?;
        log::debug!("Committed {} state writes", batch.len());
        Ok(())
    }

    fn devices(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT device FROM records ORDER BY device")?;
        let devices = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }
}
