//! Durable local ledger of capture records.
//!
//! The ledger is an append-only `SQLite` table. Every capture lands here
//! before any network attempt; the remote store only ever sees copies. The
//! one mutation allowed after append is flipping `synced` from false to true.

pub mod migrations;
pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{CaptureRecord, RecordFilter};

const SELECT_COLUMNS: &str = r"
    SELECT id, unit, equipment, date, parameters, notes, author_id, author_name,
           captured_at, fingerprint, synced
    FROM records
";

/// The local write-ahead store.
#[derive(Debug)]
pub struct Ledger {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Ledger {
    /// Open or create a ledger at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Writes use `synchronous=FULL`, so a returned [`Ledger::append`]
    /// survives power loss as well as a process crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening ledger at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Ledger opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and return its new local id.
    ///
    /// The record is stored with its own `synced` flag, normally `false`.
    /// Any `local_id` already on the record is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not reach durable storage.
    pub fn append(&self, record: &CaptureRecord) -> Result<i64> {
        let parameters = serde_json::to_string(&record.parameters)?;
        let synced_at = record.synced.then(|| Utc::now().to_rfc3339());

        self.conn.execute(
            r"
            INSERT INTO records (unit, equipment, date, parameters, notes, author_id,
                                 author_name, captured_at, fingerprint, synced, synced_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                record.unit,
                record.equipment,
                record.date.to_string(),
                parameters,
                record.notes,
                record.author_id,
                record.author_name,
                record.captured_at.to_rfc3339(),
                record.fingerprint,
                record.synced,
                synced_at,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(local_id = id, equipment = %record.equipment, "Appended record");
        Ok(id)
    }

    /// Mark a record as accepted by the remote store.
    ///
    /// Idempotent: returns `true` only when this call flipped the flag.
    /// Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_synced(&self, local_id: i64) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE records SET synced = 1, synced_at = ?2 WHERE id = ?1 AND synced = 0",
            params![local_id, Utc::now().to_rfc3339()],
        )?;
        if affected > 0 {
            debug!(local_id, "Marked record synced");
        }
        Ok(affected > 0)
    }

    /// All unsynced records in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_unsynced(&self) -> Result<Vec<CaptureRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE synced = 0 ORDER BY id ASC"))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Get a record by its local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, local_id: i64) -> Result<Option<CaptureRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [local_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Records matching a filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query(&self, filter: &RecordFilter) -> Result<Vec<CaptureRecord>> {
        let (from, to) = filter.range().map_or((None, None), |(from, to)| {
            (Some(from.to_string()), Some(to.to_string()))
        });

        let mut stmt = self.conn.prepare(&format!(
            r"{SELECT_COLUMNS}
            WHERE (?1 IS NULL OR unit = ?1)
              AND (?2 IS NULL OR equipment = ?2)
              AND (?3 IS NULL OR date = ?3)
              AND (?4 IS NULL OR date BETWEEN ?4 AND ?5)
            ORDER BY id DESC
            "
        ))?;

        let records = stmt
            .query_map(
                params![
                    filter.unit,
                    filter.equipment,
                    filter.date.map(|d| d.to_string()),
                    from,
                    to,
                ],
                Self::row_to_record,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Count all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count records still waiting for the remote store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_unsynced(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete every record, synced or not.
    ///
    /// Destroys unsynced readings. Only call this behind an explicit operator
    /// confirmation; nothing in the sync path does.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<usize> {
        let unsynced = self.count_unsynced()?;
        if unsynced > 0 {
            warn!(unsynced, "Clearing ledger with unsynced records");
        }
        let affected = self.conn.execute("DELETE FROM records", [])?;
        info!("Cleared {} records from ledger", affected);
        Ok(affected)
    }

    /// Get ledger statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<LedgerStats> {
        let total = self.count()?;
        let unsynced = self.count_unsynced()?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(captured_at), MAX(captured_at) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let parse = |s: Option<String>| {
            s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(LedgerStats {
            total,
            synced: total - unsynced,
            unsynced,
            oldest_capture: parse(oldest),
            newest_capture: parse(newest),
            db_size_bytes,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CaptureRecord> {
        fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
        where
            E: std::error::Error + Send + Sync + 'static,
        {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
        }

        let id: i64 = row.get(0)?;
        let date_str: String = row.get(3)?;
        let parameters_str: String = row.get(4)?;
        let captured_at_str: String = row.get(8)?;

        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| conversion(3, e))?;
        let parameters: BTreeMap<String, f64> =
            serde_json::from_str(&parameters_str).map_err(|e| conversion(4, e))?;
        let captured_at = DateTime::parse_from_rfc3339(&captured_at_str)
            .map_err(|e| conversion(8, e))?
            .with_timezone(&Utc);

        Ok(CaptureRecord {
            local_id: Some(id),
            unit: row.get(1)?,
            equipment: row.get(2)?,
            date,
            parameters,
            notes: row.get(5)?,
            author_id: row.get(6)?,
            author_name: row.get(7)?,
            captured_at,
            fingerprint: row.get(9)?,
            synced: row.get(10)?,
        })
    }
}

/// Statistics about the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    /// Total number of records.
    pub total: i64,
    /// Records acknowledged by the remote store.
    pub synced: i64,
    /// Records waiting for reconciliation.
    pub unsynced: i64,
    /// Capture time of the oldest record.
    pub oldest_capture: Option<DateTime<Utc>>,
    /// Capture time of the newest record.
    pub newest_capture: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
