//! `SQLite` schema definitions for the capture ledger.

/// SQL statement to create the records table.
///
/// `id` is the local id; `AUTOINCREMENT` keeps ids monotonic even after
/// `clear()`, so an id is never reused.
pub const CREATE_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    unit TEXT NOT NULL,
    equipment TEXT NOT NULL,
    date TEXT NOT NULL,
    parameters TEXT NOT NULL,
    notes TEXT,
    author_id TEXT,
    author_name TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0 CHECK (synced IN (0, 1)),
    synced_at TEXT
)
";

/// Secondary index on the sync flag for the reconciliation scan.
pub const CREATE_SYNCED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_synced ON records(synced, id)
";

/// Index for day lookups when resuming guided entry.
pub const CREATE_DAY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_day ON records(unit, date)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_RECORDS_TABLE,
    CREATE_SYNCED_INDEX,
    CREATE_DAY_INDEX,
    CREATE_METADATA_TABLE,
];
