//! Ledger schema versioning.
//!
//! A ledger may hold unsynced readings written by an older build, so every
//! step here must keep existing rows. Steps run inside one transaction; a
//! failed upgrade leaves the file as it was.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

const VERSION_KEY: &str = "schema_version";

/// Upgrade steps, indexed by the version they produce. Version 1 is the base
/// schema from [`SCHEMA_STATEMENTS`] and needs no extra statements.
const STEPS: &[(i32, &[&str])] = &[(1, &[])];

/// Create the base schema if missing and upgrade it to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if the file was written by a newer build or a step
/// fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let found = stored_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "ledger schema version {found} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    for version in (found + 1)..=CURRENT_VERSION {
        apply_step(&tx, version)?;
    }
    store_version(&tx, CURRENT_VERSION)?;
    tx.commit()?;
    tracing::debug!(from = found, to = CURRENT_VERSION, "Ledger schema upgraded");
    Ok(())
}

/// Version recorded in `metadata`, or 0 for a fresh file.
fn stored_version(conn: &Connection) -> Result<i32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    raw.map_or(Ok(0), |value| {
        value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("unreadable schema version '{value}'"),
        })
    })
}

fn store_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn apply_step(conn: &Connection, version: i32) -> Result<()> {
    let Some((_, statements)) = STEPS.iter().find(|(v, _)| *v == version) else {
        return Err(Error::DatabaseMigration {
            message: format!("no upgrade step to version {version}"),
        });
    };
    for statement in *statements {
        conn.execute(statement, [])?;
    }
    Ok(())
}
