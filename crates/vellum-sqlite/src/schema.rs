//! Table layout
//!
//! Every location gets a record table and an event table, both keyed by
//! `(partition_key, id)`. The JSON body is the source of truth; the other
//! columns duplicate envelope properties for guards and ordering.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use vellum_core::{Result, VellumError};

use crate::error::map_sqlite_error;

/// Reject location names that cannot be used as a bare table name
pub fn check_location(location: &str) -> Result<()> {
    let mut chars = location.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VellumError::Config(format!(
            "location {location:?} is not a valid table name"
        )))
    }
}

pub fn records_table(location: &str) -> String {
    format!("\"{location}\"")
}

pub fn events_table(location: &str) -> String {
    format!("\"{location}_events\"")
}

pub fn create_tables(conn: &Connection, location: &str) -> Result<()> {
    check_location(location)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {records} (
            partition_key TEXT NOT NULL,
            id TEXT NOT NULL,
            type_name TEXT NOT NULL,
            etag TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (partition_key, id)
        );
        CREATE TABLE IF NOT EXISTS {events} (
            partition_key TEXT NOT NULL,
            id TEXT NOT NULL,
            related_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            expires_at TEXT,
            body TEXT NOT NULL,
            PRIMARY KEY (partition_key, id)
        );
        CREATE INDEX IF NOT EXISTS \"{location}_events_related\"
            ON {events} (partition_key, related_id, sequence);",
        records = records_table(location),
        events = events_table(location),
    ))
    .map_err(map_sqlite_error)?;
    info!(location, "ensured record and event tables");
    Ok(())
}

/// Fail unless both tables of `location` exist
pub fn verify_tables(conn: &Connection, location: &str) -> Result<()> {
    check_location(location)?;
    for table in [location.to_string(), format!("{location}_events")] {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&table],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        if found.is_none() {
            return Err(VellumError::Config(format!("table {table} does not exist")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_names() {
        assert!(check_location("widgets").is_ok());
        assert!(check_location("_audit_2").is_ok());
        assert!(check_location("2widgets").is_err());
        assert!(check_location("wid\"gets").is_err());
        assert!(check_location("").is_err());
    }

    #[test]
    fn test_create_then_verify() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(verify_tables(&conn, "widgets").is_err());
        create_tables(&conn, "widgets").unwrap();
        create_tables(&conn, "widgets").unwrap();
        verify_tables(&conn, "widgets").unwrap();
    }
}
