//! Database layer: local stand-in for the hosted document store.

mod schema;
mod conversations;
mod messages;
mod patients;
mod pharmacists;
mod prescriptions;

pub use schema::*;
#[allow(unused_imports)]
pub use conversations::*;
#[allow(unused_imports)]
pub use messages::*;
#[allow(unused_imports)]
pub use patients::*;
pub use pharmacists::*;
#[allow(unused_imports)]
pub use prescriptions::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Encode an instant as fixed-width RFC 3339 so that text order is time order.
pub(crate) fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Decode a value written by [`stamp`].
pub(crate) fn parse_stamp(text: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| DbError::Constraint(format!("Bad timestamp {:?}: {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        // Check that tables exist
        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"patients".to_string()));
        assert!(tables.contains(&"prescriptions".to_string()));
        assert!(tables.contains(&"conversations".to_string()));
        assert!(tables.contains(&"conversation_messages".to_string()));
        assert!(tables.contains(&"messages".to_string()));
        assert!(tables.contains(&"pharmacists".to_string()));
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desk.db");

        {
            let db = Database::open(&path).unwrap();
            db.insert_patient(&crate::models::Patient::new("Jane".into(), "Doe".into()))
                .unwrap();
        }

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.list_patients().unwrap().len(), 1);
    }

    #[test]
    fn test_stamp_round_trip_and_order() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1);

        assert_eq!(parse_stamp(&stamp(early)).unwrap(), early);
        assert!(stamp(early) < stamp(late));
        assert!(parse_stamp("not a time").is_err());
    }
}
