//! Pharmacist account database operations.

use rusqlite::{params, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Database, DbError, DbResult};

/// A pharmacist account able to sign in to the desk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pharmacist {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_salt: String,
    /// Hex SHA-256 of `salt:password`
    pub password_hash: String,
    /// Consecutive failed sign-ins since the last success
    pub failed_attempts: u32,
    pub created_at: String,
}

impl Database {
    /// Insert a new pharmacist. Emails are unique, ignoring case.
    pub fn insert_pharmacist(&self, pharmacist: &Pharmacist) -> DbResult<()> {
        let result = self.conn.execute(
            r#"
            INSERT INTO pharmacists (
                id, email, name, password_salt, password_hash,
                failed_attempts, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                pharmacist.id,
                pharmacist.email,
                pharmacist.name,
                pharmacist.password_salt,
                pharmacist.password_hash,
                pharmacist.failed_attempts,
                pharmacist.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(DbError::Constraint(format!(
                    "Email already registered: {}",
                    pharmacist.email
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a pharmacist by email (case-insensitive).
    pub fn find_pharmacist_by_email(&self, email: &str) -> DbResult<Option<Pharmacist>> {
        let pharmacist = self
            .conn
            .query_row(
                r#"
                SELECT id, email, name, password_salt, password_hash,
                       failed_attempts, created_at
                FROM pharmacists
                WHERE email = ?
                "#,
                [email.trim()],
                |row| {
                    Ok(Pharmacist {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                        password_salt: row.get(3)?,
                        password_hash: row.get(4)?,
                        failed_attempts: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(pharmacist)
    }

    /// Record a failed sign-in and return the new consecutive count.
    pub fn record_failed_signin(&self, id: &str) -> DbResult<u32> {
        let count = self
            .conn
            .query_row(
                r#"
                UPDATE pharmacists SET failed_attempts = failed_attempts + 1
                WHERE id = ?
                RETURNING failed_attempts
                "#,
                [id],
                |row| row.get(0),
            )
            .optional()?;
        count.ok_or_else(|| DbError::NotFound(format!("Pharmacist {}", id)))
    }

    /// Clear the failed sign-in counter.
    pub fn reset_failed_signins(&self, id: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE pharmacists SET failed_attempts = 0 WHERE id = ?",
            [id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pharmacist(email: &str) -> Pharmacist {
        Pharmacist {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            name: "Dana Reyes".into(),
            password_salt: "salt".into(),
            password_hash: "hash".into(),
            failed_attempts: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_insert_and_find_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let pharmacist = make_pharmacist("dana@pharmacy.test");
        db.insert_pharmacist(&pharmacist).unwrap();

        let found = db
            .find_pharmacist_by_email("Dana@Pharmacy.TEST")
            .unwrap()
            .unwrap();
        assert_eq!(found, pharmacist);
        assert!(db.find_pharmacist_by_email("nobody@x.test").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_constraint_error() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pharmacist(&make_pharmacist("dana@pharmacy.test"))
            .unwrap();

        let result = db.insert_pharmacist(&make_pharmacist("DANA@pharmacy.test"));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_failed_signin_counter() {
        let db = Database::open_in_memory().unwrap();
        let pharmacist = make_pharmacist("dana@pharmacy.test");
        db.insert_pharmacist(&pharmacist).unwrap();

        assert_eq!(db.record_failed_signin(&pharmacist.id).unwrap(), 1);
        assert_eq!(db.record_failed_signin(&pharmacist.id).unwrap(), 2);
        db.reset_failed_signins(&pharmacist.id).unwrap();

        let found = db
            .find_pharmacist_by_email("dana@pharmacy.test")
            .unwrap()
            .unwrap();
        assert_eq!(found.failed_attempts, 0);
        assert!(matches!(
            db.record_failed_signin("missing"),
            Err(DbError::NotFound(_))
        ));
    }
}
