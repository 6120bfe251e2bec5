//! Prescription database operations.

use std::cmp::Reverse;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Prescription, RxStatus};
use crate::timefmt::RawTime;

const PRESCRIPTION_COLUMNS: &str = "id, for_user, rx_number, medication_name, dosage, \
                                    prescribed_date, status, status_history, \
                                    pharmacist_messages, pharmacist_message, \
                                    notified_on_status_change";

impl Database {
    /// Insert a new prescription.
    pub fn insert_prescription(&self, rx: &Prescription) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO prescriptions (
                id, for_user, rx_number, medication_name, dosage,
                prescribed_date, status, status_history,
                pharmacist_messages, pharmacist_message,
                notified_on_status_change
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                rx.id,
                rx.for_user,
                rx.rx_number,
                rx.medication_name,
                rx.dosage,
                serde_json::to_string(&rx.prescribed_date)?,
                rx.status,
                serde_json::to_string(&rx.status_history)?,
                serde_json::to_string(&rx.pharmacist_messages)?,
                rx.pharmacist_message,
                rx.notified_on_status_change,
            ],
        )?;
        Ok(())
    }

    /// Write back the mutable fields of a prescription.
    fn update_prescription(&self, rx: &Prescription) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE prescriptions SET
                status = ?2,
                status_history = ?3,
                pharmacist_messages = ?4,
                pharmacist_message = ?5,
                notified_on_status_change = ?6
            WHERE id = ?1
            "#,
            params![
                rx.id,
                rx.status,
                serde_json::to_string(&rx.status_history)?,
                serde_json::to_string(&rx.pharmacist_messages)?,
                rx.pharmacist_message,
                rx.notified_on_status_change,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a prescription by ID.
    pub fn get_prescription(&self, id: &str) -> DbResult<Option<Prescription>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM prescriptions WHERE id = ?",
                    PRESCRIPTION_COLUMNS
                ),
                [id],
                PrescriptionRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List every prescription, newest first.
    pub fn list_prescriptions(&self) -> DbResult<Vec<Prescription>> {
        let mut list = self.query_prescriptions(
            &format!("SELECT {} FROM prescriptions", PRESCRIPTION_COLUMNS),
            [],
        )?;
        sort_newest_first(&mut list);
        Ok(list)
    }

    /// List a patient's prescriptions, newest first.
    ///
    /// Prescribed dates are stored in whatever shape the writer used, so
    /// ordering happens after decoding. Undated entries go last.
    pub fn list_prescriptions_for_patient(&self, patient_id: &str) -> DbResult<Vec<Prescription>> {
        let mut list = self.query_prescriptions(
            &format!(
                "SELECT {} FROM prescriptions WHERE for_user = ?",
                PRESCRIPTION_COLUMNS
            ),
            [patient_id],
        )?;
        sort_newest_first(&mut list);
        Ok(list)
    }

    /// List prescriptions that have not been picked up.
    pub fn list_open_prescriptions(&self) -> DbResult<Vec<Prescription>> {
        let mut list = self.list_prescriptions()?;
        list.retain(|rx| !rx.is_completed());
        Ok(list)
    }

    /// Commit a status change.
    ///
    /// Re-reads the stored document first. Same-status requests are a
    /// no-op and return the stored prescription untouched.
    pub fn apply_status_change(
        &self,
        id: &str,
        new_status: RxStatus,
        note: Option<&str>,
    ) -> DbResult<Prescription> {
        let current = self
            .get_prescription(id)?
            .ok_or_else(|| DbError::NotFound(format!("Prescription {}", id)))?;

        if current.current_status() == Some(new_status) {
            return Ok(current);
        }

        let updated = current.transition(new_status, note, Utc::now());
        if !self.update_prescription(&updated)? {
            return Err(DbError::NotFound(format!("Prescription {}", id)));
        }
        self.reload_prescription(id)
    }

    /// Append a pharmacist message to a prescription.
    pub fn add_pharmacist_message(&self, id: &str, text: &str) -> DbResult<Prescription> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DbError::InvalidInput("Message cannot be empty".into()));
        }

        let current = self
            .get_prescription(id)?
            .ok_or_else(|| DbError::NotFound(format!("Prescription {}", id)))?;

        let updated = current.record_message(text, Utc::now());
        if !self.update_prescription(&updated)? {
            return Err(DbError::NotFound(format!("Prescription {}", id)));
        }
        self.reload_prescription(id)
    }

    /// Re-read after a write so callers see the stored shape.
    fn reload_prescription(&self, id: &str) -> DbResult<Prescription> {
        self.get_prescription(id)?
            .ok_or_else(|| DbError::NotFound(format!("Prescription {}", id)))
    }

    fn query_prescriptions<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> DbResult<Vec<Prescription>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, PrescriptionRow::from_row)?;

        let mut list = Vec::new();
        for row in rows {
            list.push(row?.try_into()?);
        }
        Ok(list)
    }
}

fn sort_newest_first(list: &mut [Prescription]) {
    list.sort_by_key(|rx| Reverse(rx.prescribed_date.to_instant()));
}

/// Intermediate row struct for database mapping.
struct PrescriptionRow {
    id: String,
    for_user: String,
    rx_number: String,
    medication_name: String,
    dosage: Option<String>,
    prescribed_date: String,
    status: String,
    status_history: String,
    pharmacist_messages: String,
    pharmacist_message: Option<String>,
    notified_on_status_change: bool,
}

impl PrescriptionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            for_user: row.get(1)?,
            rx_number: row.get(2)?,
            medication_name: row.get(3)?,
            dosage: row.get(4)?,
            prescribed_date: row.get(5)?,
            status: row.get(6)?,
            status_history: row.get(7)?,
            pharmacist_messages: row.get(8)?,
            pharmacist_message: row.get(9)?,
            notified_on_status_change: row.get(10)?,
        })
    }
}

impl TryFrom<PrescriptionRow> for Prescription {
    type Error = DbError;

    fn try_from(row: PrescriptionRow) -> Result<Self, Self::Error> {
        let prescribed_date: serde_json::Value = serde_json::from_str(&row.prescribed_date)?;

        Ok(Prescription {
            id: row.id,
            for_user: row.for_user,
            rx_number: row.rx_number,
            medication_name: row.medication_name,
            dosage: row.dosage,
            prescribed_date: RawTime::from(&prescribed_date),
            status: row.status,
            status_history: serde_json::from_str(&row.status_history)?,
            pharmacist_messages: serde_json::from_str(&row.pharmacist_messages)?,
            pharmacist_message: row.pharmacist_message,
            notified_on_status_change: row.notified_on_status_change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_rx(patient: &str, rx_number: &str) -> Prescription {
        Prescription::new(patient.into(), rx_number.into(), "Lisinopril 10mg".into())
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let mut rx = make_rx("patient-1", "RX-1001");
        rx.dosage = Some("Once daily".into());
        rx.prescribed_date = RawTime::Date(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());

        db.insert_prescription(&rx).unwrap();

        let retrieved = db.get_prescription(&rx.id).unwrap().unwrap();
        assert_eq!(retrieved.rx_number, "RX-1001");
        assert_eq!(retrieved.dosage.as_deref(), Some("Once daily"));
        assert_eq!(
            retrieved.prescribed_date.to_instant(),
            rx.prescribed_date.to_instant()
        );
    }

    #[test]
    fn test_legacy_date_shapes_are_read() {
        let db = setup_db();
        db.conn()
            .execute(
                r#"INSERT INTO prescriptions (id, for_user, rx_number, medication_name, prescribed_date, status)
                   VALUES ('a', 'p1', 'RX-A', 'Drug A', '{"_seconds": 1700000000, "_nanoseconds": 0}', 'entered'),
                          ('b', 'p1', 'RX-B', 'Drug B', '"2024-01-15"', 'Billing'),
                          ('c', 'p1', 'RX-C', 'Drug C', 'null', 'billing')"#,
                [],
            )
            .unwrap();

        let list = db.list_prescriptions_for_patient("p1").unwrap();
        let ids: Vec<&str> = list.iter().map(|rx| rx.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(list[1].current_status(), Some(RxStatus::Entered));
    }

    #[test]
    fn test_apply_status_change_appends_history() {
        let db = setup_db();
        let rx = make_rx("patient-1", "RX-1");
        db.insert_prescription(&rx).unwrap();

        let updated = db
            .apply_status_change(&rx.id, RxStatus::PharmacistCheck, Some("flagged for review"))
            .unwrap();
        assert_eq!(updated.status, "Pharmacist Check");
        assert_eq!(updated.status_history.len(), 1);

        let stored = db.get_prescription(&rx.id).unwrap().unwrap();
        assert_eq!(stored, updated);
        assert!(stored.notified_on_status_change);

        let again = db
            .apply_status_change(&rx.id, RxStatus::PharmacistCheck, None)
            .unwrap();
        assert_eq!(again.status_history.len(), 1);
    }

    #[test]
    fn test_apply_status_change_missing() {
        let db = setup_db();
        let result = db.apply_status_change("gone", RxStatus::Billing, None);
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_pharmacist_message() {
        let db = setup_db();
        let rx = make_rx("patient-1", "RX-1");
        db.insert_prescription(&rx).unwrap();

        let updated = db
            .add_pharmacist_message(&rx.id, "  Call the office  ")
            .unwrap();
        assert_eq!(updated.pharmacist_messages[0].content, "Call the office");
        assert_eq!(updated.status, rx.status);

        assert!(matches!(
            db.add_pharmacist_message(&rx.id, "   "),
            Err(DbError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_open_excludes_completed_in_either_spelling() {
        let db = setup_db();
        let open = make_rx("p1", "RX-1");
        let mut done = make_rx("p1", "RX-2");
        done.status = "completed".into();
        db.insert_prescription(&open).unwrap();
        db.insert_prescription(&done).unwrap();

        let list = db.list_open_prescriptions().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, open.id);
    }
}
