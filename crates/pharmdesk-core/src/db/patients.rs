//! Patient database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::Patient;

const PATIENT_COLUMNS: &str = "id, first_name, last_name, date_of_birth, phone, email, \
                               medical_id, primary_doctor, allergies, created_at";

impl Database {
    /// Insert a new patient (intake).
    pub fn insert_patient(&self, patient: &Patient) -> DbResult<()> {
        let allergies_json = serde_json::to_string(&patient.allergies)?;

        self.conn.execute(
            r#"
            INSERT INTO patients (
                id, first_name, last_name, date_of_birth, phone, email,
                medical_id, primary_doctor, allergies, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                patient.id,
                patient.first_name,
                patient.last_name,
                patient.date_of_birth,
                patient.phone,
                patient.email,
                patient.medical_id,
                patient.primary_doctor,
                allergies_json,
                patient.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
                [id],
                PatientRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List all patients, ordered by name.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients ORDER BY last_name, first_name",
            PATIENT_COLUMNS
        ))?;

        let rows = stmt.query_map([], PatientRow::from_row)?;

        let mut patients = Vec::new();
        for row in rows {
            patients.push(row?.try_into()?);
        }
        Ok(patients)
    }
}

/// Intermediate row struct for database mapping.
struct PatientRow {
    id: String,
    first_name: String,
    last_name: String,
    date_of_birth: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    medical_id: Option<String>,
    primary_doctor: Option<String>,
    allergies: String,
    created_at: String,
}

impl PatientRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            date_of_birth: row.get(3)?,
            phone: row.get(4)?,
            email: row.get(5)?,
            medical_id: row.get(6)?,
            primary_doctor: row.get(7)?,
            allergies: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl TryFrom<PatientRow> for Patient {
    type Error = DbError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        Ok(Patient {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            phone: row.phone,
            email: row.email,
            medical_id: row.medical_id,
            primary_doctor: row.primary_doctor,
            allergies: serde_json::from_str(&row.allergies)?,
            created_at: row.created_at,
        })
    }
}
