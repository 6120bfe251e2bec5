//! Patient models.

use serde::{Deserialize, Serialize};

/// A patient record, created by the external intake process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Document ID
    pub id: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Date of birth as entered at intake (e.g. "1985-04-15")
    pub date_of_birth: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Medical record number
    pub medical_id: Option<String>,
    /// Primary care doctor
    pub primary_doctor: Option<String>,
    /// Known allergies
    pub allergies: Vec<String>,
    /// Creation timestamp
    pub created_at: String,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(first_name: String, last_name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name,
            last_name,
            date_of_birth: None,
            phone: None,
            email: None,
            medical_id: None,
            primary_doctor: None,
            allergies: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Display name, "First Last".
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Check if the patient has any recorded allergies.
    pub fn has_allergies(&self) -> bool {
        !self.allergies.is_empty()
    }
}
