//! List-view helpers: search, filtering, grouping and dashboard counts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Patient, Prescription, RxStatus, StatusFilter};

/// Patients whose full name contains `query`, ignoring case.
///
/// A blank query returns every patient.
pub fn search_patients<'a>(patients: &'a [Patient], query: &str) -> Vec<&'a Patient> {
    let needle = query.trim().to_lowercase();
    patients
        .iter()
        .filter(|p| needle.is_empty() || p.full_name().to_lowercase().contains(&needle))
        .collect()
}

/// Prescriptions matching a status filter.
pub fn filter_prescriptions<'a>(
    prescriptions: &'a [Prescription],
    filter: StatusFilter,
) -> Vec<&'a Prescription> {
    prescriptions
        .iter()
        .filter(|rx| filter.matches_prescription(rx))
        .collect()
}

/// Dashboard search over patient name, medication name and Rx number.
pub fn search_requests<'a>(
    requests: &'a [Prescription],
    patients: &[Patient],
    query: &str,
    filter: StatusFilter,
) -> Vec<&'a Prescription> {
    let names: HashMap<&str, String> = patients
        .iter()
        .map(|p| (p.id.as_str(), p.full_name().to_lowercase()))
        .collect();
    let needle = query.trim().to_lowercase();

    requests
        .iter()
        .filter(|rx| filter.matches_prescription(rx))
        .filter(|rx| {
            needle.is_empty()
                || names
                    .get(rx.for_user.as_str())
                    .map(|name| name.contains(&needle))
                    .unwrap_or(false)
                || rx.medication_name.to_lowercase().contains(&needle)
                || rx.rx_number.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Open requests grouped by status, in workflow order.
///
/// Completed and unrecognized statuses are left out. Empty groups are kept
/// so the dashboard can render a column per state.
pub fn group_by_status(requests: &[Prescription]) -> Vec<(RxStatus, Vec<&Prescription>)> {
    RxStatus::ALL
        .into_iter()
        .filter(|status| !status.is_terminal())
        .map(|status| {
            let group: Vec<&Prescription> = requests
                .iter()
                .filter(|rx| rx.current_status() == Some(status))
                .collect();
            (status, group)
        })
        .collect()
}

/// Header counts on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: usize,
    pub new: usize,
    /// Waiting on a pharmacist
    pub urgent: usize,
    pub ready: usize,
}

impl RequestStats {
    pub fn from_requests(requests: &[Prescription]) -> Self {
        let count = |wanted: RxStatus| {
            requests
                .iter()
                .filter(|rx| rx.current_status() == Some(wanted))
                .count()
        };
        Self {
            total: requests.len(),
            new: count(RxStatus::RequestReceived),
            urgent: count(RxStatus::PharmacistCheck),
            ready: count(RxStatus::ReadyForPickup),
        }
    }
}

/// Split a patient's prescriptions into (active, completed).
pub fn split_active(prescriptions: &[Prescription]) -> (Vec<&Prescription>, Vec<&Prescription>) {
    prescriptions.iter().partition(|rx| !rx.is_completed())
}

/// Column heading used on the dashboard.
pub fn dashboard_label(status: RxStatus) -> &'static str {
    match status {
        RxStatus::RequestReceived => "New Requests",
        RxStatus::Entered => "Entered into System",
        RxStatus::PharmacistCheck => "Awaiting Pharmacist Review",
        RxStatus::PrepPackaging => "In Preparation",
        RxStatus::Billing => "In Billing",
        RxStatus::ReadyForPickup => "Ready for Pickup",
        RxStatus::Completed => "Completed",
    }
}
