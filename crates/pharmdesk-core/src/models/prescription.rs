//! Prescription models and the fulfillment status machine.
//!
//! Stored documents use two spellings for the same status: the
//! human-readable labels written by the status editor ("Ready for Pickup")
//! and the older camelCase keys ("readyForPickup"). Every comparison goes
//! through [`RxStatus::parse`]; nothing else looks at the raw token.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timefmt::RawTime;

/// Fulfillment status, in workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RxStatus {
    /// Request received from the patient
    RequestReceived,
    /// Entered into the pharmacy system
    Entered,
    /// Awaiting pharmacist review
    PharmacistCheck,
    /// Being prepared and packaged
    PrepPackaging,
    /// In billing
    Billing,
    /// Ready for pickup
    ReadyForPickup,
    /// Picked up (terminal)
    Completed,
}

impl RxStatus {
    /// All states in workflow order.
    pub const ALL: [RxStatus; 7] = [
        RxStatus::RequestReceived,
        RxStatus::Entered,
        RxStatus::PharmacistCheck,
        RxStatus::PrepPackaging,
        RxStatus::Billing,
        RxStatus::ReadyForPickup,
        RxStatus::Completed,
    ];

    /// Canonicalize a stored status token. Accepts both spellings.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL.into_iter().find(|status| {
            token.eq_ignore_ascii_case(status.label())
                || token.eq_ignore_ascii_case(status.legacy_key())
        })
    }

    /// Human-readable label. This is the spelling written on transition.
    pub fn label(self) -> &'static str {
        match self {
            RxStatus::RequestReceived => "Request Received",
            RxStatus::Entered => "Entered into System",
            RxStatus::PharmacistCheck => "Pharmacist Check",
            RxStatus::PrepPackaging => "Prep & Packaging",
            RxStatus::Billing => "Billing",
            RxStatus::ReadyForPickup => "Ready for Pickup",
            RxStatus::Completed => "Completed",
        }
    }

    /// Legacy camelCase key.
    pub fn legacy_key(self) -> &'static str {
        match self {
            RxStatus::RequestReceived => "requestReceived",
            RxStatus::Entered => "entered",
            RxStatus::PharmacistCheck => "pharmacistCheck",
            RxStatus::PrepPackaging => "prepPackaging",
            RxStatus::Billing => "billing",
            RxStatus::ReadyForPickup => "readyForPickup",
            RxStatus::Completed => "completed",
        }
    }

    /// Zero-based position in the workflow.
    pub fn position(self) -> usize {
        self as usize
    }

    /// Next state in the workflow, if any.
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.position() + 1).copied()
    }

    /// Check if this is the terminal state.
    pub fn is_terminal(self) -> bool {
        self == RxStatus::Completed
    }
}

impl fmt::Display for RxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry in a prescription's status history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    /// Status token as written
    pub status: String,
    /// When the change was committed
    pub timestamp: RawTime,
    /// Operator note, or the default "Status updated to ..." text
    pub message: String,
}

/// A pharmacist-authored message attached to a prescription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PharmacistMessage {
    pub id: String,
    pub content: String,
    pub timestamp: RawTime,
    /// Always false for messages recorded here
    pub is_from_user: bool,
}

/// A prescription request belonging to one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    /// Document ID
    pub id: String,
    /// Patient document ID
    pub for_user: String,
    /// Pharmacy Rx number
    pub rx_number: String,
    /// Medication descriptor
    pub medication_name: String,
    /// Dosage instructions
    pub dosage: Option<String>,
    /// When the prescription was written
    pub prescribed_date: RawTime,
    /// Raw stored status token (either spelling, or unrecognized)
    pub status: String,
    /// Append-only status history
    pub status_history: Vec<StatusUpdate>,
    /// Append-only pharmacist message log
    pub pharmacist_messages: Vec<PharmacistMessage>,
    /// Most recent pharmacist message (kept for older clients)
    pub pharmacist_message: Option<String>,
    /// Set once the patient has been notified of a status change
    pub notified_on_status_change: bool,
}

impl Prescription {
    /// Create a new prescription in the initial state.
    pub fn new(for_user: String, rx_number: String, medication_name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            for_user,
            rx_number,
            medication_name,
            dosage: None,
            prescribed_date: RawTime::Date(Utc::now()),
            status: RxStatus::RequestReceived.label().to_string(),
            status_history: Vec::new(),
            pharmacist_messages: Vec::new(),
            pharmacist_message: None,
            notified_on_status_change: false,
        }
    }

    /// Canonical current status, if the stored token is recognized.
    pub fn current_status(&self) -> Option<RxStatus> {
        RxStatus::parse(&self.status)
    }

    /// Check if the prescription has reached the terminal state.
    pub fn is_completed(&self) -> bool {
        self.current_status() == Some(RxStatus::Completed)
    }

    /// Apply a status change.
    ///
    /// Returns an unchanged copy when `new_status` equals the current status.
    /// Otherwise appends exactly one history entry. Blank notes fall back to
    /// the default message.
    pub fn transition(
        &self,
        new_status: RxStatus,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Prescription {
        if self.current_status() == Some(new_status) {
            return self.clone();
        }

        let message = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_status_message(new_status));

        let mut updated = self.clone();
        updated.status_history.push(StatusUpdate {
            status: new_status.label().to_string(),
            timestamp: RawTime::Date(at),
            message,
        });
        updated.status = new_status.label().to_string();
        updated.notified_on_status_change = true;
        updated
    }

    /// Append a pharmacist message. Status is unchanged.
    pub fn record_message(&self, text: &str, at: DateTime<Utc>) -> Prescription {
        let mut updated = self.clone();
        updated.pharmacist_messages.push(PharmacistMessage {
            id: uuid::Uuid::new_v4().to_string(),
            content: text.to_string(),
            timestamp: RawTime::Date(at),
            is_from_user: false,
        });
        updated.pharmacist_message = Some(text.to_string());
        updated
    }

    /// Most recent history entry.
    pub fn latest_update(&self) -> Option<&StatusUpdate> {
        self.status_history.last()
    }
}

/// Default history message for a status change.
pub fn default_status_message(status: RxStatus) -> String {
    format!("Status updated to {}", status.label())
}

/// A status change awaiting operator confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub prescription_id: String,
    /// Canonical current status (None if the stored token is unrecognized)
    pub from: Option<RxStatus>,
    pub to: RxStatus,
    pub note: Option<String>,
}

impl StatusChange {
    /// Plan a change. Returns None when the prescription is already in `to`.
    pub fn plan(prescription: &Prescription, to: RxStatus, note: Option<&str>) -> Option<Self> {
        let from = prescription.current_status();
        if from == Some(to) {
            return None;
        }
        Some(Self {
            prescription_id: prescription.id.clone(),
            from,
            to,
            note: note.map(str::to_string),
        })
    }

    /// Check if the change moves the prescription back in the workflow.
    pub fn is_backward(&self) -> bool {
        matches!(self.from, Some(from) if self.to < from)
    }

    /// Prompt shown to the operator before committing.
    pub fn confirmation_prompt(&self) -> String {
        format!(
            "Are you sure you want to update this prescription status to \"{}\"?",
            self.to.label()
        )
    }
}

/// Status filter used by list views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(RxStatus),
}

impl StatusFilter {
    /// Parse a dropdown value: "all" or any status spelling.
    pub fn parse(value: &str) -> Option<Self> {
        if value.trim().eq_ignore_ascii_case("all") {
            return Some(StatusFilter::All);
        }
        RxStatus::parse(value).map(StatusFilter::Only)
    }

    /// Check a raw status token against the filter.
    pub fn matches(&self, raw_status: &str) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => RxStatus::parse(raw_status) == Some(*wanted),
        }
    }

    /// Check a prescription against the filter.
    pub fn matches_prescription(&self, prescription: &Prescription) -> bool {
        self.matches(&prescription.status)
    }
}
