//! PharmDesk Core Library
//!
//! Pharmacy staff dashboard core: patients, prescription fulfillment
//! workflow, and live operator/patient messaging.
//!
//! # Architecture
//!
//! ```text
//!   Native dashboard shell
//!            │  (UniFFI)
//!            ▼
//!      PharmDeskCore ──────────────► auth::LocalAuth
//!            │
//!            ▼
//!   sync::Backend ── writes ──► db::Database (SQLite)
//!            │                        │
//!            └── publish ──► ChangeFeed ── push ──► LiveConversations
//!                                          └──────► MessageStream
//!                                                        │
//!                                           timefmt::TimeFormatter
//! ```
//!
//! # Modules
//!
//! - [`db`]: SQLite document store
//! - [`models`]: Domain types (Patient, Prescription, Conversation, Message)
//! - [`sync`]: Change feed, write-through backend, live conversation and message lists
//! - [`timefmt`]: Heterogeneous timestamp normalization for display
//! - [`views`]: Search, filtering and dashboard grouping
//! - [`auth`]: Operator sign-in and user-facing error messages
//! - [`config`]: Environment configuration

pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod sync;
pub mod timefmt;
pub mod views;

// Re-export commonly used types
pub use auth::{AuthError, AuthErrorCode, AuthProvider, LocalAuth, Operator, Session};
pub use config::{ConfigError, DeskConfig};
pub use db::{Database, DbError, DbResult};
pub use models::{
    Conversation, ConversationPatch, Message, Patient, Prescription, RxStatus, StatusChange,
    StatusFilter,
};
pub use sync::{
    Backend, ChangeFeed, ConversationStore, DisplayMessage, LiveConversations, MessageStream,
    PatientLookup, StatusOutcome, Subscription,
};
pub use timefmt::{RawTime, TimeFormatter};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum PharmDeskError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Carries the user-facing message
    #[error("{0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<db::DbError> for PharmDeskError {
    fn from(e: db::DbError) -> Self {
        match e {
            DbError::NotFound(what) => PharmDeskError::NotFound(what),
            DbError::InvalidInput(why) => PharmDeskError::InvalidInput(why),
            other => PharmDeskError::DatabaseError(other.to_string()),
        }
    }
}

impl From<auth::AuthError> for PharmDeskError {
    fn from(e: auth::AuthError) -> Self {
        PharmDeskError::AuthError(e.user_message().to_string())
    }
}

impl From<config::ConfigError> for PharmDeskError {
    fn from(e: config::ConfigError) -> Self {
        PharmDeskError::ConfigError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for PharmDeskError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        PharmDeskError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a desk store at the given path.
#[uniffi::export]
pub fn open_desk(path: String) -> Result<Arc<PharmDeskCore>, PharmDeskError> {
    let config = DeskConfig {
        db_path: path.into(),
        ..DeskConfig::default()
    };
    PharmDeskCore::with_config(config).map(Arc::new)
}

/// Create an in-memory desk (for testing).
#[uniffi::export]
pub fn open_desk_in_memory() -> Result<Arc<PharmDeskCore>, PharmDeskError> {
    let backend = Backend::open_in_memory()?;
    Ok(Arc::new(PharmDeskCore::from_parts(
        backend,
        DeskConfig::default(),
    )))
}

/// Open the desk described by the `PHARMDESK_*` environment variables.
#[uniffi::export]
pub fn open_desk_from_env() -> Result<Arc<PharmDeskCore>, PharmDeskError> {
    let config = DeskConfig::from_env()?;
    PharmDeskCore::with_config(config).map(Arc::new)
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe desk wrapper for FFI.
///
/// Live lists are kept current by push subscriptions; the shell reads them
/// back with [`PharmDeskCore::conversations`] and [`PharmDeskCore::messages`].
#[derive(uniffi::Object)]
pub struct PharmDeskCore {
    backend: Arc<Mutex<Backend>>,
    config: DeskConfig,
    formatter: TimeFormatter,
    session: Mutex<Session>,
    conversations: Mutex<Option<LiveConversations>>,
    stream: Mutex<MessageStream>,
}

impl PharmDeskCore {
    fn with_config(config: DeskConfig) -> Result<Self, PharmDeskError> {
        let backend = Backend::open(&config.db_path)?;
        Ok(Self::from_parts(backend, config))
    }

    fn from_parts(backend: Backend, config: DeskConfig) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            formatter: config.formatter(),
            config,
            session: Mutex::new(Session::new()),
            conversations: Mutex::new(None),
            stream: Mutex::new(MessageStream::new()),
        }
    }

    fn operator_uid(&self) -> Result<String, PharmDeskError> {
        self.session
            .lock()?
            .current()
            .map(|operator| operator.uid.clone())
            .ok_or_else(|| PharmDeskError::AuthError("Please sign in first.".into()))
    }
}

#[uniffi::export]
impl PharmDeskCore {
    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Sign in and start watching the operator's conversations.
    ///
    /// The previous operator's open conversation and list are released. On
    /// failure the previous session is left untouched.
    pub fn sign_in(&self, email: String, password: String) -> Result<FfiOperator, PharmDeskError> {
        let backend = self.backend.lock()?;
        let auth = LocalAuth::new(backend.db()).with_max_attempts(self.config.max_signin_attempts);

        let operator = auth.sign_in(&email, &password)?;
        let live = LiveConversations::subscribe(&backend, &operator.uid, |_| {})?;

        self.stream.lock()?.unsubscribe();
        if let Some(previous) = self.conversations.lock()?.replace(live) {
            previous.unsubscribe();
        }
        let operator = self.session.lock()?.establish(operator).clone();
        Ok(operator.into())
    }

    /// Sign out and release every live subscription.
    pub fn sign_out(&self) -> Result<(), PharmDeskError> {
        let backend = self.backend.lock()?;
        let auth = LocalAuth::new(backend.db());

        if let Some(live) = self.conversations.lock()?.take() {
            live.unsubscribe();
        }
        self.stream.lock()?.unsubscribe();
        self.session.lock()?.sign_out(&auth)?;
        Ok(())
    }

    /// The signed-in operator, if any.
    pub fn current_operator(&self) -> Result<Option<FfiOperator>, PharmDeskError> {
        let session = self.session.lock()?;
        Ok(session.current().cloned().map(|o| o.into()))
    }

    /// Create a pharmacist account.
    pub fn register_pharmacist(
        &self,
        email: String,
        name: String,
        password: String,
    ) -> Result<FfiOperator, PharmDeskError> {
        let backend = self.backend.lock()?;
        let operator = LocalAuth::new(backend.db()).register_pharmacist(&email, &name, &password)?;
        Ok(operator.into())
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// All patients, ordered by name.
    pub fn list_patients(&self) -> Result<Vec<FfiPatient>, PharmDeskError> {
        let backend = self.backend.lock()?;
        let patients = backend.db().list_patients()?;
        Ok(patients
            .iter()
            .map(|p| FfiPatient::new(p, &self.formatter))
            .collect())
    }

    /// Patients whose name contains `query`.
    pub fn search_patients(&self, query: String) -> Result<Vec<FfiPatient>, PharmDeskError> {
        let backend = self.backend.lock()?;
        let patients = backend.db().list_patients()?;
        Ok(views::search_patients(&patients, &query)
            .into_iter()
            .map(|p| FfiPatient::new(p, &self.formatter))
            .collect())
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: String) -> Result<Option<FfiPatient>, PharmDeskError> {
        let backend = self.backend.lock()?;
        let patient = backend.db().get_patient(&id)?;
        Ok(patient.map(|p| FfiPatient::new(&p, &self.formatter)))
    }

    // =========================================================================
    // Prescription Operations
    // =========================================================================

    /// A patient's prescriptions, newest first.
    pub fn patient_prescriptions(
        &self,
        patient_id: String,
    ) -> Result<Vec<FfiPrescription>, PharmDeskError> {
        let backend = self.backend.lock()?;
        let list = backend.db().list_prescriptions_for_patient(&patient_id)?;
        Ok(list
            .iter()
            .map(|rx| FfiPrescription::new(rx, &self.formatter))
            .collect())
    }

    /// A patient's prescriptions split into active and completed, newest first.
    pub fn patient_prescription_split(
        &self,
        patient_id: String,
    ) -> Result<FfiPrescriptionSplit, PharmDeskError> {
        let backend = self.backend.lock()?;
        let list = backend.db().list_prescriptions_for_patient(&patient_id)?;
        let (active, completed) = views::split_active(&list);
        let convert = |group: Vec<&Prescription>| -> Vec<FfiPrescription> {
            group
                .into_iter()
                .map(|rx| FfiPrescription::new(rx, &self.formatter))
                .collect()
        };
        Ok(FfiPrescriptionSplit {
            active: convert(active),
            completed: convert(completed),
        })
    }

    /// Dashboard request list: search plus status filter ("all" or any status spelling).
    pub fn search_requests(
        &self,
        query: String,
        status_filter: String,
    ) -> Result<Vec<FfiPrescription>, PharmDeskError> {
        let filter = StatusFilter::parse(&status_filter).ok_or_else(|| {
            PharmDeskError::InvalidInput(format!("Unknown status filter: {}", status_filter))
        })?;

        let backend = self.backend.lock()?;
        let requests = backend.db().list_prescriptions()?;
        let patients = backend.db().list_patients()?;
        Ok(views::search_requests(&requests, &patients, &query, filter)
            .into_iter()
            .map(|rx| FfiPrescription::new(rx, &self.formatter))
            .collect())
    }

    /// Dashboard header counts over open requests.
    pub fn request_stats(&self) -> Result<FfiRequestStats, PharmDeskError> {
        let backend = self.backend.lock()?;
        let requests = backend.db().list_open_prescriptions()?;
        Ok(views::RequestStats::from_requests(&requests).into())
    }

    /// Open requests grouped into dashboard columns, in workflow order.
    pub fn grouped_requests(&self) -> Result<Vec<FfiStatusGroup>, PharmDeskError> {
        let backend = self.backend.lock()?;
        let requests = backend.db().list_open_prescriptions()?;
        Ok(views::group_by_status(&requests)
            .into_iter()
            .map(|(status, group)| FfiStatusGroup {
                status: status.label().to_string(),
                heading: views::dashboard_label(status).to_string(),
                requests: group
                    .into_iter()
                    .map(|rx| FfiPrescription::new(rx, &self.formatter))
                    .collect(),
            })
            .collect())
    }

    /// Confirmation prompt for a status change, or None if nothing would change.
    pub fn status_change_prompt(
        &self,
        prescription_id: String,
        status: String,
    ) -> Result<Option<String>, PharmDeskError> {
        let new_status = parse_status(&status)?;
        let backend = self.backend.lock()?;
        let current = backend
            .db()
            .get_prescription(&prescription_id)?
            .ok_or_else(|| PharmDeskError::NotFound(format!("Prescription {}", prescription_id)))?;
        Ok(StatusChange::plan(&current, new_status, None).map(|c| c.confirmation_prompt()))
    }

    /// Commit a status change the operator has already confirmed.
    pub fn update_prescription_status(
        &self,
        prescription_id: String,
        status: String,
        note: Option<String>,
    ) -> Result<FfiPrescription, PharmDeskError> {
        let new_status = parse_status(&status)?;
        let backend = self.backend.lock()?;
        let outcome = backend.change_status(&prescription_id, new_status, note.as_deref(), |_| true)?;

        match outcome {
            StatusOutcome::Unchanged(rx) | StatusOutcome::Committed(rx) => {
                Ok(FfiPrescription::new(&rx, &self.formatter))
            }
            StatusOutcome::Declined => Err(PharmDeskError::InvalidInput(
                "Status change was not confirmed".into(),
            )),
        }
    }

    /// Attach a pharmacist message to a prescription.
    pub fn add_pharmacist_message(
        &self,
        prescription_id: String,
        text: String,
    ) -> Result<FfiPrescription, PharmDeskError> {
        let backend = self.backend.lock()?;
        let rx = backend.record_pharmacist_message(&prescription_id, &text)?;
        Ok(FfiPrescription::new(&rx, &self.formatter))
    }

    // =========================================================================
    // Messaging Operations
    // =========================================================================

    /// The operator's conversations, most recent first. Empty when signed out.
    pub fn conversations(&self) -> Result<Vec<FfiConversation>, PharmDeskError> {
        let live = self.conversations.lock()?;
        Ok(live
            .as_ref()
            .map(LiveConversations::snapshot)
            .unwrap_or_default()
            .iter()
            .map(|c| FfiConversation::new(c, &self.formatter))
            .collect())
    }

    /// Existing conversation with a patient, if any.
    pub fn conversation_with_patient(
        &self,
        patient_id: String,
    ) -> Result<Option<FfiConversation>, PharmDeskError> {
        let live = self.conversations.lock()?;
        Ok(live
            .as_ref()
            .and_then(|l| l.find_with_participant(&patient_id))
            .map(|c| FfiConversation::new(&c, &self.formatter)))
    }

    /// Watch a conversation's messages, replacing any previous one.
    pub fn open_conversation(&self, conversation_id: String) -> Result<(), PharmDeskError> {
        let backend = self.backend.lock()?;
        if backend.db().get_conversation(&conversation_id)?.is_none() {
            return Err(PharmDeskError::NotFound(format!(
                "Conversation {}",
                conversation_id
            )));
        }
        self.stream
            .lock()?
            .subscribe(&backend, &conversation_id, |_| {})?;
        Ok(())
    }

    /// Stop watching the open conversation.
    pub fn close_conversation(&self) -> Result<(), PharmDeskError> {
        self.stream.lock()?.unsubscribe();
        Ok(())
    }

    /// Start (or continue) a conversation with a patient and open it.
    pub fn start_conversation(
        &self,
        patient_id: String,
        text: String,
    ) -> Result<FfiConversation, PharmDeskError> {
        let uid = self.operator_uid()?;
        let backend = self.backend.lock()?;
        let (conversation, _) = backend.start_conversation(&uid, &patient_id, &text)?;

        if let Some(live) = self.conversations.lock()?.as_ref() {
            live.upsert(ConversationPatch::from(conversation.clone()));
        }
        self.stream
            .lock()?
            .subscribe(&backend, &conversation.id, |_| {})?;
        Ok(FfiConversation::new(&conversation, &self.formatter))
    }

    /// Send a message to the open conversation.
    pub fn send_message(&self, text: String) -> Result<FfiMessage, PharmDeskError> {
        let uid = self.operator_uid()?;
        let backend = self.backend.lock()?;
        let message = self.stream.lock()?.send(&backend, &uid, &text)?;
        Ok(FfiMessage::new(&DisplayMessage::from(&message), &self.formatter))
    }

    /// Messages of the open conversation, including unconfirmed sends.
    pub fn messages(&self) -> Result<Vec<FfiMessage>, PharmDeskError> {
        let stream = self.stream.lock()?;
        Ok(stream
            .messages()
            .iter()
            .map(|m| FfiMessage::new(m, &self.formatter))
            .collect())
    }
}

fn parse_status(status: &str) -> Result<RxStatus, PharmDeskError> {
    RxStatus::parse(status)
        .ok_or_else(|| PharmDeskError::InvalidInput(format!("Unknown status: {}", status)))
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe operator.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOperator {
    pub uid: String,
    pub email: String,
    pub name: String,
}

impl From<Operator> for FfiOperator {
    fn from(operator: Operator) -> Self {
        Self {
            uid: operator.uid,
            email: operator.email,
            name: operator.name,
        }
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub full_name: String,
    pub date_of_birth: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub medical_id: Option<String>,
    pub primary_doctor: Option<String>,
    pub allergies: Vec<String>,
    pub has_allergies: bool,
}

impl FfiPatient {
    fn new(patient: &Patient, formatter: &TimeFormatter) -> Self {
        let dob = patient
            .date_of_birth
            .clone()
            .map(RawTime::Text)
            .unwrap_or(RawTime::Absent);
        Self {
            id: patient.id.clone(),
            full_name: patient.full_name(),
            date_of_birth: formatter.format_date(&dob),
            phone: patient.phone.clone(),
            email: patient.email.clone(),
            medical_id: patient.medical_id.clone(),
            primary_doctor: patient.primary_doctor.clone(),
            allergies: patient.allergies.clone(),
            has_allergies: patient.has_allergies(),
        }
    }
}

/// FFI-safe prescription.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrescription {
    pub id: String,
    pub patient_id: String,
    pub rx_number: String,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub prescribed_date: String,
    /// Stored token, either spelling
    pub status: String,
    /// Canonical label, None for unrecognized tokens
    pub status_label: Option<String>,
    pub completed: bool,
    pub status_history: Vec<FfiStatusUpdate>,
    pub pharmacist_messages: Vec<FfiPharmacistMessage>,
}

impl FfiPrescription {
    fn new(rx: &Prescription, formatter: &TimeFormatter) -> Self {
        Self {
            id: rx.id.clone(),
            patient_id: rx.for_user.clone(),
            rx_number: rx.rx_number.clone(),
            medication_name: rx.medication_name.clone(),
            dosage: rx.dosage.clone(),
            prescribed_date: formatter.format_date(&rx.prescribed_date),
            status: rx.status.clone(),
            status_label: rx.current_status().map(|s| s.label().to_string()),
            completed: rx.is_completed(),
            status_history: rx
                .status_history
                .iter()
                .map(|u| FfiStatusUpdate {
                    status: u.status.clone(),
                    date: formatter.format_date(&u.timestamp),
                    time: formatter.format_time(&u.timestamp),
                    message: u.message.clone(),
                })
                .collect(),
            pharmacist_messages: rx
                .pharmacist_messages
                .iter()
                .map(|m| FfiPharmacistMessage {
                    id: m.id.clone(),
                    content: m.content.clone(),
                    date: formatter.format_long_date(&m.timestamp),
                    time: formatter.format_time(&m.timestamp),
                })
                .collect(),
        }
    }
}

/// FFI-safe status history entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStatusUpdate {
    pub status: String,
    pub date: String,
    pub time: String,
    pub message: String,
}

/// FFI-safe pharmacist message.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPharmacistMessage {
    pub id: String,
    pub content: String,
    pub date: String,
    pub time: String,
}

/// One dashboard column.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStatusGroup {
    /// Canonical status label
    pub status: String,
    /// Column heading
    pub heading: String,
    pub requests: Vec<FfiPrescription>,
}

/// A patient's prescriptions for the detail view.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrescriptionSplit {
    pub active: Vec<FfiPrescription>,
    pub completed: Vec<FfiPrescription>,
}

/// FFI-safe dashboard counts.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRequestStats {
    pub total: u32,
    pub new_requests: u32,
    pub urgent: u32,
    pub ready: u32,
}

impl From<views::RequestStats> for FfiRequestStats {
    fn from(stats: views::RequestStats) -> Self {
        Self {
            total: stats.total as u32,
            new_requests: stats.new as u32,
            urgent: stats.urgent as u32,
            ready: stats.ready as u32,
        }
    }
}

/// FFI-safe conversation.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConversation {
    pub id: String,
    pub participants: Vec<String>,
    pub patient_name: Option<String>,
    pub last_message: String,
    pub last_message_time: String,
}

impl FfiConversation {
    fn new(conversation: &Conversation, formatter: &TimeFormatter) -> Self {
        Self {
            id: conversation.id.clone(),
            participants: conversation.participants.clone(),
            patient_name: conversation.patient_name.clone(),
            last_message: conversation.last_message.clone(),
            last_message_time: formatter.format_time(&conversation.last_message_time.into()),
        }
    }
}

/// FFI-safe message.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub time: String,
    /// Not yet confirmed by the store
    pub pending: bool,
}

impl FfiMessage {
    fn new(message: &DisplayMessage, formatter: &TimeFormatter) -> Self {
        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            text: message.text.clone(),
            time: formatter.format_time(&message.timestamp),
            pending: message.pending,
        }
    }
}
