//! SQLite schema definition.

/// Complete database schema for the pharmacy desk.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients (written by intake, read-only here)
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth TEXT,
    phone TEXT,
    email TEXT,
    medical_id TEXT,
    primary_doctor TEXT,
    allergies TEXT NOT NULL DEFAULT '[]',        -- JSON array of strings
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(last_name, first_name);

-- ============================================================================
-- Prescriptions
-- ============================================================================

CREATE TABLE IF NOT EXISTS prescriptions (
    id TEXT PRIMARY KEY,
    for_user TEXT NOT NULL,                      -- patient id
    rx_number TEXT NOT NULL,
    medication_name TEXT NOT NULL,
    dosage TEXT,
    prescribed_date TEXT NOT NULL DEFAULT 'null', -- JSON time value, any shape
    status TEXT NOT NULL,                        -- raw token, either spelling
    status_history TEXT NOT NULL DEFAULT '[]',   -- JSON array, append-only
    pharmacist_messages TEXT NOT NULL DEFAULT '[]', -- JSON array, append-only
    pharmacist_message TEXT,
    notified_on_status_change INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_prescriptions_patient ON prescriptions(for_user);

-- ============================================================================
-- Conversations
-- ============================================================================

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    participants TEXT NOT NULL,                  -- JSON array [operator, patient]
    created_at TEXT NOT NULL,
    last_message TEXT NOT NULL DEFAULT '',
    last_message_time TEXT                       -- fixed-width RFC 3339, sortable
);

CREATE INDEX IF NOT EXISTS idx_conversations_last_time ON conversations(last_message_time);

-- Participant pair is fixed once created
CREATE TRIGGER IF NOT EXISTS conversations_participants_immutable
BEFORE UPDATE OF participants ON conversations
WHEN new.participants IS NOT old.participants
BEGIN
    SELECT RAISE(ABORT, 'Conversation participants are immutable');
END;

-- Canonical message shape: one sub-collection per conversation
CREATE TABLE IF NOT EXISTS conversation_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    sender TEXT NOT NULL,
    text TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_messages_order
    ON conversation_messages(conversation_id, timestamp, seq);

-- Legacy message shape: flat collection keyed by conversation reference.
-- Read-only fallback; timestamps may be in any stored shape.
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_ref TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    body TEXT NOT NULL,
    timestamp_json TEXT NOT NULL DEFAULT 'null'
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_ref);

-- ============================================================================
-- Pharmacists (local sign-in)
-- ============================================================================

CREATE TABLE IF NOT EXISTS pharmacists (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name TEXT NOT NULL,
    password_salt TEXT NOT NULL,
    password_hash TEXT NOT NULL,                 -- hex SHA-256 of salt:password
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
