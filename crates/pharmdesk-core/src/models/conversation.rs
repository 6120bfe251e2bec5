//! Conversation and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A two-party conversation between the operator and one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    /// Document ID
    pub id: String,
    /// `[operator, patient]`, fixed at creation
    pub participants: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Denormalized preview of the latest message
    pub last_message: String,
    /// Time of the latest message
    pub last_message_time: Option<DateTime<Utc>>,
    /// Cached patient display name (never persisted)
    pub patient_name: Option<String>,
}

impl Conversation {
    /// Create a new conversation between an operator and a patient.
    pub fn new(operator_id: &str, patient_id: &str, initial_message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            participants: vec![operator_id.to_string(), patient_id.to_string()],
            created_at: now,
            last_message: initial_message.to_string(),
            last_message_time: Some(now),
            patient_name: None,
        }
    }

    /// Check if a user participates in this conversation.
    pub fn includes(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }
}

/// Partial conversation used for local upserts.
///
/// `None` fields are left untouched on merge. Participants are only used
/// when the patch creates a new entry; an existing pair never changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub id: String,
    pub participants: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub patient_name: Option<String>,
}

impl ConversationPatch {
    /// Empty patch for a conversation ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the last-message preview.
    pub fn with_last_message(mut self, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.last_message = Some(text.into());
        self.last_message_time = Some(at);
        self
    }

    /// Set the cached patient name.
    pub fn with_patient_name(mut self, name: impl Into<String>) -> Self {
        self.patient_name = Some(name.into());
        self
    }

    /// Shallow-merge into an existing conversation.
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(created_at) = self.created_at {
            conversation.created_at = created_at;
        }
        if let Some(text) = &self.last_message {
            conversation.last_message = text.clone();
        }
        if let Some(at) = self.last_message_time {
            conversation.last_message_time = Some(at);
        }
        if let Some(name) = &self.patient_name {
            conversation.patient_name = Some(name.clone());
        }
    }

    /// Materialize a conversation from a patch for an unknown ID.
    ///
    /// Returns None unless the patch carries a pair of distinct participants.
    pub fn into_conversation(self) -> Option<Conversation> {
        let participants = self.participants.filter(|pair| {
            pair.len() == 2 && pair[0] != pair[1] && pair.iter().all(|p| !p.is_empty())
        })?;
        Some(Conversation {
            id: self.id,
            participants,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            last_message: self.last_message.unwrap_or_default(),
            last_message_time: self.last_message_time,
            patient_name: self.patient_name,
        })
    }
}

impl From<Conversation> for ConversationPatch {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            participants: Some(conversation.participants),
            created_at: Some(conversation.created_at),
            last_message: Some(conversation.last_message),
            last_message_time: conversation.last_message_time,
            patient_name: conversation.patient_name,
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Document ID
    pub id: String,
    /// Parent conversation
    pub conversation_id: String,
    /// Sender user ID
    pub sender: String,
    /// Message body
    pub text: String,
    /// Server-assigned send time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(conversation_id: &str, sender: &str, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation() {
        let conv = Conversation::new("P1", "U1", "Hello");
        assert_eq!(conv.participants, vec!["P1".to_string(), "U1".to_string()]);
        assert_eq!(conv.last_message, "Hello");
        assert!(conv.includes("U1"));
        assert_eq!(conv.other_participant("P1"), Some("U1"));
    }

    #[test]
    fn test_patch_preserves_absent_fields() {
        let mut conv = Conversation::new("P1", "U1", "Hello");
        conv.patient_name = Some("Jane Doe".into());
        let created_at = conv.created_at;

        let later = Utc::now();
        ConversationPatch::new(conv.id.clone())
            .with_last_message("Thanks", later)
            .apply_to(&mut conv);

        assert_eq!(conv.last_message, "Thanks");
        assert_eq!(conv.last_message_time, Some(later));
        assert_eq!(conv.patient_name.as_deref(), Some("Jane Doe"));
        assert_eq!(conv.created_at, created_at);
    }

    #[test]
    fn test_patch_never_changes_participants() {
        let mut conv = Conversation::new("P1", "U1", "Hello");
        let patch = ConversationPatch {
            participants: Some(vec!["P2".into(), "U9".into()]),
            ..ConversationPatch::new(conv.id.clone())
        };
        patch.apply_to(&mut conv);
        assert_eq!(conv.participants, vec!["P1".to_string(), "U1".to_string()]);
    }

    #[test]
    fn test_into_conversation_needs_pair() {
        assert!(ConversationPatch::new("c1").into_conversation().is_none());

        let conv = Conversation::new("P1", "U1", "Hello");
        let rebuilt = ConversationPatch::from(conv.clone()).into_conversation();
        assert_eq!(rebuilt, Some(conv));
    }
}
