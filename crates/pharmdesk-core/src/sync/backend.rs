//! Write-through command surface over the document store.
//!
//! Every committed write publishes to the change feed so live subscriptions
//! receive the new result set before the call returns.

use std::path::Path;

use crate::db::{Database, DbError, DbResult};
use crate::models::{Conversation, Message, Prescription, RxStatus, StatusChange};

use super::feed::{ChangeFeed, Subscription, Topic};

/// Result of a status change request.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    /// Already in the requested status; nothing written
    Unchanged(Prescription),
    /// The operator declined the confirmation prompt
    Declined,
    /// Change written
    Committed(Prescription),
}

/// Database plus the change feed that observes it.
pub struct Backend {
    db: Database,
    feed: ChangeFeed,
}

impl Backend {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
        }
    }

    /// Open a file-backed store.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store.
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Read access to the store.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Push subscription over an operator's conversations, most recent first.
    ///
    /// The database is handed to `on_push` so it can run follow-up reads
    /// (name lookups) against the same snapshot.
    pub fn subscribe_conversations<F>(&self, operator_id: &str, mut on_push: F) -> DbResult<Subscription>
    where
        F: FnMut(&Database, Vec<Conversation>) + Send + 'static,
    {
        let operator_id = operator_id.to_string();
        self.feed.subscribe(
            &self.db,
            Topic::Conversations,
            Box::new(move |db| {
                let conversations = db.list_conversations_for(&operator_id)?;
                tracing::debug!(operator = %operator_id, count = conversations.len(), "Pushing conversations");
                on_push(db, conversations);
                Ok(())
            }),
        )
    }

    /// Push subscription over one conversation's messages, oldest first.
    pub fn subscribe_messages<F>(&self, conversation_id: &str, mut on_push: F) -> DbResult<Subscription>
    where
        F: FnMut(Vec<Message>) + Send + 'static,
    {
        let conversation_id = conversation_id.to_string();
        self.feed.subscribe(
            &self.db,
            Topic::Messages(conversation_id.clone()),
            Box::new(move |db| {
                let messages = db.list_messages(&conversation_id)?;
                tracing::debug!(conversation = %conversation_id, count = messages.len(), "Pushing messages");
                on_push(messages);
                Ok(())
            }),
        )
    }

    /// Send a message and refresh the conversation preview.
    ///
    /// Two separate writes: the message lands first, then the preview. A
    /// failure between them leaves the message in place with a stale preview.
    pub fn send_message(&self, conversation_id: &str, sender: &str, text: &str) -> DbResult<Message> {
        if text.trim().is_empty() {
            return Err(DbError::InvalidInput("Message cannot be empty".into()));
        }
        let conversation = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| DbError::NotFound(format!("Conversation {}", conversation_id)))?;
        if !conversation.includes(sender) {
            return Err(DbError::InvalidInput(format!(
                "{} is not a participant in conversation {}",
                sender, conversation_id
            )));
        }

        let message = Message::new(conversation_id, sender, text);
        self.db.insert_message(&message)?;
        self.feed
            .publish(&self.db, &Topic::Messages(conversation_id.to_string()));

        self.db
            .update_last_message(conversation_id, &message.text, message.timestamp)?;
        self.feed.publish(&self.db, &Topic::Conversations);

        tracing::info!(conversation = %conversation_id, message = %message.id, "Message sent");
        Ok(message)
    }

    /// Open a conversation with a patient and send the first message.
    ///
    /// An existing conversation between the pair is reused.
    pub fn start_conversation(
        &self,
        operator_id: &str,
        patient_id: &str,
        text: &str,
    ) -> DbResult<(Conversation, Message)> {
        if text.trim().is_empty() {
            return Err(DbError::InvalidInput("Message cannot be empty".into()));
        }

        let conversation_id = match self.db.find_conversation_between(operator_id, patient_id)? {
            Some(existing) => existing.id,
            None => {
                let conversation = Conversation::new(operator_id, patient_id, text);
                self.db.insert_conversation(&conversation)?;
                tracing::info!(conversation = %conversation.id, patient = %patient_id, "Conversation created");
                conversation.id
            }
        };

        let message = self.send_message(&conversation_id, operator_id, text)?;
        let conversation = self
            .db
            .get_conversation(&conversation_id)?
            .ok_or_else(|| DbError::NotFound(format!("Conversation {}", conversation_id)))?;
        Ok((conversation, message))
    }

    /// Move a prescription to a new status after operator confirmation.
    ///
    /// `confirm` is only asked when the status would actually change. The
    /// stored document is re-read at commit time.
    pub fn change_status<F>(
        &self,
        prescription_id: &str,
        new_status: RxStatus,
        note: Option<&str>,
        confirm: F,
    ) -> DbResult<StatusOutcome>
    where
        F: FnOnce(&StatusChange) -> bool,
    {
        let current = self
            .db
            .get_prescription(prescription_id)?
            .ok_or_else(|| DbError::NotFound(format!("Prescription {}", prescription_id)))?;

        let change = match StatusChange::plan(&current, new_status, note) {
            Some(change) => change,
            None => return Ok(StatusOutcome::Unchanged(current)),
        };

        if change.is_backward() {
            tracing::warn!(
                prescription = %prescription_id,
                from = ?change.from,
                to = %change.to,
                "Moving prescription back in the workflow"
            );
        }

        if !confirm(&change) {
            return Ok(StatusOutcome::Declined);
        }

        let updated = self.db.apply_status_change(prescription_id, new_status, note)?;
        tracing::info!(prescription = %prescription_id, status = %new_status, "Status updated");
        Ok(StatusOutcome::Committed(updated))
    }

    /// Append a pharmacist message to a prescription.
    pub fn record_pharmacist_message(&self, prescription_id: &str, text: &str) -> DbResult<Prescription> {
        let updated = self.db.add_pharmacist_message(prescription_id, text)?;
        tracing::info!(prescription = %prescription_id, "Pharmacist message recorded");
        Ok(updated)
    }
}
