//! Conversation database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_stamp, stamp, Database, DbError, DbResult};
use crate::models::Conversation;

const CONVERSATION_COLUMNS: &str = "id, participants, created_at, last_message, last_message_time";

impl Database {
    /// Insert a new conversation.
    pub fn insert_conversation(&self, conversation: &Conversation) -> DbResult<()> {
        let participants_json = serde_json::to_string(&conversation.participants)?;

        self.conn.execute(
            r#"
            INSERT INTO conversations (
                id, participants, created_at, last_message, last_message_time
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                conversation.id,
                participants_json,
                stamp(conversation.created_at),
                conversation.last_message,
                conversation.last_message_time.map(stamp),
            ],
        )?;
        Ok(())
    }

    /// Get a conversation by ID.
    pub fn get_conversation(&self, id: &str) -> DbResult<Option<Conversation>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE id = ?",
                    CONVERSATION_COLUMNS
                ),
                [id],
                ConversationRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List conversations a user participates in, most recent activity first.
    pub fn list_conversations_for(&self, user_id: &str) -> DbResult<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM conversations c
            WHERE EXISTS (SELECT 1 FROM json_each(c.participants) WHERE value = ?1)
            ORDER BY last_message_time DESC, created_at DESC
            "#,
            CONVERSATION_COLUMNS
        ))?;

        let rows = stmt.query_map([user_id], ConversationRow::from_row)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?.try_into()?);
        }
        Ok(conversations)
    }

    /// Find the conversation between two users, if one exists.
    pub fn find_conversation_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> DbResult<Option<Conversation>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM conversations c
                    WHERE EXISTS (SELECT 1 FROM json_each(c.participants) WHERE value = ?1)
                      AND EXISTS (SELECT 1 FROM json_each(c.participants) WHERE value = ?2)
                    ORDER BY created_at
                    LIMIT 1
                    "#,
                    CONVERSATION_COLUMNS
                ),
                params![user_a, user_b],
                ConversationRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Update the denormalized last-message preview.
    pub fn update_last_message(
        &self,
        id: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE conversations SET last_message = ?2, last_message_time = ?3 WHERE id = ?1",
            params![id, text, stamp(at)],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct ConversationRow {
    id: String,
    participants: String,
    created_at: String,
    last_message: String,
    last_message_time: Option<String>,
}

impl ConversationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            participants: row.get(1)?,
            created_at: row.get(2)?,
            last_message: row.get(3)?,
            last_message_time: row.get(4)?,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = DbError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: row.id,
            participants: serde_json::from_str(&row.participants)?,
            created_at: parse_stamp(&row.created_at)?,
            last_message: row.last_message,
            last_message_time: row
                .last_message_time
                .as_deref()
                .map(parse_stamp)
                .transpose()?,
            patient_name: None,
        })
    }
}
