//! Message database operations.
//!
//! Messages live in two shapes. The canonical one is a per-conversation
//! sub-collection (`conversation_messages`). Older deployments wrote a flat
//! `messages` collection keyed by a conversation reference, with timestamps
//! in whatever shape the client produced. Reads fall back to the flat shape
//! only when a conversation has no canonical messages.

use rusqlite::params;

use super::{parse_stamp, stamp, Database, DbResult};
use crate::models::Message;
use crate::timefmt::RawTime;

impl Database {
    /// Insert a message into its conversation.
    pub fn insert_message(&self, message: &Message) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO conversation_messages (id, conversation_id, sender, text, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                message.id,
                message.conversation_id,
                message.sender,
                message.text,
                stamp(message.timestamp),
            ],
        )?;
        Ok(())
    }

    /// List a conversation's messages in ascending timestamp order.
    pub fn list_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let messages = self.list_canonical_messages(conversation_id)?;
        if !messages.is_empty() {
            return Ok(messages);
        }
        self.list_legacy_messages(conversation_id)
    }

    /// Write a message in the flat legacy shape.
    pub fn insert_legacy_message(
        &self,
        id: &str,
        conversation_ref: &str,
        sender_id: &str,
        body: &str,
        timestamp: &RawTime,
    ) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO messages (id, conversation_ref, sender_id, body, timestamp_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                id,
                conversation_ref,
                sender_id,
                body,
                serde_json::to_string(timestamp)?,
            ],
        )?;
        Ok(())
    }

    fn list_canonical_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, conversation_id, sender, text, timestamp
            FROM conversation_messages
            WHERE conversation_id = ?
            ORDER BY timestamp, seq
            "#,
        )?;

        let rows = stmt.query_map([conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, conversation_id, sender, text, timestamp) = row?;
            messages.push(Message {
                id,
                conversation_id,
                sender,
                text,
                timestamp: parse_stamp(&timestamp)?,
            });
        }
        Ok(messages)
    }

    fn list_legacy_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, sender_id, body, timestamp_json
            FROM messages
            WHERE conversation_ref = ?
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map([conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, sender, text, timestamp_json) = row?;
            let raw = serde_json::from_str::<serde_json::Value>(&timestamp_json)
                .map(|value| RawTime::from(&value))
                .unwrap_or(RawTime::Text(timestamp_json));

            match raw.to_instant() {
                Some(timestamp) => messages.push(Message {
                    id,
                    conversation_id: conversation_id.to_string(),
                    sender,
                    text,
                    timestamp,
                }),
                None => {
                    tracing::debug!(message_id = %id, "Skipping legacy message with unusable timestamp");
                }
            }
        }

        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use chrono::{Duration, Utc};

    fn setup_db() -> (Database, Conversation) {
        let db = Database::open_in_memory().unwrap();
        let conv = Conversation::new("P1", "U1", "Hello");
        db.insert_conversation(&conv).unwrap();
        (db, conv)
    }

    #[test]
    fn test_insert_and_list_in_order() {
        let (db, conv) = setup_db();
        let base = Utc::now();

        let mut late = Message::new(&conv.id, "P1", "second");
        late.timestamp = base + Duration::seconds(5);
        let mut early = Message::new(&conv.id, "U1", "first");
        early.timestamp = base;

        db.insert_message(&late).unwrap();
        db.insert_message(&early).unwrap();

        let texts: Vec<String> = db
            .list_messages(&conv.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_equal_timestamps_keep_insert_order() {
        let (db, conv) = setup_db();
        let at = Utc::now();

        for text in ["a", "b", "c"] {
            let mut message = Message::new(&conv.id, "P1", text);
            message.timestamp = at;
            db.insert_message(&message).unwrap();
        }

        let texts: Vec<String> = db
            .list_messages(&conv.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_message_requires_conversation() {
        let db = Database::open_in_memory().unwrap();
        let message = Message::new("no-such-conversation", "P1", "hi");
        assert!(db.insert_message(&message).is_err());
    }

    #[test]
    fn test_legacy_fallback() {
        let (db, conv) = setup_db();

        db.insert_legacy_message(
            "m2",
            &conv.id,
            "U1",
            "later",
            &RawTime::Parts {
                seconds: 1_700_000_100,
                nanoseconds: 0,
            },
        )
        .unwrap();
        db.insert_legacy_message(
            "m1",
            &conv.id,
            "P1",
            "earlier",
            &RawTime::Text("2023-11-14T22:13:20Z".into()),
        )
        .unwrap();
        db.insert_legacy_message("m3", &conv.id, "P1", "broken", &RawTime::Absent)
            .unwrap();

        let texts: Vec<String> = db
            .list_messages(&conv.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["earlier", "later"]);
    }

    #[test]
    fn test_canonical_shape_wins() {
        let (db, conv) = setup_db();
        db.insert_legacy_message("old", &conv.id, "P1", "legacy", &RawTime::Date(Utc::now()))
            .unwrap();
        db.insert_message(&Message::new(&conv.id, "P1", "current"))
            .unwrap();

        let messages = db.list_messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "current");
    }
}
