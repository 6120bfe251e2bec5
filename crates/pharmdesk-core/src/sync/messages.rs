//! Live message list for one conversation, with optimistic sends.
//!
//! The pushed server list is authoritative. Messages sent from this stream
//! show up immediately as pending entries and are dropped from the pending
//! set once the server list contains their confirmed ID.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::db::{DbError, DbResult};
use crate::models::Message;
use crate::timefmt::{RawTime, ServerTimestamp};

use super::backend::Backend;
use super::feed::Subscription;

/// A locally sent message not yet seen in a push.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    /// `temp-<uuid>`
    pub temp_id: String,
    pub sender: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// ID assigned by the store once the write succeeded
    pub confirmed_id: Option<String>,
}

/// One row of the rendered message list.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    /// Unresolved server handle for pending entries
    pub timestamp: RawTime,
    pub pending: bool,
}

impl From<&Message> for DisplayMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            text: message.text.clone(),
            timestamp: RawTime::Date(message.timestamp),
            pending: false,
        }
    }
}

impl From<&PendingMessage> for DisplayMessage {
    fn from(pending: &PendingMessage) -> Self {
        Self {
            id: pending.temp_id.clone(),
            sender: pending.sender.clone(),
            text: pending.text.clone(),
            timestamp: RawTime::Server(ServerTimestamp::pending()),
            pending: true,
        }
    }
}

/// Server messages in order, then pending messages the server has not echoed.
pub fn merge(pending: &[PendingMessage], server: &[Message]) -> Vec<DisplayMessage> {
    let mut display: Vec<DisplayMessage> = server.iter().map(DisplayMessage::from).collect();
    display.extend(
        pending
            .iter()
            .filter(|p| !is_echoed(p, server))
            .map(DisplayMessage::from),
    );
    display
}

fn is_echoed(pending: &PendingMessage, server: &[Message]) -> bool {
    pending
        .confirmed_id
        .as_deref()
        .map(|id| server.iter().any(|m| m.id == id))
        .unwrap_or(false)
}

#[derive(Debug, Default)]
struct StreamState {
    conversation_id: Option<String>,
    server: Vec<Message>,
    pending: Vec<PendingMessage>,
}

impl StreamState {
    fn prune(&mut self) {
        let server = &self.server;
        self.pending.retain(|p| !is_echoed(p, server));
    }

    fn display(&self) -> Vec<DisplayMessage> {
        merge(&self.pending, &self.server)
    }
}

type UpdateCallback = Arc<Mutex<dyn FnMut(&[DisplayMessage]) + Send>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn notify(state: &Mutex<StreamState>, callback: Option<&UpdateCallback>) {
    let display = lock(state).display();
    if let Some(callback) = callback {
        let mut on_update = lock(callback);
        (&mut *on_update)(&display);
    }
}

/// A single live message subscription.
#[derive(Default)]
pub struct MessageStream {
    state: Arc<Mutex<StreamState>>,
    on_update: Option<UpdateCallback>,
    subscription: Option<Subscription>,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch a conversation. Any previous subscription is torn down first.
    pub fn subscribe<F>(&mut self, backend: &Backend, conversation_id: &str, on_update: F) -> DbResult<()>
    where
        F: FnMut(&[DisplayMessage]) + Send + 'static,
    {
        self.unsubscribe();

        *lock(&self.state) = StreamState {
            conversation_id: Some(conversation_id.to_string()),
            ..StreamState::default()
        };
        let callback: UpdateCallback = Arc::new(Mutex::new(on_update));
        self.on_update = Some(Arc::clone(&callback));

        let state = Arc::clone(&self.state);
        let subscription = backend.subscribe_messages(conversation_id, move |messages| {
            {
                let mut state = lock(&state);
                state.server = messages;
                state.prune();
            }
            notify(&state, Some(&callback));
        })?;

        self.subscription = Some(subscription);
        Ok(())
    }

    /// Stop watching and forget the conversation. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.on_update = None;
        *lock(&self.state) = StreamState::default();
    }

    pub fn is_active(&self) -> bool {
        self.subscription
            .as_ref()
            .map(Subscription::is_active)
            .unwrap_or(false)
    }

    /// The watched conversation, if any.
    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.state).conversation_id.clone()
    }

    /// Current display list.
    pub fn messages(&self) -> Vec<DisplayMessage> {
        lock(&self.state).display()
    }

    /// Send a message with an optimistic local echo.
    ///
    /// On failure the local echo is withdrawn and the error returned.
    pub fn send(&self, backend: &Backend, sender: &str, text: &str) -> DbResult<Message> {
        if text.trim().is_empty() {
            return Err(DbError::InvalidInput("Message cannot be empty".into()));
        }
        let conversation_id = self
            .conversation_id()
            .ok_or_else(|| DbError::InvalidInput("No conversation selected".into()))?;

        let temp_id = format!("temp-{}", uuid::Uuid::new_v4());
        lock(&self.state).pending.push(PendingMessage {
            temp_id: temp_id.clone(),
            sender: sender.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            confirmed_id: None,
        });
        notify(&self.state, self.on_update.as_ref());

        match backend.send_message(&conversation_id, sender, text) {
            Ok(message) => {
                {
                    let mut state = lock(&self.state);
                    if let Some(pending) = state.pending.iter_mut().find(|p| p.temp_id == temp_id) {
                        pending.confirmed_id = Some(message.id.clone());
                    }
                    state.prune();
                }
                notify(&self.state, self.on_update.as_ref());
                Ok(message)
            }
            Err(e) => {
                lock(&self.state).pending.retain(|p| p.temp_id != temp_id);
                notify(&self.state, self.on_update.as_ref());
                tracing::warn!(conversation = %conversation_id, error = %e, "Message send failed");
                Err(e)
            }
        }
    }

    /// Re-read the server list without waiting for a push.
    pub fn refresh(&self, backend: &Backend) -> DbResult<()> {
        let Some(conversation_id) = self.conversation_id() else {
            return Ok(());
        };
        let messages = backend.db().list_messages(&conversation_id)?;
        {
            let mut state = lock(&self.state);
            state.server = messages;
            state.prune();
        }
        notify(&self.state, self.on_update.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn server_message(id: &str, text: &str, offset_secs: i64) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender: "P1".into(),
            text: text.into(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn pending(temp: &str, text: &str, confirmed: Option<&str>) -> PendingMessage {
        PendingMessage {
            temp_id: temp.into(),
            sender: "P1".into(),
            text: text.into(),
            created_at: Utc::now(),
            confirmed_id: confirmed.map(str::to_string),
        }
    }

    #[test]
    fn test_merge_appends_unechoed_pending() {
        let server = vec![server_message("m1", "Hello", 0)];
        let pending = vec![pending("temp-1", "Thanks", None)];

        let display = merge(&pending, &server);
        assert_eq!(display.len(), 2);
        assert_eq!(display[0].id, "m1");
        assert!(!display[0].pending);
        assert_eq!(display[1].id, "temp-1");
        assert!(display[1].pending);
        assert_eq!(display[1].timestamp, RawTime::Server(ServerTimestamp::pending()));
    }

    #[test]
    fn test_merge_drops_echoed_pending() {
        let server = vec![
            server_message("m1", "Hello", 0),
            server_message("m2", "Thanks", 1),
        ];
        let pending = vec![pending("temp-1", "Thanks", Some("m2"))];

        let display = merge(&pending, &server);
        let ids: Vec<&str> = display.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        // Merging again after the echo changes nothing
        assert_eq!(merge(&pending, &server), display);
        assert_eq!(merge(&[], &server), display);
    }

    #[test]
    fn test_send_without_conversation() {
        let backend = Backend::open_in_memory().unwrap();
        let stream = MessageStream::new();
        assert!(matches!(
            stream.send(&backend, "P1", "Hello"),
            Err(DbError::InvalidInput(_))
        ));
        assert!(!stream.is_active());
        assert!(stream.messages().is_empty());
    }
}
