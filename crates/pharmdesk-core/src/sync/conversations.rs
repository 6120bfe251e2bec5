//! Per-operator conversation list.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::db::{Database, DbResult};
use crate::models::{Conversation, ConversationPatch};

use super::backend::Backend;
use super::feed::Subscription;

/// Resolves a patient ID to a display name.
pub trait PatientLookup {
    fn patient_display_name(&self, patient_id: &str) -> DbResult<Option<String>>;
}

impl PatientLookup for Database {
    fn patient_display_name(&self, patient_id: &str) -> DbResult<Option<String>> {
        Ok(self.get_patient(patient_id)?.map(|p| p.full_name()))
    }
}

/// Local copy of the conversations an operator participates in.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    operator_id: String,
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new(operator_id: &str) -> Self {
        Self {
            operator_id: operator_id.to_string(),
            conversations: Vec::new(),
        }
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// The conversation that includes `participant_id`, if any.
    pub fn find_with_participant(&self, participant_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.includes(participant_id))
    }

    /// Replace the whole list with a pushed result set.
    ///
    /// Names already resolved for a conversation are kept.
    pub fn replace(&mut self, pushed: Vec<Conversation>) {
        let previous = std::mem::take(&mut self.conversations);
        self.conversations = pushed
            .into_iter()
            .map(|mut conversation| {
                if conversation.patient_name.is_none() {
                    conversation.patient_name = previous
                        .iter()
                        .find(|old| old.id == conversation.id)
                        .and_then(|old| old.patient_name.clone());
                }
                conversation
            })
            .collect();
    }

    /// Insert at the head, or shallow-merge into an existing entry.
    ///
    /// A patch for an unknown ID without a participant pair is dropped and
    /// false is returned.
    pub fn upsert(&mut self, patch: ConversationPatch) -> bool {
        if self.update(&patch) {
            return true;
        }
        let id = patch.id.clone();
        match patch.into_conversation() {
            Some(conversation) => {
                self.conversations.insert(0, conversation);
                true
            }
            None => {
                tracing::warn!(conversation = %id, "Ignoring new conversation without a participant pair");
                false
            }
        }
    }

    /// Merge into an existing entry. Returns false if the ID is unknown.
    pub fn update(&mut self, patch: &ConversationPatch) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == patch.id) {
            Some(conversation) => {
                patch.apply_to(conversation);
                true
            }
            None => false,
        }
    }

    /// Attach patient names to conversations that lack one.
    ///
    /// Lookup failures are logged and skipped. Returns how many names were
    /// attached.
    pub fn enrich_names<L: PatientLookup + ?Sized>(&mut self, lookup: &L) -> usize {
        let mut attached = 0;
        for conversation in &mut self.conversations {
            if conversation.patient_name.is_some() {
                continue;
            }
            let Some(patient_id) = conversation
                .other_participant(&self.operator_id)
                .map(str::to_string)
            else {
                continue;
            };

            match lookup.patient_display_name(&patient_id) {
                Ok(Some(name)) => {
                    conversation.patient_name = Some(name);
                    attached += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        conversation = %conversation.id,
                        patient = %patient_id,
                        error = %e,
                        "Failed to look up patient name"
                    );
                }
            }
        }
        attached
    }

}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`ConversationStore`] kept current by a push subscription.
pub struct LiveConversations {
    store: Arc<Mutex<ConversationStore>>,
    subscription: Subscription,
}

impl LiveConversations {
    /// Subscribe to an operator's conversations.
    ///
    /// `on_change` fires after every push and again after name enrichment
    /// when at least one name was attached. It runs without the store lock
    /// held.
    pub fn subscribe<F>(backend: &Backend, operator_id: &str, mut on_change: F) -> DbResult<Self>
    where
        F: FnMut(&[Conversation]) + Send + 'static,
    {
        let store = Arc::new(Mutex::new(ConversationStore::new(operator_id)));

        let listener_store = Arc::clone(&store);
        let subscription = backend.subscribe_conversations(operator_id, move |db, pushed| {
            let snapshot = {
                let mut store = lock(&listener_store);
                store.replace(pushed);
                store.conversations().to_vec()
            };
            on_change(&snapshot);

            let enriched = {
                let mut store = lock(&listener_store);
                match store.enrich_names(db) {
                    0 => None,
                    _ => Some(store.conversations().to_vec()),
                }
            };
            if let Some(snapshot) = enriched {
                on_change(&snapshot);
            }
        })?;

        Ok(Self {
            store,
            subscription,
        })
    }

    /// Current list.
    pub fn snapshot(&self) -> Vec<Conversation> {
        lock(&self.store).conversations().to_vec()
    }

    /// Apply a local change ahead of the next push. See [`ConversationStore::upsert`].
    pub fn upsert(&self, patch: ConversationPatch) -> bool {
        lock(&self.store).upsert(patch)
    }

    pub fn find_with_participant(&self, participant_id: &str) -> Option<Conversation> {
        lock(&self.store).find_with_participant(participant_id).cloned()
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use chrono::{Duration, Utc};

    struct FlakyLookup;

    impl PatientLookup for FlakyLookup {
        fn patient_display_name(&self, patient_id: &str) -> DbResult<Option<String>> {
            match patient_id {
                "U1" => Ok(Some("Jane Doe".into())),
                "U2" => Err(DbError::Constraint("lookup failed".into())),
                _ => Ok(None),
            }
        }
    }

    fn store_with(ids: &[(&str, &str)]) -> ConversationStore {
        let mut store = ConversationStore::new("P1");
        store.replace(
            ids.iter()
                .map(|(id, patient)| {
                    let mut c = Conversation::new("P1", patient, "hi");
                    c.id = id.to_string();
                    c
                })
                .collect(),
        );
        store
    }

    #[test]
    fn test_upsert_unknown_goes_to_head() {
        let mut store = store_with(&[("c1", "U1")]);
        store.upsert(ConversationPatch::from(Conversation::new("P1", "U9", "new")));

        assert_eq!(store.len(), 2);
        assert_eq!(store.conversations()[0].last_message, "new");
        assert_eq!(store.conversations()[1].id, "c1");
    }

    #[test]
    fn test_upsert_unknown_requires_participant_pair() {
        let mut store = store_with(&[("c1", "U1")]);

        assert!(!store.upsert(ConversationPatch::new("x").with_last_message("orphan", Utc::now())));
        let mut lonely = ConversationPatch::new("y");
        lonely.participants = Some(vec!["P1".into()]);
        assert!(!store.upsert(lonely));
        let mut same = ConversationPatch::new("z");
        same.participants = Some(vec!["P1".into(), "P1".into()]);
        assert!(!store.upsert(same));

        assert_eq!(store.len(), 1);
        assert!(store.get("x").is_none());

        // Known IDs still merge without participants
        assert!(store.upsert(ConversationPatch::new("c1").with_patient_name("Jane Doe")));
        assert_eq!(store.get("c1").unwrap().participants.len(), 2);
    }

    #[test]
    fn test_upsert_known_merges_supplied_fields() {
        let mut store = store_with(&[("c1", "U1"), ("c2", "U2")]);
        let before = store.get("c2").unwrap().clone();
        let at = Utc::now() + Duration::seconds(1);

        store.upsert(ConversationPatch::new("c2").with_last_message("Thanks", at));

        let after = store.get("c2").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(after.last_message, "Thanks");
        assert_eq!(after.last_message_time, Some(at));
        assert_eq!(after.participants, before.participants);
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn test_enrich_skips_failures() {
        let mut store = store_with(&[("c1", "U1"), ("c2", "U2"), ("c3", "U3")]);

        assert_eq!(store.enrich_names(&FlakyLookup), 1);
        assert_eq!(store.get("c1").unwrap().patient_name.as_deref(), Some("Jane Doe"));
        assert!(store.get("c2").unwrap().patient_name.is_none());
        assert!(store.get("c3").unwrap().patient_name.is_none());

        // Already named entries are not looked up again
        assert_eq!(store.enrich_names(&FlakyLookup), 0);
    }

    #[test]
    fn test_replace_keeps_cached_names() {
        let mut store = store_with(&[("c1", "U1")]);
        store.enrich_names(&FlakyLookup);

        let mut pushed = Conversation::new("P1", "U1", "newer");
        pushed.id = "c1".into();
        store.replace(vec![pushed]);

        let c1 = store.get("c1").unwrap();
        assert_eq!(c1.last_message, "newer");
        assert_eq!(c1.patient_name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_find_with_participant() {
        let store = store_with(&[("c1", "U1"), ("c2", "U2")]);
        assert_eq!(store.find_with_participant("U2").unwrap().id, "c2");
        assert!(store.find_with_participant("U7").is_none());
    }
}
