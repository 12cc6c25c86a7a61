//! Reconciliation of one conversation's message list on the client.
//!
//! A message can reach the client up to three times: as the local optimistic
//! entry (or the peer's instant relay), as `message-confirmed`, and again from a
//! full conversation fetch. Entries are keyed by `message_id` once the durable
//! record is known and by `correlation_token` before that, so every path
//! converges on one entry per message.

use chrono::{DateTime, Utc};

use crate::chat::conversation::ConversationKey;
use crate::db::Message;
use crate::ws::protocol::{
    ClientEvent, MessageConfirmed, MessageFailed, NewMessage, SendMessage, ServerEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Emitted, no outcome yet
    Sending,
    /// Own message, durable record known
    Sent,
    /// Received from the peer
    Delivered,
    /// Rejected or not persisted; retryable
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub message_id: Option<String>,
    pub correlation_token: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

impl ChatEntry {
    fn from_durable(message: &Message, status: DeliveryStatus) -> Self {
        Self {
            message_id: Some(message.id.clone()),
            correlation_token: None,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            status,
            error: None,
        }
    }

    fn same_payload(&self, message: &Message) -> bool {
        self.sender_id == message.sender_id
            && self.receiver_id == message.receiver_id
            && self.content == message.content
    }
}

/// Client view of the conversation between the local user and one peer.
#[derive(Debug, Clone)]
pub struct ConversationState {
    local_user_id: String,
    key: ConversationKey,
    entries: Vec<ChatEntry>,
}

impl ConversationState {
    pub fn new(local_user_id: &str, peer_id: &str) -> Self {
        Self {
            local_user_id: local_user_id.to_string(),
            key: ConversationKey::new(local_user_id, peer_id),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn peer_id(&self) -> &str {
        self.key.peer_of(&self.local_user_id).unwrap_or_default()
    }

    fn belongs(&self, sender_id: &str, receiver_id: &str) -> bool {
        self.key.contains(sender_id)
            && self.key.contains(receiver_id)
            && (sender_id == self.local_user_id || receiver_id == self.local_user_id)
    }

    fn status_for(&self, sender_id: &str) -> DeliveryStatus {
        if sender_id == self.local_user_id {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Delivered
        }
    }

    fn position_by_token(&self, token: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.correlation_token.as_deref() == Some(token))
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.message_id.as_deref() == Some(id))
    }

    /// Append an optimistic entry and return the event to emit.
    pub fn send(&mut self, content: &str) -> ClientEvent {
        let token = uuid::Uuid::now_v7().to_string();
        let peer_id = self.peer_id().to_string();
        let content = content.trim().to_string();

        self.entries.push(ChatEntry {
            message_id: None,
            correlation_token: Some(token.clone()),
            sender_id: self.local_user_id.clone(),
            receiver_id: peer_id.clone(),
            content: content.clone(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
            error: None,
        });

        ClientEvent::SendMessage(SendMessage {
            receiver_id: peer_id,
            content,
            correlation_token: token,
        })
    }

    /// Apply a server event. Returns whether the entry list changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::NewMessage(message) => self.on_new_message(message),
            ServerEvent::MessageConfirmed(confirmed) => self.on_confirmed(confirmed),
            ServerEvent::MessageFailed(failed) => self.on_failed(failed),
            ServerEvent::MessageNotification(notification) => {
                self.on_new_message(&NewMessage::durable(&notification.message))
            }
            _ => false,
        }
    }

    pub fn on_new_message(&mut self, message: &NewMessage) -> bool {
        if !self.belongs(&message.sender_id, &message.receiver_id) {
            return false;
        }

        if let Some(id) = &message.id {
            if self.position_by_id(id).is_some() {
                return false;
            }
        }

        if let Some(token) = &message.correlation_token {
            if let Some(idx) = self.position_by_token(token) {
                let entry = &mut self.entries[idx];
                if entry.sender_id != message.sender_id {
                    tracing::debug!(token = %token, "Correlation token reused by another sender");
                } else if entry.message_id.is_none() && message.id.is_some() {
                    entry.message_id = message.id.clone();
                    return true;
                }
                return false;
            }
            // Our own echo for a token we no longer hold; the confirmation carries the record.
            if message.sender_id == self.local_user_id {
                return false;
            }
        }

        self.entries.push(ChatEntry {
            message_id: message.id.clone(),
            correlation_token: message.correlation_token.clone(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            status: self.status_for(&message.sender_id),
            error: None,
        });
        true
    }

    pub fn on_confirmed(&mut self, confirmed: &MessageConfirmed) -> bool {
        let message = &confirmed.message;
        if !self.belongs(&message.sender_id, &message.receiver_id) {
            return false;
        }

        match self.position_by_token(&confirmed.correlation_token) {
            Some(idx)
                if self.entries[idx]
                    .message_id
                    .as_deref()
                    .is_some_and(|id| id != message.id) =>
            {
                // A fetch paired the token with an earlier record of the same
                // text. That record stays; the token moves to the confirmed one.
                self.entries[idx].correlation_token = None;
                match self.position_by_id(&message.id) {
                    Some(existing) => {
                        let entry = &mut self.entries[existing];
                        entry.correlation_token = Some(confirmed.correlation_token.clone());
                        entry.status = DeliveryStatus::Sent;
                        entry.error = None;
                    }
                    None => {
                        let mut entry = ChatEntry::from_durable(message, DeliveryStatus::Sent);
                        entry.correlation_token = Some(confirmed.correlation_token.clone());
                        self.entries.push(entry);
                    }
                }
                true
            }
            Some(idx) => {
                // A fetch may already have produced an entry for this id.
                if let Some(dup) = self.position_by_id(&message.id) {
                    if dup != idx {
                        self.entries.remove(dup);
                        return self.on_confirmed(confirmed);
                    }
                }
                let entry = &mut self.entries[idx];
                entry.message_id = Some(message.id.clone());
                entry.content = message.content.clone();
                entry.created_at = message.created_at;
                entry.status = DeliveryStatus::Sent;
                entry.error = None;
                true
            }
            None if self.position_by_id(&message.id).is_some() => false,
            None => {
                let mut entry = ChatEntry::from_durable(message, DeliveryStatus::Sent);
                entry.correlation_token = Some(confirmed.correlation_token.clone());
                self.entries.push(entry);
                true
            }
        }
    }

    pub fn on_failed(&mut self, failed: &MessageFailed) -> bool {
        let Some(idx) = self.position_by_token(&failed.correlation_token) else {
            return false;
        };
        let entry = &mut self.entries[idx];
        if entry.message_id.is_some() || entry.sender_id != self.local_user_id {
            return false;
        }
        entry.status = DeliveryStatus::Failed;
        entry.error = Some(failed.error.clone());
        true
    }

    /// Re-emit a failed message with its original token and content.
    pub fn retry(&mut self, correlation_token: &str) -> Option<ClientEvent> {
        let idx = self.position_by_token(correlation_token)?;
        let entry = &mut self.entries[idx];
        if entry.status != DeliveryStatus::Failed {
            return None;
        }
        entry.status = DeliveryStatus::Sending;
        entry.error = None;

        Some(ClientEvent::SendMessage(SendMessage {
            receiver_id: entry.receiver_id.clone(),
            content: entry.content.clone(),
            correlation_token: correlation_token.to_string(),
        }))
    }

    /// Replace the list with a full fetch of the conversation.
    ///
    /// Fetched records become the authoritative order. Entries that only know
    /// their token are matched to the earliest unclaimed fetched record with the
    /// same sender, receiver and content; entries that found no record stay at
    /// the end in their previous order.
    pub fn merge_fetch(&mut self, messages: &[Message]) {
        let mut previous: Vec<Option<ChatEntry>> =
            std::mem::take(&mut self.entries).into_iter().map(Some).collect();

        let mut merged = Vec::with_capacity(messages.len() + previous.len());
        for message in messages {
            if !self.belongs(&message.sender_id, &message.receiver_id) {
                continue;
            }

            let by_id = previous.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|e| e.message_id.as_deref() == Some(message.id.as_str()))
            });
            let claimed = by_id.or_else(|| {
                previous.iter().position(|slot| {
                    slot.as_ref()
                        .is_some_and(|e| e.message_id.is_none() && e.same_payload(message))
                })
            });

            let mut entry = ChatEntry::from_durable(message, self.status_for(&message.sender_id));
            if let Some(old) = claimed.and_then(|idx| previous[idx].take()) {
                entry.correlation_token = old.correlation_token;
            }
            merged.push(entry);
        }

        // Records with an id that the fetch did not return are dropped.
        merged.extend(
            previous
                .into_iter()
                .flatten()
                .filter(|e| e.message_id.is_none()),
        );
        self.entries = merged;
    }

    /// Tokens still `Sending` that were emitted before `cutoff`.
    pub fn pending_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.status == DeliveryStatus::Sending && e.created_at < cutoff)
            .filter_map(|e| e.correlation_token.clone())
            .collect()
    }
}
