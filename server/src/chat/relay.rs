//! Validation and persistence for `send-message`.
//!
//! The router calls [`validate`] synchronously before relaying anything, then
//! hands [`persist`] to a background task. The outcome comes back to the
//! router keyed by the sender's correlation token.

use crate::db::{Message, MessageStore, StorageError};

/// Default maximum message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Why a message was not delivered durably. The `Display` text is what the
/// sender sees in `message-failed.error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Missing inputs")]
    MissingInputs,

    #[error("Message must be 1-{max} characters")]
    InvalidLength { max: usize },

    #[error("Sender not found")]
    UnknownSender,

    #[error("Receiver not found")]
    UnknownReceiver,

    #[error("Failed to send message")]
    Storage(#[from] StorageError),
}

impl RelayError {
    /// Rejected before anything was relayed or persisted.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingInputs | Self::InvalidLength { .. })
    }
}

/// Check a message against the relay rules and return the content to store.
///
/// Length is measured in characters on the raw input; the stored content is
/// trimmed.
pub fn validate(receiver_id: &str, content: &str, max_chars: usize) -> Result<String, RelayError> {
    if receiver_id.trim().is_empty() {
        return Err(RelayError::MissingInputs);
    }
    let trimmed = content.trim();
    if trimmed.is_empty() || content.chars().count() > max_chars {
        return Err(RelayError::InvalidLength { max: max_chars });
    }
    Ok(trimmed.to_string())
}

/// Verify both participants exist, then create the durable record.
pub async fn persist(
    store: &dyn MessageStore,
    sender_id: &str,
    receiver_id: &str,
    content: &str,
) -> Result<Message, RelayError> {
    store
        .find_user_by_id(sender_id)
        .await?
        .ok_or(RelayError::UnknownSender)?;
    store
        .find_user_by_id(receiver_id)
        .await?
        .ok_or(RelayError::UnknownReceiver)?;

    let message = store.create_message(sender_id, receiver_id, content).await?;
    Ok(message)
}
