//! The durable-store seam.
//!
//! The realtime core only ever talks to persistence through [`MessageStore`], so the
//! router can be driven against SQLite in production and against scripted stores in
//! tests.

use async_trait::async_trait;

use super::models::{Message, NewUser, User};

/// Errors surfaced by a [`MessageStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// A schema constraint rejected the write (unknown foreign key, duplicate id, ...)
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Connectivity, locking or any other backend failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Constraint(err.to_string())
            }
            _ => StorageError::Backend(err.to_string()),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return the durable record with its generated id.
    async fn create_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StorageError>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StorageError>;

    /// Look up a user by the subject the identity provider issued.
    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StorageError>;

    /// Insert the user or refresh their profile, keyed by external id.
    async fn upsert_user(&self, profile: NewUser) -> Result<User, StorageError>;

    async fn list_users_except(&self, user_id: &str) -> Result<Vec<User>, StorageError>;

    /// Every message exchanged between two users, oldest first.
    async fn conversation(&self, user_a: &str, user_b: &str)
        -> Result<Vec<Message>, StorageError>;
}
