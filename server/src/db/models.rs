//! Durable records owned by the message store.
//! Serialized in camelCase because they travel inside live events and REST bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User record in the users table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Store-generated id (UUIDv7); the identity used on the live connection
    pub id: String,
    /// Subject issued by the identity provider
    pub external_id: String,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile fields supplied by the identity provider when a user is synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: String,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

/// Message record in the messages table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
