//! Server-side presence tracking.
//!
//! In-memory map from user id to the one connection that currently receives
//! routed events for that user. Owned and mutated only by the event router;
//! rebuilt empty on every restart. The REST presence query at the bottom asks
//! the router rather than touching the map.
//!
//! One connection per user is deliberate: typing relay and confirmation
//! retargeting both resolve a user to a single connection. Supporting every
//! device of a user means turning the value into a set and fanning out in
//! `ws::broadcast::send_to_user`.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::ConnectionId;

/// What a `set_online` call did to the mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnlineTransition {
    /// The user had no reachable connection before
    CameOnline,
    /// Another connection held the mapping and lost it
    Superseded { previous: ConnectionId },
    /// The mapping already pointed at this connection
    Unchanged,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: HashMap<String, ConnectionId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connection_id` as the user's reachable connection. Last writer wins.
    pub fn set_online(&mut self, user_id: &str, connection_id: &str) -> OnlineTransition {
        match self
            .connections
            .insert(user_id.to_string(), connection_id.to_string())
        {
            None => OnlineTransition::CameOnline,
            Some(previous) if previous == connection_id => OnlineTransition::Unchanged,
            Some(previous) => OnlineTransition::Superseded { previous },
        }
    }

    pub fn resolve(&self, user_id: &str) -> Option<&str> {
        self.connections.get(user_id).map(String::as_str)
    }

    /// Remove the mapping for `owner_user_id` only if it still points at
    /// `connection_id`. A late disconnect from a superseded connection is a no-op.
    pub fn remove_by_connection(&mut self, owner_user_id: &str, connection_id: &str) -> bool {
        match self.connections.get(owner_user_id) {
            Some(current) if current == connection_id => {
                self.connections.remove(owner_user_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Every reachable user, sorted for stable snapshots.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.connections.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusResponse {
    pub user_id: String,
    pub is_online: bool,
}

/// GET /api/v1/users/online?userId=...: Is the user reachable right now. JWT auth required.
pub async fn get_online_status(
    State(state): State<AppState>,
    _claims: Claims,
    Query(query): Query<OnlineQuery>,
) -> Result<Json<OnlineStatusResponse>, ApiError> {
    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing userId parameter"))?;

    let is_online = state.router.is_online(&user_id).await;

    Ok(Json(OnlineStatusResponse { user_id, is_online }))
}
