//! Fan-out helpers used by the router to reach connections.

use std::collections::HashMap;

use crate::chat::conversation::ConversationKey;
use crate::chat::presence::PresenceRegistry;

use super::protocol::ServerEvent;
use super::session::ConnectionSession;
use super::ConnectionId;

pub type Sessions = HashMap<ConnectionId, ConnectionSession>;

/// Where an out-of-band event should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The user's registered connection
    User(String),
    /// Every participant of a conversation
    Conversation(ConversationKey),
}

/// Send to the connection the registry holds for `user_id`.
/// Returns false when the user is not reachable.
pub fn send_to_user(
    sessions: &Sessions,
    presence: &PresenceRegistry,
    user_id: &str,
    event: ServerEvent,
) -> bool {
    presence
        .resolve(user_id)
        .and_then(|connection_id| sessions.get(connection_id))
        .map(|session| session.emit(event))
        .unwrap_or(false)
}

/// Send to every open connection except `except`. Returns how many were reached.
pub fn broadcast_except(sessions: &Sessions, except: &str, event: &ServerEvent) -> usize {
    sessions
        .values()
        .filter(|session| session.id() != except)
        .filter(|session| session.emit(event.clone()))
        .count()
}

/// Resolve a [`Target`] and send. Returns how many connections were reached.
pub fn send_to_target(
    sessions: &Sessions,
    presence: &PresenceRegistry,
    target: &Target,
    event: ServerEvent,
) -> usize {
    match target {
        Target::User(user_id) => send_to_user(sessions, presence, user_id, event) as usize,
        Target::Conversation(key) => {
            let (low, high) = key.participants();
            let mut reached = send_to_user(sessions, presence, low, event.clone()) as usize;
            if high != low {
                reached += send_to_user(sessions, presence, high, event) as usize;
            }
            reached
        }
    }
}
