//! One live connection as seen by the router.

use super::protocol::ServerEvent;
use super::{ConnectionId, EventSender};

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no owner announced yet
    Unauthenticated,
    /// Owner bound via `user-online`
    Authenticated,
    /// Transport gone; terminal
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("connection already belongs to {bound}")]
    AlreadyBound { bound: String },

    #[error("announced user {announced} does not match verified identity {verified}")]
    IdentityMismatch { announced: String, verified: String },

    #[error("connection is closed")]
    Closed,
}

#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    /// Identity proven by the bearer token at upgrade, if any
    verified_user_id: Option<String>,
    owner_user_id: Option<String>,
    closed: bool,
    sender: EventSender,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, verified_user_id: Option<String>, sender: EventSender) -> Self {
        Self {
            id,
            verified_user_id,
            owner_user_id: None,
            closed: false,
            sender,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner_user_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.owner_user_id.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Bind the owner. One-way and one-time: re-announcing the same user is
    /// accepted (returns `false`), announcing anyone else is refused.
    pub fn bind_owner(&mut self, user_id: &str) -> Result<bool, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if let Some(verified) = &self.verified_user_id {
            if verified != user_id {
                return Err(SessionError::IdentityMismatch {
                    announced: user_id.to_string(),
                    verified: verified.clone(),
                });
            }
        }
        match &self.owner_user_id {
            Some(bound) if bound == user_id => Ok(false),
            Some(bound) => Err(SessionError::AlreadyBound {
                bound: bound.clone(),
            }),
            None => {
                self.owner_user_id = Some(user_id.to_string());
                Ok(true)
            }
        }
    }

    /// Queue an event for this connection. Returns false once the connection's
    /// writer is gone.
    pub fn emit(&self, event: ServerEvent) -> bool {
        if self.closed {
            return false;
        }
        tracing::trace!(connection_id = %self.id, event = event.name(), "emit");
        self.sender.send(event).is_ok()
    }

    /// Mark the session closed. Returns true only the first time.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }
}
