//! The event router: the protocol state machine for every live connection.
//!
//! All session and presence state lives inside one [`EventRouter`] that runs on
//! a single task and processes [`RouterCommand`]s in order. Handlers never
//! await, so every registry mutation, typing relay and instant message relay
//! completes within one command. The only suspending work, persisting a
//! message, runs on its own task and re-enters the router as
//! [`RouterCommand::Persisted`], where the sender is resolved again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::chat::presence::{OnlineTransition, PresenceRegistry};
use crate::chat::relay::{self, RelayError, MAX_CONTENT_CHARS};
use crate::db::{Message, MessageStore};

use super::broadcast::{broadcast_except, send_to_target, send_to_user, Sessions, Target};
use super::protocol::{
    ClientEvent, MessageConfirmed, MessageFailed, NewMessage, PresenceChanged, PresenceSnapshot,
    SendMessage, ServerEvent, StopTyping, Typing, UserStatus, UserStopTyping, UserTyping,
};
use super::session::ConnectionSession;
use super::{ConnectionId, EventSender};

#[derive(Debug)]
pub enum RouterCommand {
    /// Transport accepted a connection
    Connect {
        connection_id: ConnectionId,
        verified_user_id: Option<String>,
        sender: EventSender,
    },
    /// A decoded frame from a connection
    Inbound {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    /// Terminal close notification for a connection
    Disconnect { connection_id: ConnectionId },
    /// A persistence task finished
    Persisted {
        sender_id: String,
        correlation_token: String,
        outcome: Result<Message, RelayError>,
    },
    /// Push an event produced outside the live protocol (REST sends)
    Deliver { target: Target, event: ServerEvent },
    IsOnline {
        user_id: String,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_content_chars: usize,
    /// Also emit `user-online-status` / `user-offline-status`
    pub legacy_presence_events: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            max_content_chars: MAX_CONTENT_CHARS,
            legacy_presence_events: false,
        }
    }
}

/// Cloneable handle used by connection actors and HTTP handlers.
#[derive(Clone, Debug)]
pub struct RouterHandle {
    commands: mpsc::UnboundedSender<RouterCommand>,
}

impl RouterHandle {
    pub fn new(commands: mpsc::UnboundedSender<RouterCommand>) -> Self {
        Self { commands }
    }

    fn send(&self, command: RouterCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Event router is not running, command dropped");
        }
    }

    pub fn connect(
        &self,
        connection_id: ConnectionId,
        verified_user_id: Option<String>,
        sender: EventSender,
    ) {
        self.send(RouterCommand::Connect {
            connection_id,
            verified_user_id,
            sender,
        });
    }

    pub fn inbound(&self, connection_id: ConnectionId, event: ClientEvent) {
        self.send(RouterCommand::Inbound {
            connection_id,
            event,
        });
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.send(RouterCommand::Disconnect { connection_id });
    }

    pub fn deliver(&self, target: Target, event: ServerEvent) {
        self.send(RouterCommand::Deliver { target, event });
    }

    /// Presence query answered from the registry. False if the router is gone.
    pub async fn is_online(&self, user_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::IsOnline {
            user_id: user_id.to_string(),
            reply,
        });
        rx.await.unwrap_or(false)
    }
}

/// Start the router task and return its handle.
pub fn spawn_router(store: Arc<dyn MessageStore>, options: RouterOptions) -> RouterHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = EventRouter::new(store, options, tx.downgrade());
    tokio::spawn(router.run(rx));
    RouterHandle::new(tx)
}

pub struct EventRouter {
    sessions: Sessions,
    presence: PresenceRegistry,
    store: Arc<dyn MessageStore>,
    /// Weak so the router stops once every handle is dropped
    commands: mpsc::WeakUnboundedSender<RouterCommand>,
    options: RouterOptions,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        options: RouterOptions,
        commands: mpsc::WeakUnboundedSender<RouterCommand>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            presence: PresenceRegistry::new(),
            store,
            commands,
            options,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RouterCommand>) {
        tracing::info!("Event router started");
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        tracing::info!("Event router stopped");
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn session(&self, connection_id: &str) -> Option<&ConnectionSession> {
        self.sessions.get(connection_id)
    }

    /// Apply one command. Never suspends.
    pub fn handle(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Connect {
                connection_id,
                verified_user_id,
                sender,
            } => self.on_connect(connection_id, verified_user_id, sender),
            RouterCommand::Inbound {
                connection_id,
                event,
            } => self.on_inbound(&connection_id, event),
            RouterCommand::Disconnect { connection_id } => self.on_disconnect(&connection_id),
            RouterCommand::Persisted {
                sender_id,
                correlation_token,
                outcome,
            } => self.on_persisted(&sender_id, correlation_token, outcome),
            RouterCommand::Deliver { target, event } => {
                let reached = send_to_target(&self.sessions, &self.presence, &target, event);
                tracing::debug!(delivery = ?target, reached, "Delivered out-of-band event");
            }
            RouterCommand::IsOnline { user_id, reply } => {
                let _ = reply.send(self.presence.is_online(&user_id));
            }
        }
    }

    fn on_connect(
        &mut self,
        connection_id: ConnectionId,
        verified_user_id: Option<String>,
        sender: EventSender,
    ) {
        tracing::debug!(
            connection_id = %connection_id,
            verified_user_id = ?verified_user_id,
            "Session opened"
        );
        let session = ConnectionSession::new(connection_id.clone(), verified_user_id, sender);
        if self.sessions.insert(connection_id.clone(), session).is_some() {
            tracing::warn!(connection_id = %connection_id, "Duplicate connection id replaced");
        }
    }

    fn owner_of(&self, connection_id: &str) -> Option<String> {
        self.sessions
            .get(connection_id)
            .and_then(|s| s.owner())
            .map(str::to_string)
    }

    fn on_inbound(&mut self, connection_id: &str, event: ClientEvent) {
        if !self.sessions.contains_key(connection_id) {
            tracing::debug!(connection_id = %connection_id, "Event for unknown connection dropped");
            return;
        }

        if let ClientEvent::UserOnline(announce) = event {
            self.on_user_online(connection_id, &announce.user_id);
            return;
        }

        // Clients may race their first events with the announcement.
        let Some(owner) = self.owner_of(connection_id) else {
            tracing::debug!(
                connection_id = %connection_id,
                event = event.name(),
                "Dropped event from unauthenticated connection"
            );
            return;
        };

        match event {
            ClientEvent::Typing(typing) => self.on_typing(&owner, typing),
            ClientEvent::StopTyping(stop) => self.on_stop_typing(&owner, stop),
            ClientEvent::SendMessage(send) => self.on_send_message(connection_id, &owner, send),
            ClientEvent::UserOnline(_) => {}
        }
    }

    fn on_user_online(&mut self, connection_id: &str, user_id: &str) {
        let Some(session) = self.sessions.get_mut(connection_id) else {
            return;
        };
        if let Err(err) = session.bind_owner(user_id) {
            tracing::warn!(
                connection_id = %connection_id,
                user_id = %user_id,
                state = ?session.state(),
                error = %err,
                "Rejected user-online"
            );
            return;
        }

        let transition = self.presence.set_online(user_id, connection_id);
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            transition = ?transition,
            online = self.presence.len(),
            "User online"
        );

        if transition != OnlineTransition::Unchanged {
            self.broadcast_presence(user_id, true, connection_id);
        }

        let snapshot = ServerEvent::PresenceSnapshot(PresenceSnapshot {
            user_ids: self
                .presence
                .online_users()
                .into_iter()
                .filter(|u| u != user_id)
                .collect(),
        });
        if let Some(session) = self.sessions.get(connection_id) {
            session.emit(snapshot);
        }
    }

    fn on_typing(&self, owner: &str, typing: Typing) {
        if !typing.from_user_id.is_empty() && typing.from_user_id != owner {
            tracing::debug!(
                owner = %owner,
                claimed = %typing.from_user_id,
                "typing fromUserId differs from connection owner"
            );
        }
        let event = ServerEvent::UserTyping(UserTyping {
            from_user_id: owner.to_string(),
            username: typing.username,
        });
        if !send_to_user(&self.sessions, &self.presence, &typing.to_user_id, event) {
            tracing::debug!(to_user_id = %typing.to_user_id, "Typing recipient offline");
        }
    }

    fn on_stop_typing(&self, owner: &str, stop: StopTyping) {
        let event = ServerEvent::UserStopTyping(UserStopTyping {
            from_user_id: owner.to_string(),
        });
        if !send_to_user(&self.sessions, &self.presence, &stop.to_user_id, event) {
            tracing::debug!(to_user_id = %stop.to_user_id, "Stop-typing recipient offline");
        }
    }

    fn on_send_message(&mut self, connection_id: &str, owner: &str, send: SendMessage) {
        let SendMessage {
            receiver_id,
            content,
            correlation_token,
        } = send;

        let content = match relay::validate(&receiver_id, &content, self.options.max_content_chars)
        {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    correlation_token = %correlation_token,
                    error = %err,
                    "send-message rejected"
                );
                if let Some(session) = self.sessions.get(connection_id) {
                    session.emit(ServerEvent::MessageFailed(MessageFailed {
                        correlation_token,
                        error: err.to_string(),
                    }));
                }
                return;
            }
        };

        let relayed = send_to_user(
            &self.sessions,
            &self.presence,
            &receiver_id,
            ServerEvent::NewMessage(NewMessage::provisional(
                owner,
                &receiver_id,
                &content,
                &correlation_token,
                Utc::now(),
            )),
        );
        tracing::debug!(
            sender_id = %owner,
            receiver_id = %receiver_id,
            correlation_token = %correlation_token,
            relayed,
            "Message relayed"
        );

        self.spawn_persistence(owner.to_string(), receiver_id, content, correlation_token);
    }

    fn spawn_persistence(
        &self,
        sender_id: String,
        receiver_id: String,
        content: String,
        correlation_token: String,
    ) {
        let Some(commands) = self.commands.upgrade() else {
            tracing::warn!("Router shutting down, message not persisted");
            return;
        };
        let store = self.store.clone();

        tokio::spawn(async move {
            let outcome = relay::persist(store.as_ref(), &sender_id, &receiver_id, &content).await;
            let _ = commands.send(RouterCommand::Persisted {
                sender_id,
                correlation_token,
                outcome,
            });
        });
    }

    fn on_persisted(
        &mut self,
        sender_id: &str,
        correlation_token: String,
        outcome: Result<Message, RelayError>,
    ) {
        let event = match outcome {
            Ok(message) => {
                tracing::debug!(
                    message_id = %message.id,
                    correlation_token = %correlation_token,
                    "Message persisted"
                );
                ServerEvent::MessageConfirmed(MessageConfirmed {
                    correlation_token,
                    message,
                })
            }
            Err(err) => {
                tracing::warn!(
                    sender_id = %sender_id,
                    correlation_token = %correlation_token,
                    error = ?err,
                    "Message persistence failed"
                );
                ServerEvent::MessageFailed(MessageFailed {
                    correlation_token,
                    error: err.to_string(),
                })
            }
        };

        // Resolved now, not when the message was sent: the sender may have reconnected.
        if !send_to_user(&self.sessions, &self.presence, sender_id, event) {
            tracing::debug!(sender_id = %sender_id, "Sender unreachable, outcome dropped");
        }
    }

    fn on_disconnect(&mut self, connection_id: &str) {
        let Some(mut session) = self.sessions.remove(connection_id) else {
            return;
        };
        session.close();

        let Some(owner) = session.owner() else {
            tracing::debug!(connection_id = %connection_id, "Unauthenticated session closed");
            return;
        };

        if self.presence.remove_by_connection(owner, connection_id) {
            tracing::info!(
                connection_id = %connection_id,
                user_id = %owner,
                online = self.presence.len(),
                "User offline"
            );
            self.broadcast_presence(owner, false, connection_id);
        } else {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = %owner,
                "Superseded session closed, presence unchanged"
            );
        }
    }

    fn broadcast_presence(&self, user_id: &str, online: bool, except: &str) {
        let event = ServerEvent::PresenceChanged(PresenceChanged {
            user_id: user_id.to_string(),
            online,
        });
        broadcast_except(&self.sessions, except, &event);

        if self.options.legacy_presence_events {
            let status = UserStatus {
                user_id: user_id.to_string(),
            };
            let legacy = if online {
                ServerEvent::UserOnlineStatus(status)
            } else {
                ServerEvent::UserOfflineStatus(status)
            };
            broadcast_except(&self.sessions, except, &legacy);
        }
    }
}
