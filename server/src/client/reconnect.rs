//! Connection-level client state: reconnect backoff and the presence and
//! typing views built from server events.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::ws::protocol::{ClientEvent, ServerEvent, UserOnline};

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    user_id: String,
    link: LinkState,
    failed_attempts: u32,
    online: BTreeSet<String>,
    /// Peer user id -> username
    typing: BTreeMap<String, String>,
}

/// Delay before reconnect attempt `attempt` (0-based): doubling from
/// [`INITIAL_BACKOFF`], capped at [`MAX_BACKOFF`].
pub fn backoff(attempt: u32) -> Duration {
    INITIAL_BACKOFF
        .checked_mul(2u32.saturating_pow(attempt))
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

impl ClientSession {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            link: LinkState::Disconnected,
            failed_attempts: 0,
            online: BTreeSet::new(),
            typing: BTreeMap::new(),
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    /// Transport is up. Returns the announcement to send first; the server
    /// forgets the binding on every disconnect.
    pub fn on_connected(&mut self) -> ClientEvent {
        self.link = LinkState::Connected;
        self.failed_attempts = 0;
        ClientEvent::UserOnline(UserOnline {
            user_id: self.user_id.clone(),
        })
    }

    /// Transport dropped. Clears views that only live events keep fresh and
    /// returns the delay before the first reconnect attempt.
    pub fn on_disconnected(&mut self) -> Duration {
        self.link = LinkState::Disconnected;
        self.typing.clear();
        self.online.clear();
        self.failed_attempts = 0;
        self.on_connect_failed()
    }

    /// A reconnect attempt failed. Returns the delay before the next one.
    pub fn on_connect_failed(&mut self) -> Duration {
        let delay = backoff(self.failed_attempts);
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        delay
    }

    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::PresenceSnapshot(snapshot) => {
                self.online = snapshot.user_ids.iter().cloned().collect();
            }
            ServerEvent::PresenceChanged(change) => {
                if change.online {
                    self.online.insert(change.user_id.clone());
                } else {
                    self.online.remove(&change.user_id);
                    self.typing.remove(&change.user_id);
                }
            }
            ServerEvent::UserOnlineStatus(status) => {
                self.online.insert(status.user_id.clone());
            }
            ServerEvent::UserOfflineStatus(status) => {
                self.online.remove(&status.user_id);
                self.typing.remove(&status.user_id);
            }
            ServerEvent::UserTyping(typing) => {
                self.typing
                    .insert(typing.from_user_id.clone(), typing.username.clone());
            }
            ServerEvent::UserStopTyping(stop) => {
                self.typing.remove(&stop.from_user_id);
            }
            // A delivered message ends that sender's typing burst.
            ServerEvent::NewMessage(message) => {
                self.typing.remove(&message.sender_id);
            }
            ServerEvent::MessageConfirmed(_)
            | ServerEvent::MessageFailed(_)
            | ServerEvent::MessageNotification(_)
            | ServerEvent::Error(_) => {}
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    /// Username of `user_id` if they are typing to us.
    pub fn typing_username(&self, user_id: &str) -> Option<&str> {
        self.typing.get(user_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{PresenceChanged, PresenceSnapshot, UserStopTyping, UserTyping};

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(5), Duration::from_millis(16_000));
        assert_eq!(backoff(6), MAX_BACKOFF);
        assert_eq!(backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_reconnect_cycle_reannounces_and_resets_backoff() {
        let mut session = ClientSession::new("userA");
        let announce = ClientEvent::UserOnline(UserOnline {
            user_id: "userA".into(),
        });

        assert_eq!(session.on_connected(), announce);
        assert_eq!(session.on_disconnected(), Duration::from_millis(500));
        assert_eq!(session.on_connect_failed(), Duration::from_millis(1000));
        assert_eq!(session.on_connect_failed(), Duration::from_millis(2000));
        assert_eq!(session.link(), LinkState::Disconnected);

        assert_eq!(session.on_connected(), announce);
        assert_eq!(session.on_disconnected(), Duration::from_millis(500));
    }

    #[test]
    fn test_presence_view_follows_events() {
        let mut session = ClientSession::new("userA");
        session.apply(&ServerEvent::PresenceSnapshot(PresenceSnapshot {
            user_ids: vec!["userB".into(), "userC".into()],
        }));
        session.apply(&ServerEvent::PresenceChanged(PresenceChanged {
            user_id: "userC".into(),
            online: false,
        }));
        session.apply(&ServerEvent::PresenceChanged(PresenceChanged {
            user_id: "userD".into(),
            online: true,
        }));

        let online: Vec<_> = session.online_users().collect();
        assert_eq!(online, vec!["userB", "userD"]);
    }

    #[test]
    fn test_disconnect_clears_stale_typing() {
        let mut session = ClientSession::new("userA");
        session.on_connected();
        session.apply(&ServerEvent::UserTyping(UserTyping {
            from_user_id: "userB".into(),
            username: "bob".into(),
        }));
        assert_eq!(session.typing_username("userB"), Some("bob"));

        session.on_disconnected();
        assert_eq!(session.typing_username("userB"), None);
        assert!(!session.is_online("userB"));
    }

    #[test]
    fn test_typing_ends_on_stop_offline_or_message() {
        let mut session = ClientSession::new("userA");
        let typing = ServerEvent::UserTyping(UserTyping {
            from_user_id: "userB".into(),
            username: "bob".into(),
        });

        session.apply(&typing);
        session.apply(&ServerEvent::UserStopTyping(UserStopTyping {
            from_user_id: "userB".into(),
        }));
        assert_eq!(session.typing_username("userB"), None);

        session.apply(&typing);
        session.apply(&ServerEvent::PresenceChanged(PresenceChanged {
            user_id: "userB".into(),
            online: false,
        }));
        assert_eq!(session.typing_username("userB"), None);

        session.apply(&typing);
        session.apply(&ServerEvent::NewMessage(
            crate::ws::protocol::NewMessage::provisional(
                "userB",
                "userA",
                "hi",
                "t1",
                chrono::Utc::now(),
            ),
        ));
        assert_eq!(session.typing_username("userB"), None);
    }
}
