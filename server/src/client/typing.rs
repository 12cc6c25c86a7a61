//! Typing indicator debounce for the composer.

use std::time::{Duration, Instant};

use crate::ws::protocol::{ClientEvent, StopTyping, Typing};

/// Idle time after the last keystroke before `stop-typing` is sent.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

/// Emits `typing` once per burst of input and `stop-typing` when the burst
/// ends: input goes idle, is cleared, or the message is sent.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    local_user_id: String,
    username: String,
    peer_id: String,
    idle: Duration,
    last_input: Option<Instant>,
}

impl TypingTracker {
    pub fn new(local_user_id: &str, username: &str, peer_id: &str) -> Self {
        Self::with_idle(local_user_id, username, peer_id, TYPING_IDLE)
    }

    pub fn with_idle(local_user_id: &str, username: &str, peer_id: &str, idle: Duration) -> Self {
        Self {
            local_user_id: local_user_id.to_string(),
            username: username.to_string(),
            peer_id: peer_id.to_string(),
            idle,
            last_input: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.last_input.is_some()
    }

    /// Composer text changed.
    pub fn on_input(&mut self, text: &str, now: Instant) -> Option<ClientEvent> {
        if text.trim().is_empty() {
            return self.stop();
        }
        let started = self.last_input.is_none();
        self.last_input = Some(now);
        started.then(|| {
            ClientEvent::Typing(Typing {
                to_user_id: self.peer_id.clone(),
                from_user_id: self.local_user_id.clone(),
                username: self.username.clone(),
            })
        })
    }

    /// Timer tick; ends the burst once input has been idle long enough.
    pub fn poll(&mut self, now: Instant) -> Option<ClientEvent> {
        match self.last_input {
            Some(last) if now.saturating_duration_since(last) >= self.idle => self.stop(),
            _ => None,
        }
    }

    /// When the next `poll` could produce an event.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_input.map(|last| last + self.idle)
    }

    pub fn on_send(&mut self) -> Option<ClientEvent> {
        self.stop()
    }

    fn stop(&mut self) -> Option<ClientEvent> {
        self.last_input.take().map(|_| {
            ClientEvent::StopTyping(StopTyping {
                to_user_id: self.peer_id.clone(),
                from_user_id: self.local_user_id.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TypingTracker {
        TypingTracker::new("userA", "alice", "userB")
    }

    #[test]
    fn test_typing_sent_once_per_burst() {
        let mut t = tracker();
        let start = Instant::now();

        assert_eq!(
            t.on_input("h", start),
            Some(ClientEvent::Typing(Typing {
                to_user_id: "userB".into(),
                from_user_id: "userA".into(),
                username: "alice".into(),
            }))
        );
        assert_eq!(t.on_input("he", start + Duration::from_millis(300)), None);
        assert_eq!(t.on_input("hey", start + Duration::from_millis(600)), None);
        assert!(t.is_typing());
    }

    #[test]
    fn test_idle_input_stops_typing() {
        let mut t = tracker();
        let start = Instant::now();
        t.on_input("h", start);
        t.on_input("hi", start + Duration::from_millis(1500));

        // Idle is measured from the last keystroke.
        assert_eq!(t.poll(start + Duration::from_millis(2500)), None);
        assert_eq!(
            t.deadline(),
            Some(start + Duration::from_millis(3500))
        );
        assert!(matches!(
            t.poll(start + Duration::from_millis(3500)),
            Some(ClientEvent::StopTyping(_))
        ));
        assert_eq!(t.poll(start + Duration::from_secs(10)), None);
    }

    #[test]
    fn test_send_and_clear_stop_typing() {
        let mut t = tracker();
        let now = Instant::now();

        t.on_input("hi", now);
        assert!(matches!(t.on_send(), Some(ClientEvent::StopTyping(_))));
        assert_eq!(t.on_send(), None);

        t.on_input("again", now);
        assert!(matches!(t.on_input("   ", now), Some(ClientEvent::StopTyping(_))));
        assert!(!t.is_typing());
    }

    #[test]
    fn test_whitespace_input_never_starts_typing() {
        let mut t = tracker();
        assert_eq!(t.on_input("  ", Instant::now()), None);
        assert!(!t.is_typing());
    }
}
