use std::sync::Arc;
use std::time::Duration;

use crate::db::MessageStore;
use crate::ws::router::RouterHandle;

/// Keepalive timings for live connections.
#[derive(Debug, Clone, Copy)]
pub struct WsTimings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for WsTimings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Durable users and messages
    pub store: Arc<dyn MessageStore>,
    /// Handle to the event router task that owns sessions and presence
    pub router: RouterHandle,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Maximum message length for REST sends
    pub max_content_chars: usize,
    pub ws: WsTimings,
}
