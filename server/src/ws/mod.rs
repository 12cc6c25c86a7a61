pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod router;
pub mod session;

use tokio::sync::mpsc;

use protocol::ServerEvent;

/// Transport-generated id of one live connection (UUIDv7 string).
pub type ConnectionId = String;

/// Sender half of a connection's outbound event queue.
/// The router holds one per session; the connection actor drains the receiver
/// into the socket.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Generate a fresh connection id.
pub fn new_connection_id() -> ConnectionId {
    uuid::Uuid::now_v7().to_string()
}
