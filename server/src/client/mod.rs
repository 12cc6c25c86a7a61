//! Client-side controllers for the live protocol.
//!
//! These hold no transport; a UI feeds them server events and sends whatever
//! client events they return.

pub mod reconcile;
pub mod reconnect;
pub mod typing;

pub use reconcile::{ChatEntry, ConversationState, DeliveryStatus};
pub use reconnect::{ClientSession, LinkState};
pub use typing::TypingTracker;
