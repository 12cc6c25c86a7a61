pub mod conversation;
pub mod messages;
pub mod presence;
pub mod relay;
pub mod users;
