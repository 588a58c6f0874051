pub mod chat;
pub mod debug;
pub mod events;
pub mod search;
