pub mod body;
pub mod chat;
pub mod health;
