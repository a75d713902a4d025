pub(crate) mod api;
pub mod auth;
pub mod capability;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod server;
pub mod state;
pub mod stream;
pub mod submission;
pub mod transport;
