pub mod client;
mod http_transport;
mod upstream_status;

pub use client::{Endpoint, ProviderClient, UpstreamStream};
pub use http_transport::HttpTransport;
