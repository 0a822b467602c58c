pub mod client;
pub mod probe;
pub mod protos;

pub use client::ChannelQueryClient;
pub use probe::{ChannelListProbe, HealthzProbe, Probe, ReadinessProbe};

use thiserror::Error;

/// A failed readiness check. Probe failures are retried until the startup deadline and are
/// never returned from `Node::start`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("health check request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("health check returned status {0}")]
    Unhealthy(u16),

    #[error("request failed: {0}")]
    Status(#[from] tonic::Status),

    #[error("proposal rejected with status {status}: {message}")]
    Rejected { status: i32, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("failed to sign request: {0}")]
    Signing(String),
}
