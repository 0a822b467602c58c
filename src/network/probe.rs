use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChannelQueryClient, ProbeError};
use crate::node::Endpoint;
use crate::pki::Identity;

/// One readiness check against a running node.
#[tonic::async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Liveness: `GET /healthz` on the operations endpoint must return 200.
pub struct HealthzProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HealthzProbe {
    pub fn new(operations: &Endpoint, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://{}/healthz", operations.address()),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[tonic::async_trait]
impl Probe for HealthzProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self.client.get(&self.url).timeout(self.timeout).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProbeError::Unhealthy(status.as_u16()));
        }
        Ok(())
    }
}

/// Trust: the node accepts a signed channel-list query from the organization's admin.
pub struct ChannelListProbe {
    client: ChannelQueryClient,
    address: String,
}

impl ChannelListProbe {
    pub fn new(api: &Endpoint, msp_id: &str, admin: Arc<Identity>, timeout: Duration) -> Self {
        Self {
            client: ChannelQueryClient::new(msp_id, admin, timeout),
            address: api.address(),
        }
    }
}

#[tonic::async_trait]
impl Probe for ChannelListProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let channels = self.client.list_channels(&self.address).await?;
        debug!("{} reports {} channel(s)", self.address, channels.len());
        Ok(())
    }
}

/// Two-phase readiness: liveness first, then trust. Both must pass in the same check.
pub struct ReadinessProbe {
    liveness: Box<dyn Probe>,
    trust: Box<dyn Probe>,
}

impl ReadinessProbe {
    pub fn new(liveness: Box<dyn Probe>, trust: Box<dyn Probe>) -> Self {
        Self { liveness, trust }
    }
}

#[tonic::async_trait]
impl Probe for ReadinessProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        self.liveness.check().await?;
        self.trust.check().await
    }
}
