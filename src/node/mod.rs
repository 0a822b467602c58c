pub mod process;

pub use process::{NodeBinary, ProcessHandle};

use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ExitCause, NodeError, Result};
use crate::network::{ChannelListProbe, HealthzProbe, Probe, ProbeError, ReadinessProbe};
use crate::organization::Organization;
use crate::pki::{Identity, Role};
use crate::runtime::{PeerOverrides, RuntimeMaterializer, CORE_CONFIG_FILE};

/// Per-call timeout of each readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

const LOG_FILE: &str = "peer.log";

type ProbeFuture = Pin<Box<dyn Future<Output = std::result::Result<(), ProbeError>> + Send>>;

/// A network address a node listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn local(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The three endpoints of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api: Endpoint,
    pub chaincode: Endpoint,
    pub operations: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Created => "created",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
            NodeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How long to wait for a node to become ready, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupPolicy {
    pub timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            probe_interval: Duration::from_millis(250),
        }
    }
}

/// A supervised peer process belonging to one organization.
///
/// `start` and `stop` take `&self`; a call made while another is in progress is rejected
/// rather than queued. Dropping the node kills its process.
pub struct Node {
    name: String,
    peer_id: String,
    organization: Arc<Organization>,
    identity: Arc<Identity>,
    directory: PathBuf,
    endpoints: Endpoints,
    materializer: RuntimeMaterializer,
    binary: NodeBinary,
    policy: StartupPolicy,
    probe: Arc<dyn Probe>,
    state: watch::Sender<NodeState>,
    process: Mutex<Option<ProcessHandle>>,
}

impl Node {
    /// Create a node for `organization`, issuing it a fresh peer identity. Nothing is written
    /// to disk until the node is started.
    pub fn new(
        organization: Arc<Organization>,
        directory: impl Into<PathBuf>,
        endpoints: Endpoints,
        materializer: RuntimeMaterializer,
    ) -> Result<Self> {
        let identity = organization.issue_identity(Role::Peer)?;
        let peer_id = format!(
            "{}peer",
            organization.name().to_lowercase().replace(char::is_whitespace, "")
        );

        let probe = ReadinessProbe::new(
            Box::new(HealthzProbe::new(
                &Endpoint::local(endpoints.operations.port),
                PROBE_TIMEOUT,
            )),
            Box::new(ChannelListProbe::new(
                &endpoints.api,
                organization.msp_id(),
                Arc::clone(organization.admin()),
                PROBE_TIMEOUT,
            )),
        );
        let (state, _) = watch::channel(NodeState::Created);

        Ok(Self {
            name: identity.name().to_string(),
            peer_id,
            organization,
            identity,
            directory: directory.into(),
            endpoints,
            materializer,
            binary: NodeBinary::default(),
            policy: StartupPolicy::default(),
            probe: Arc::new(probe),
            state,
            process: Mutex::new(None),
        })
    }

    pub fn with_binary(mut self, binary: NodeBinary) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_startup_policy(mut self, policy: StartupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the readiness check run while starting.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn organization(&self) -> &Arc<Organization> {
        &self.organization
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn msp_id(&self) -> &str {
        self.organization.msp_id()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn config_dir(&self) -> PathBuf {
        self.directory.join("config")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.directory.join("data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.directory.join("logs")
    }

    pub fn msp_dir(&self) -> PathBuf {
        self.directory.join("msp")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    /// Process ID of the running node. `None` when stopped, or while a start or stop is in
    /// progress.
    pub fn pid(&self) -> Option<u32> {
        let process = self.process.try_lock().ok()?;
        process.as_ref().and_then(ProcessHandle::pid)
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.state.subscribe()
    }

    /// Start the node and wait until it is ready.
    ///
    /// Starting a running node succeeds without doing anything. A failed node must be stopped
    /// before it can be started again.
    pub async fn start(&self) -> Result<()> {
        let mut process = self.process.try_lock().map_err(|_| self.busy())?;

        match self.state() {
            NodeState::Running => return Ok(()),
            NodeState::Starting => return Err(NodeError::AlreadyStarting(self.name.clone())),
            state @ (NodeState::Stopping | NodeState::Failed) => {
                return Err(NodeError::InvalidState {
                    node: self.name.clone(),
                    state,
                })
            }
            NodeState::Created | NodeState::Stopped => {}
        }

        info!("Starting {}", self.name);
        self.set_state(NodeState::Starting);

        let (handle, mut exit_rx) = match self.launch().await {
            Ok(launched) => launched,
            Err(e) => {
                warn!("Failed to launch {}: {}", self.name, e);
                self.set_state(NodeState::Failed);
                return Err(e);
            }
        };

        match self.await_ready(&mut exit_rx).await {
            Ok(()) => {
                info!("{} is running (pid {:?})", self.name, handle.pid());
                *process = Some(handle);
                self.set_state(NodeState::Running);
                Ok(())
            }
            Err(e) => {
                warn!("{} failed to start: {}", self.name, e);
                if let Err(kill_error) = handle.kill().await {
                    warn!("Failed to kill {}: {}", self.name, kill_error);
                }
                self.set_state(NodeState::Failed);
                Err(e)
            }
        }
    }

    /// Stop the node. Stopping a node that is not running succeeds. Files on disk are kept.
    pub async fn stop(&self) -> Result<()> {
        let mut process = self.process.try_lock().map_err(|_| self.busy())?;

        match self.state() {
            NodeState::Created | NodeState::Stopped => return Ok(()),
            NodeState::Running => self.set_state(NodeState::Stopping),
            _ => {}
        }

        info!("Stopping {}", self.name);
        let result = match process.take() {
            Some(handle) => handle.kill().await,
            None => Ok(()),
        };
        self.set_state(NodeState::Stopped);

        result.map_err(|source| NodeError::Stop {
            node: self.name.clone(),
            source,
        })
    }

    /// Write the node's files and spawn its process.
    async fn launch(&self) -> Result<(ProcessHandle, oneshot::Receiver<ExitCause>)> {
        let config_dir = self.config_dir();
        let data_dir = self.data_dir();
        let msp_dir = self.msp_dir();
        for dir in [&config_dir, &data_dir, &self.logs_dir(), &msp_dir] {
            fs::create_dir_all(dir).map_err(|e| NodeError::io(dir, e))?;
        }

        self.materializer
            .write_trust_directory(&msp_dir, &self.identity)?;

        let overrides = PeerOverrides {
            peer_id: self.peer_id.clone(),
            msp_id: self.msp_id(),
            msp_dir: &msp_dir,
            data_dir: &data_dir,
            endpoints: &self.endpoints,
        };
        let core = self.materializer.synthesize_config(&overrides)?;
        let core_path = config_dir.join(CORE_CONFIG_FILE);
        fs::write(&core_path, core).map_err(|e| NodeError::io(&core_path, e))?;

        process::spawn(&self.binary, &config_dir, &self.log_path()).await
    }

    /// Race the startup deadline, process exit and readiness. At most one probe runs at a
    /// time; ticks that fall due while one is outstanding are skipped.
    async fn await_ready(&self, exit_rx: &mut oneshot::Receiver<ExitCause>) -> Result<()> {
        let deadline = tokio::time::sleep(self.policy.timeout);
        tokio::pin!(deadline);

        let interval = self.policy.probe_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<ProbeFuture> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(NodeError::StartTimeout {
                        node: self.name.clone(),
                        timeout: self.policy.timeout,
                    });
                }
                exited = &mut *exit_rx => {
                    let cause = exited.unwrap_or_else(|_| {
                        ExitCause::Wait(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "process monitor ended unexpectedly",
                        ))
                    });
                    return Err(NodeError::ProcessExit {
                        node: self.name.clone(),
                        cause,
                    });
                }
                _ = ticker.tick(), if in_flight.is_none() => {
                    let probe = Arc::clone(&self.probe);
                    in_flight = Some(Box::pin(async move { probe.check().await }));
                }
                result = async {
                    match in_flight.as_mut() {
                        Some(check) => check.await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    match result {
                        Ok(()) => return Ok(()),
                        Err(e) => debug!("{} not ready: {}", self.name, e),
                    }
                }
            }
        }
    }

    fn set_state(&self, state: NodeState) {
        debug!("{} is {}", self.name, state);
        self.state.send_replace(state);
    }

    /// Error for a call that overlaps a start or stop in progress.
    fn busy(&self) -> NodeError {
        match self.state() {
            NodeState::Starting => NodeError::AlreadyStarting(self.name.clone()),
            state => NodeError::InvalidState {
                node: self.name.clone(),
                state,
            },
        }
    }
}
