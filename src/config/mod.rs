use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::NodeError;
use crate::node::{Endpoint, Endpoints, StartupPolicy};

/// Environment variable naming the directory that holds the peer's `core.yaml` template.
pub const TEMPLATE_ENV: &str = "FABRIC_CFG_PATH";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Template and builder locations
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Startup wait configuration
    #[serde(default)]
    pub startup: StartupConfig,

    /// Organization configuration
    pub organization: OrganizationConfig,

    /// Node configuration
    pub node: NodeConfig,
}

/// Runtime locations. Unset values are resolved from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Directory containing the `core.yaml` template (default: $FABRIC_CFG_PATH)
    #[serde(default)]
    pub template_dir: Option<PathBuf>,

    /// Root directory of the external chaincode builders (default: $HOME/builders)
    #[serde(default)]
    pub builders_dir: Option<PathBuf>,
}

/// Startup wait configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Overall time allowed for the node to become ready, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between readiness probes, in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

/// Organization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    /// Organization name, e.g. "Org1"
    pub name: String,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory owned by the node (config, data, logs, msp)
    pub directory: PathBuf,

    /// Host name other nodes and clients use to reach this node
    #[serde(default = "default_host")]
    pub host: String,

    /// Peer API port
    pub api_port: u16,

    /// Chaincode listener port
    pub chaincode_port: u16,

    /// Operations (health and metrics) port
    pub operations_port: u16,

    /// Node binary to launch
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
}

fn default_timeout_secs() -> u64 { 10 }
fn default_probe_interval_ms() -> u64 { 250 }
fn default_host() -> String { "localhost".to_string() }
fn default_binary() -> PathBuf { PathBuf::from("peer") }

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

impl StartupConfig {
    pub fn policy(&self) -> StartupPolicy {
        StartupPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            probe_interval: Duration::from_millis(self.probe_interval_ms),
        }
    }
}

impl NodeConfig {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            api: Endpoint::new(&self.host, self.api_port),
            chaincode: Endpoint::new(&self.host, self.chaincode_port),
            operations: Endpoint::new(&self.host, self.operations_port),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings::default(),
            startup: StartupConfig::default(),
            organization: OrganizationConfig {
                name: "Org1".to_string(),
            },
            node: NodeConfig {
                directory: PathBuf::from("./data/org1peer"),
                host: default_host(),
                api_port: 7051,
                chaincode_port: 7052,
                operations_port: 9443,
                binary: default_binary(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path.as_ref(), content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Create a default config file
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Self::default();
        config.to_file(path)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.organization.name.trim().is_empty() {
            anyhow::bail!("Organization name cannot be empty");
        }

        let ports = [
            self.node.api_port,
            self.node.chaincode_port,
            self.node.operations_port,
        ];
        if ports.contains(&0) {
            anyhow::bail!("Node ports must be non-zero");
        }
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            anyhow::bail!("Node ports must be distinct");
        }

        if self.node.directory.as_os_str().is_empty() {
            anyhow::bail!("Node directory cannot be empty");
        }

        if self.startup.timeout_secs == 0 || self.startup.probe_interval_ms == 0 {
            anyhow::bail!("Startup timeout and probe interval must be greater than 0");
        }

        Ok(())
    }

    /// Ensure the node directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.node.directory)
            .context("Failed to create node directory")?;
        Ok(())
    }

    /// Resolve runtime locations, falling back to the process environment.
    pub fn runtime_config(&self) -> std::result::Result<RuntimeConfig, NodeError> {
        let from_env = |key: &str| std::env::var(key).ok();
        RuntimeConfig::resolve(&self.runtime, from_env)
    }
}

/// Locations the runtime materializer reads from. The template directory is never written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub template_dir: PathBuf,
    pub builders_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn new(template_dir: impl Into<PathBuf>, builders_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            builders_dir: builders_dir.into(),
        }
    }

    /// Resolve entirely from `FABRIC_CFG_PATH` and `HOME`.
    pub fn from_env() -> std::result::Result<Self, NodeError> {
        Self::resolve(&RuntimeSettings::default(), |key| std::env::var(key).ok())
    }

    fn resolve(
        settings: &RuntimeSettings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> std::result::Result<Self, NodeError> {
        let template_dir = match &settings.template_dir {
            Some(dir) => dir.clone(),
            None => lookup(TEMPLATE_ENV)
                .map(PathBuf::from)
                .ok_or_else(|| NodeError::Configuration(format!("{} not defined", TEMPLATE_ENV)))?,
        };

        let builders_dir = match &settings.builders_dir {
            Some(dir) => dir.clone(),
            None => lookup("HOME")
                .map(|home| PathBuf::from(home).join("builders"))
                .ok_or_else(|| NodeError::Configuration("HOME not defined".to_string()))?,
        };

        Ok(Self {
            template_dir,
            builders_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.organization.name, parsed.organization.name);
        assert_eq!(config.node.api_port, parsed.node.api_port);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [organization]
            name = "Org1"

            [node]
            directory = "/tmp/org1peer"
            api_port = 7051
            chaincode_port = 7052
            operations_port = 9443
            "#,
        )
        .unwrap();

        assert_eq!(parsed.node.host, "localhost");
        assert_eq!(parsed.node.binary, PathBuf::from("peer"));
        let policy = parsed.startup.policy();
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.probe_interval, Duration::from_millis(250));
        assert_eq!(parsed.node.endpoints().api.address(), "localhost:7051");
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let mut config = Config::default();
        config.node.operations_port = config.node.api_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_from_environment() {
        let lookup = |key: &str| match key {
            "FABRIC_CFG_PATH" => Some("/etc/fabric".to_string()),
            "HOME" => Some("/home/dev".to_string()),
            _ => None,
        };
        let runtime = RuntimeConfig::resolve(&RuntimeSettings::default(), lookup).unwrap();

        assert_eq!(runtime.template_dir, PathBuf::from("/etc/fabric"));
        assert_eq!(runtime.builders_dir, PathBuf::from("/home/dev/builders"));
    }

    #[test]
    fn test_missing_template_env() {
        let lookup = |key: &str| (key == "HOME").then(|| "/home/dev".to_string());
        let err = RuntimeConfig::resolve(&RuntimeSettings::default(), lookup).unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("FABRIC_CFG_PATH not defined"));
    }

    #[test]
    fn test_explicit_settings_win() {
        let settings = RuntimeSettings {
            template_dir: Some(PathBuf::from("/opt/templates")),
            builders_dir: Some(PathBuf::from("/opt/builders")),
        };
        let runtime = RuntimeConfig::resolve(&settings, |_| None).unwrap();
        assert_eq!(runtime, RuntimeConfig::new("/opt/templates", "/opt/builders"));
    }

    #[test]
    fn test_from_env_and_config_file_agree() {
        std::env::set_var(TEMPLATE_ENV, "/etc/fabric");
        std::env::set_var("HOME", "/home/dev");

        let runtime = RuntimeConfig::from_env().unwrap();
        assert_eq!(runtime, RuntimeConfig::new("/etc/fabric", "/home/dev/builders"));

        // A default config file has no [runtime] overrides, so it resolves the same way
        assert_eq!(Config::default().runtime_config().unwrap(), runtime);
    }
}
