use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use fabnode::config::{Config, TEMPLATE_ENV};
use fabnode::pki::Role;
use fabnode::runtime::{write_trust_directory, PeerOverrides, RuntimeMaterializer};
use fabnode::{Node, NodeBinary, Organization, RuntimeConfig};

/// Get system config file path
fn get_system_config_path() -> PathBuf {
    PathBuf::from("/etc/fabnode/config.toml")
}

/// Get development config file path (fallback)
fn get_dev_config_path() -> PathBuf {
    PathBuf::from("fabnode.toml")
}

/// Discover config file with priority order
fn discover_config(cli_path: Option<PathBuf>) -> PathBuf {
    // Priority 1: CLI specified path
    if let Some(path) = cli_path {
        return path;
    }

    // Priority 2: ./fabnode.toml
    let dev_config = get_dev_config_path();
    if dev_config.exists() {
        return dev_config;
    }

    // Priority 3: /etc/fabnode/config.toml
    get_system_config_path()
}

#[derive(Parser)]
#[command(name = "fabnode")]
#[command(version)]
#[command(about = "Provision and supervise local ledger peers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an organization and write an MSP directory for one of its identities
    GenMsp {
        /// Organization name
        #[arg(short, long)]
        org: String,

        /// Identity role (client, admin, peer, orderer)
        #[arg(short, long, default_value = "peer")]
        role: Role,

        /// Output MSP directory
        #[arg(long)]
        out: PathBuf,
    },

    /// Print the peer configuration the node would be started with
    RenderConfig {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the node and run until interrupted
    Start,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::GenMsp { org, role, out } => {
            generate_msp(&org, role, &out)?;
        }

        Commands::RenderConfig { output } => {
            let (config, runtime) = load_or_default(cli.config)?;
            render_config(&config, runtime, output.as_deref())?;
        }

        Commands::Start => {
            let (config, runtime) = load_or_default(cli.config)?;
            run_node(config, runtime).await?;
        }

        Commands::InitConfig { force } => {
            let config_path = discover_config(cli.config);
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, use --force to overwrite",
                    config_path.display()
                );
            }
            Config::create_default(&config_path)?;
            info!("Default config written to {}", config_path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: &Path) -> Result<Config> {
    let config = Config::from_file(config_path).with_context(|| {
        format!(
            "Failed to load {}. Run 'fabnode init-config' first",
            config_path.display()
        )
    })?;
    config.validate()?;
    Ok(config)
}

/// Load the config file. Without one, and without `--config`, run with defaults and take the
/// runtime locations from the environment.
fn load_or_default(cli_path: Option<PathBuf>) -> Result<(Config, RuntimeConfig)> {
    let explicit = cli_path.is_some();
    let config_path = discover_config(cli_path);

    if !explicit && !config_path.exists() {
        warn!(
            "No config file found, using defaults with {} from the environment",
            TEMPLATE_ENV
        );
        let runtime = RuntimeConfig::from_env().context("Failed to resolve runtime locations")?;
        return Ok((Config::default(), runtime));
    }

    let config = load_config(&config_path)?;
    let runtime = config
        .runtime_config()
        .context("Failed to resolve runtime locations")?;
    Ok((config, runtime))
}

fn generate_msp(org_name: &str, role: Role, out: &Path) -> Result<()> {
    info!("Generating {} identity for {}", role, org_name);

    let org = Organization::new(org_name).context("Failed to create organization")?;
    let identity = match role {
        Role::Admin => Arc::clone(org.admin()),
        role => org.issue_identity(role)?,
    };

    write_trust_directory(out, &identity)?;

    info!("MSP ID: {}", org.msp_id());
    info!("Identity: {}", identity.name());
    info!("MSP directory written to {}", out.display());
    Ok(())
}

fn render_config(config: &Config, runtime: RuntimeConfig, output: Option<&Path>) -> Result<()> {
    let materializer = RuntimeMaterializer::new(runtime);

    let org = Organization::new(&config.organization.name)?;
    let directory = &config.node.directory;
    let endpoints = config.node.endpoints();
    let node = Node::new(Arc::new(org), directory, endpoints.clone(), materializer.clone())?;

    let msp_dir = node.msp_dir();
    let data_dir = node.data_dir();
    let overrides = PeerOverrides {
        peer_id: node.peer_id().to_string(),
        msp_id: node.msp_id(),
        msp_dir: &msp_dir,
        data_dir: &data_dir,
        endpoints: &endpoints,
    };
    let rendered = materializer.synthesize_config(&overrides)?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Peer config written to {}", path.display());
        }
        None => print!("{}", String::from_utf8_lossy(&rendered)),
    }
    Ok(())
}

async fn run_node(config: Config, runtime: RuntimeConfig) -> Result<()> {
    config.ensure_directories()?;

    let org = Arc::new(Organization::new(&config.organization.name)?);
    info!("Organization {} ({})", org.name(), org.msp_id());

    let node = Node::new(
        org,
        &config.node.directory,
        config.node.endpoints(),
        RuntimeMaterializer::new(runtime),
    )?
    .with_binary(NodeBinary::new(&config.node.binary))
    .with_startup_policy(config.startup.policy());

    if let Err(e) = node.start().await {
        error!("{} failed to start, see {}", node.name(), node.log_path().display());
        return Err(e.into());
    }

    info!("API: {}", node.endpoints().api.address());
    info!("Operations: {}", node.endpoints().operations.address());
    info!("Logs: {}", node.log_path().display());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted");

    node.stop().await?;
    info!("{} stopped", node.name());
    Ok(())
}
