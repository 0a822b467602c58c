//! Provisioning and supervision of local ledger peers.
//!
//! An [`Organization`] owns a certificate authority and an admin identity. A [`Node`] is issued
//! a peer identity by its organization, writes its trust material and configuration, launches
//! the peer binary and waits until the peer both answers health checks and accepts the admin.

pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod organization;
pub mod pki;
pub mod runtime;

pub use config::{Config, RuntimeConfig};
pub use error::{ExitCause, NodeError, Result};
pub use node::{Endpoint, Endpoints, Node, NodeBinary, NodeState, StartupPolicy};
pub use organization::Organization;
pub use runtime::RuntimeMaterializer;
