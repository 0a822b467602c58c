use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::pki::Identity;

/// NodeOUs policy: every role is classified by the OU in certificates issued by `cacerts/ca.pem`.
pub const NODE_OU_CONFIG: &str = "NodeOUs:
  Enable: true
  ClientOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: client
  AdminOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: admin
  PeerOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: peer
  OrdererOUIdentifier:
    Certificate: cacerts/ca.pem
    OrganizationalUnitIdentifier: orderer
";

pub const SUBDIRECTORIES: [&str; 4] = ["admincerts", "cacerts", "keystore", "signcerts"];

pub const CONFIG_FILE: &str = "config.yaml";
pub const KEY_FILE: &str = "keystore/key.pem";
pub const CERT_FILE: &str = "signcerts/cert.pem";
pub const CA_FILE: &str = "cacerts/ca.pem";

/// Write an MSP directory for `identity` at `directory`.
///
/// The issuer certificate is only written when the identity has one.
pub fn write_trust_directory(directory: &Path, identity: &Identity) -> Result<()> {
    fs::create_dir_all(directory).map_err(|e| NodeError::io(directory, e))?;
    for name in SUBDIRECTORIES {
        let path = directory.join(name);
        fs::create_dir_all(&path).map_err(|e| NodeError::io(&path, e))?;
    }

    write(directory, CONFIG_FILE, NODE_OU_CONFIG.as_bytes())?;
    write(directory, KEY_FILE, identity.private_key().bytes())?;
    write(directory, CERT_FILE, identity.certificate().bytes())?;
    if let Some(issuer) = identity.issuer() {
        write(directory, CA_FILE, issuer.certificate().bytes())?;
    }

    debug!("Wrote MSP for {} to {}", identity.name(), directory.display());
    Ok(())
}

fn write(directory: &Path, name: &str, contents: &[u8]) -> Result<()> {
    let path = directory.join(name);
    fs::write(&path, contents).map_err(|e| NodeError::io(&path, e))
}
