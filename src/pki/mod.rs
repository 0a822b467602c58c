pub mod certificate;
pub mod msp;
pub mod validator;

pub use certificate::{Certificate, Identity, PrivateKey};
pub use msp::Msp;
pub use validator::CertificateValidator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role tag embedded in a certificate as its organizational unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
    Peer,
    Orderer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Client, Role::Admin, Role::Peer, Role::Orderer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
            Role::Peer => "peer",
            Role::Orderer => "orderer",
        }
    }

    /// Capitalized form used in identity names, e.g. "Org1 Peer".
    pub fn title(&self) -> &'static str {
        match self {
            Role::Client => "Client",
            Role::Admin => "Admin",
            Role::Peer => "Peer",
            Role::Orderer => "Orderer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}
