use std::sync::Arc;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::pki::{CertificateValidator, Identity, Msp, Role};

/// An organization: its certificate authority, its administrator and the MSP built from them.
#[derive(Debug)]
pub struct Organization {
    name: String,
    ca: Arc<Identity>,
    admin: Arc<Identity>,
    msp: Msp,
}

impl Organization {
    /// Create a new organization with a fresh CA and admin identity.
    pub fn new(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(NodeError::Configuration(
                "organization name cannot be empty".to_string(),
            ));
        }

        let ca = Arc::new(Identity::issue_root(&format!("{} CA", name), None)?);
        let admin = Arc::new(Identity::issue_from(
            &ca,
            &format!("{} Admin", name),
            Some(Role::Admin),
        )?);

        let msp_id = format!("{}MSP", name.replace(char::is_whitespace, ""));
        let msp = Msp::new(
            msp_id,
            vec![ca.certificate().clone()],
            vec![admin.certificate().clone()],
        )?;
        CertificateValidator::validate_msp(&msp)?;

        debug!("Created organization {} ({})", name, msp.id());

        Ok(Self {
            name: name.to_string(),
            ca,
            admin,
            msp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ca(&self) -> &Arc<Identity> {
        &self.ca
    }

    pub fn admin(&self) -> &Arc<Identity> {
        &self.admin
    }

    pub fn msp(&self) -> &Msp {
        &self.msp
    }

    pub fn msp_id(&self) -> &str {
        self.msp.id()
    }

    /// Issue a new identity for one of this organization's nodes, signed by its CA.
    pub fn issue_identity(&self, role: Role) -> Result<Arc<Identity>> {
        let name = format!("{} {}", self.name, role.title());
        Ok(Arc::new(Identity::issue_from(&self.ca, &name, Some(role))?))
    }
}
