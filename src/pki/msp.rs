use super::Certificate;
use crate::error::{NodeError, Result};

/// Membership service provider definition: the certificates that define who may act for an
/// organization.
#[derive(Debug, Clone)]
pub struct Msp {
    id: String,
    root_certificates: Vec<Certificate>,
    admin_certificates: Vec<Certificate>,
}

impl Msp {
    pub fn new(
        id: impl Into<String>,
        root_certificates: Vec<Certificate>,
        admin_certificates: Vec<Certificate>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(NodeError::Configuration("MSP ID cannot be empty".to_string()));
        }
        Ok(Self {
            id,
            root_certificates,
            admin_certificates,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root_certificates(&self) -> &[Certificate] {
        &self.root_certificates
    }

    pub fn admin_certificates(&self) -> &[Certificate] {
        &self.admin_certificates
    }
}
