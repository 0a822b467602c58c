use std::time::{SystemTime, UNIX_EPOCH};

use super::{Certificate, Msp, Role};
use crate::error::{NodeError, Result};

/// Validates certificates against an MSP's root certificates.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    trusted_roots: Vec<Certificate>,
}

impl CertificateValidator {
    /// Create a validator trusting the roots of `msp`
    pub fn for_msp(msp: &Msp) -> Self {
        Self {
            trusted_roots: msp.root_certificates().to_vec(),
        }
    }

    /// Validate a certificate: in its validity window and issued by a trusted root.
    pub fn validate_certificate(&self, certificate: &Certificate) -> Result<ValidationResult> {
        let der = certificate.der()?;
        let (_, cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| NodeError::Certificate(format!("failed to parse X509 certificate: {}", e)))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        if now < cert.validity().not_before.timestamp() {
            return Ok(ValidationResult::invalid("Certificate not yet valid"));
        }
        if now > cert.validity().not_after.timestamp() {
            return Ok(ValidationResult::invalid("Certificate expired"));
        }

        for root in &self.trusted_roots {
            if certificate.is_issued_by(root)? {
                return Ok(ValidationResult::valid());
            }
        }

        Ok(ValidationResult::invalid("Certificate not issued by a trusted root"))
    }

    /// Validate a certificate and check that it carries the given role tag.
    pub fn validate_role(&self, certificate: &Certificate, role: Role) -> Result<ValidationResult> {
        let result = self.validate_certificate(certificate)?;
        if !result.valid {
            return Ok(result);
        }
        match certificate.organizational_unit()? {
            Some(ou) if ou == role.as_str() => Ok(result),
            Some(ou) => Ok(ValidationResult::invalid(format!(
                "Certificate has role {}, expected {}",
                ou, role
            ))),
            None => Ok(ValidationResult::invalid("Certificate has no role")),
        }
    }

    /// Check that an MSP only mixes certificates from its own namespace: every root is a
    /// self-signed CA and every admin chains to one of the roots with the admin role.
    pub fn validate_msp(msp: &Msp) -> Result<()> {
        if msp.root_certificates().is_empty() {
            return Err(NodeError::Certificate(format!(
                "MSP {} has no root certificates",
                msp.id()
            )));
        }
        for root in msp.root_certificates() {
            if !root.is_self_signed()? || !root.is_ca()? {
                return Err(NodeError::Certificate(format!(
                    "MSP {} root certificate is not a self-signed CA",
                    msp.id()
                )));
            }
        }

        let validator = Self::for_msp(msp);
        for admin in msp.admin_certificates() {
            let result = validator.validate_role(admin, Role::Admin)?;
            if !result.valid {
                return Err(NodeError::Certificate(format!(
                    "MSP {} admin certificate rejected: {}",
                    msp.id(),
                    result.reason.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }
}

/// Certificate validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}
