use p256::ecdsa::Signature;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;

use super::Role;
use crate::error::{NodeError, Result};

/// Certificates are valid from a day before issuance for ten years.
const VALIDITY_DAYS: i64 = 3650;

/// An issued X.509 certificate, PEM-encoded.
///
/// Cloning shares the underlying bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pem: Arc<str>,
}

impl Certificate {
    pub fn from_pem(pem: impl Into<Arc<str>>) -> Self {
        Self { pem: pem.into() }
    }

    /// PEM bytes, exactly as written to disk.
    pub fn bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// DER contents of the PEM block.
    pub fn der(&self) -> Result<Vec<u8>> {
        let pem = pem::parse(self.pem.as_bytes())
            .map_err(|e| NodeError::Certificate(format!("failed to parse PEM: {}", e)))?;
        Ok(pem.into_contents())
    }

    pub fn common_name(&self) -> Result<Option<String>> {
        self.inspect(|cert| {
            cert.subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_string)
        })
    }

    /// The role tag embedded in the subject, if any.
    pub fn organizational_unit(&self) -> Result<Option<String>> {
        self.inspect(|cert| {
            cert.subject()
                .iter_organizational_unit()
                .next()
                .and_then(|ou| ou.as_str().ok())
                .map(str::to_string)
        })
    }

    pub fn is_ca(&self) -> Result<bool> {
        self.inspect(|cert| cert.is_ca())
    }

    /// Check that this certificate's signature verifies under `issuer`'s public key.
    pub fn is_issued_by(&self, issuer: &Certificate) -> Result<bool> {
        let der = self.der()?;
        let issuer_der = issuer.der()?;
        let (_, cert) = parse(&der)?;
        let (_, issuer_cert) = parse(&issuer_der)?;

        if cert.issuer() != issuer_cert.subject() {
            return Ok(false);
        }
        Ok(cert.verify_signature(Some(issuer_cert.public_key())).is_ok())
    }

    pub fn is_self_signed(&self) -> Result<bool> {
        self.is_issued_by(self)
    }

    fn inspect<T>(&self, f: impl FnOnce(&X509Certificate<'_>) -> T) -> Result<T> {
        let der = self.der()?;
        let (_, cert) = parse(&der)?;
        Ok(f(&cert))
    }
}

fn parse(der: &[u8]) -> Result<(&[u8], X509Certificate<'_>)> {
    x509_parser::parse_x509_certificate(der)
        .map_err(|e| NodeError::Certificate(format!("failed to parse X509 certificate: {}", e)))
}

/// ECDSA P-256 private key.
pub struct PrivateKey {
    key_pair: KeyPair,
    pem: String,
}

impl PrivateKey {
    fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
        let pem = key_pair.serialize_pem();
        Ok(Self { key_pair, pem })
    }

    /// PKCS#8 PEM bytes.
    pub fn bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }

    /// Sign `data` with SHA-256/ECDSA, returning a DER signature with a low S value.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let pkcs8 = self.key_pair.serialize_der();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|e| NodeError::Certificate(format!("failed to load signing key: {}", e)))?;
        let signature = key_pair
            .sign(&rng, data)
            .map_err(|_| NodeError::Certificate("failed to sign data".to_string()))?;

        let signature = Signature::from_slice(signature.as_ref())
            .map_err(|e| NodeError::Certificate(format!("unexpected signature encoding: {}", e)))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A private key with its certificate, optionally chained to the identity that issued it.
pub struct Identity {
    name: String,
    role: Option<Role>,
    private_key: PrivateKey,
    certificate: Certificate,
    signer: rcgen::Certificate,
    issuer: Option<Arc<Identity>>,
}

impl Identity {
    /// Generate a key pair and a self-signed CA certificate.
    pub fn issue_root(name: &str, role: Option<Role>) -> Result<Self> {
        let private_key = PrivateKey::generate()?;
        let params = certificate_params(name, role, true)?;
        let signer = params.self_signed(&private_key.key_pair)?;

        Ok(Self {
            name: name.to_string(),
            role,
            certificate: Certificate::from_pem(signer.pem()),
            private_key,
            signer,
            issuer: None,
        })
    }

    /// Generate a key pair and a certificate signed by `issuer`.
    pub fn issue_from(issuer: &Arc<Identity>, name: &str, role: Option<Role>) -> Result<Self> {
        let private_key = PrivateKey::generate()?;
        let params = certificate_params(name, role, false)?;
        let signer = params.signed_by(
            &private_key.key_pair,
            &issuer.signer,
            &issuer.private_key.key_pair,
        )?;

        Ok(Self {
            name: name.to_string(),
            role,
            certificate: Certificate::from_pem(signer.pem()),
            private_key,
            signer,
            issuer: Some(Arc::clone(issuer)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The identity that signed this one, `None` for a root authority.
    pub fn issuer(&self) -> Option<&Arc<Identity>> {
        self.issuer.as_ref()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("issuer", &self.issuer.as_ref().map(|i| i.name()))
            .finish()
    }
}

fn certificate_params(name: &str, role: Option<Role>, ca: bool) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, name);
    if let Some(role) = role {
        distinguished_name.push(DnType::OrganizationalUnitName, role.as_str());
    }
    params.distinguished_name = distinguished_name;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::days(VALIDITY_DAYS);

    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
    } else {
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.use_authority_key_identifier_extension = true;
    }

    Ok(params)
}
