//! PKI operations for client credentials
//!
//! This module loads the cluster CA and signs client (leaf) certificates
//! bound to a user name and a set of groups. The subject common name carries
//! the user and one organization attribute is written per group, which is
//! how the Kubernetes API server maps client certificates to identities.
//!
//! # Security Model
//!
//! - The CA key is loaded from the PKI store per issuance and never cached
//!   beyond the [`CertificateAuthority`] handle the caller owns
//! - Client key pairs are generated locally (ECDSA P-256)
//! - Leaf validity never outlives the CA that signed it

mod der;

use std::path::PathBuf;
use std::time::Duration;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use thiserror::Error;
use ::time::OffsetDateTime;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// Default validity period for client certificates (1 year)
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// Identity name reserved for the CA's own files in the store
pub const CA_IDENTITY_NAME: &str = "ca";

/// PEM tag used for certificates
const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// The certificate store could not be created, read or written
    #[error("certificate store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        /// Path that could not be accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// CA certificate or key is malformed, mismatched or expired
    #[error("invalid CA: {0}")]
    InvalidCa(String),

    /// Signing the client certificate failed
    #[error("failed to sign certificate for {name}: {message}")]
    SigningFailure {
        /// Identity being issued
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Another issuer holds the identity lock
    #[error("identity {name} is being issued concurrently (lock {} is held)", lock.display())]
    IdentityConflict {
        /// Identity being issued
        name: String,
        /// Lock file held by the other issuer
        lock: PathBuf,
    },

    /// The certificate request is not acceptable
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

impl PkiError {
    /// Create a store error for the given path
    pub fn store_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            source,
        }
    }

    fn signing(name: &str, message: impl Into<String>) -> Self {
        Self::SigningFailure {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Whether re-invoking the operation can succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::IdentityConflict { .. }
        )
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

fn encode_pem(tag: &str, der: Vec<u8>) -> String {
    let config = ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF);
    ::pem::encode_config(&::pem::Pem::new(tag, der), config)
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Information about a certificate's subject and validity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// Subject organizations, in encoding order
    pub organizations: Vec<String>,
    /// Serial number as lowercase hex
    pub serial: String,
    /// Whether the certificate carries CA basic constraints
    pub is_ca: bool,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
        Ok(Self::from_x509(&cert))
    }

    fn from_x509(cert: &X509Certificate<'_>) -> Self {
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let organizations = cert
            .subject()
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(str::to_string)
            .collect();

        Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            organizations,
            serial: cert.raw_serial_as_string().replace(':', ""),
            is_ca: cert.is_ca(),
        }
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }

    /// Seconds remaining until certificate expires
    pub fn remaining_secs(&self) -> i64 {
        self.not_after - now_unix()
    }

    /// Check if certificate has expired
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }
}

/// Request for a client certificate bound to a named identity
///
/// `name` keys the identity in the PKI store; `common_name` and
/// `organizations` become the certificate subject (user and groups).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Store key for the issued pair, unique per store
    pub name: String,
    /// Subject CN
    pub common_name: String,
    /// Subject O entries, order preserved
    pub organizations: Vec<String>,
    /// Location of the CA certificate
    pub ca_cert: PathBuf,
    /// Location of the CA private key
    pub ca_key: PathBuf,
    /// Requested lifetime, defaults to [`CERT_VALIDITY_YEARS`]
    pub validity: Option<Duration>,
}

impl CertificateRequest {
    /// Create a request with no organizations and default validity
    pub fn new(
        name: impl Into<String>,
        common_name: impl Into<String>,
        ca_cert: impl Into<PathBuf>,
        ca_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            common_name: common_name.into(),
            organizations: Vec::new(),
            ca_cert: ca_cert.into(),
            ca_key: ca_key.into(),
            validity: None,
        }
    }

    /// Set the subject organizations (groups)
    pub fn with_organizations<I, S>(mut self, organizations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.organizations = organizations.into_iter().map(Into::into).collect();
        self
    }

    /// Set the requested certificate lifetime
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Check that the identity name is usable as a store key
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() {
            return Err(PkiError::InvalidRequest(
                "identity name must not be empty".to_string(),
            ));
        }
        if name.starts_with('.') || name.contains(['/', '\\', '\0']) {
            return Err(PkiError::InvalidRequest(format!(
                "identity name {:?} must be a single file name without separators or a leading dot",
                name
            )));
        }
        if name == CA_IDENTITY_NAME {
            return Err(PkiError::InvalidRequest(format!(
                "identity name {:?} is reserved for the CA",
                name
            )));
        }
        if self.validity.is_some_and(|v| v.is_zero()) {
            return Err(PkiError::InvalidRequest(format!(
                "validity for {} must be greater than zero",
                name
            )));
        }
        Ok(())
    }

    /// Whether an issued certificate's subject matches this request
    pub fn matches_subject(&self, info: &CertificateInfo) -> bool {
        info.common_name == self.common_name && info.organizations == self.organizations
    }
}

/// A PEM-encoded client certificate and its private key
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded X.509 certificate
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key (zeroized on drop)
    pub key_pem: Zeroizing<String>,
}

impl IssuedCertificate {
    /// Bundle a certificate and key
    pub fn new(cert_pem: String, key_pem: Zeroizing<String>) -> Self {
        Self { cert_pem, key_pem }
    }

    /// Subject and validity of the certificate
    pub fn info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.cert_pem)
    }

    /// Whether the private key belongs to the certificate
    pub fn key_matches(&self) -> Result<bool> {
        key_matches_cert(&self.cert_pem, &self.key_pem)
    }
}

impl PartialEq for IssuedCertificate {
    fn eq(&self, other: &Self) -> bool {
        self.cert_pem == other.cert_pem && self.key_pem.as_str() == other.key_pem.as_str()
    }
}

impl Eq for IssuedCertificate {}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl lattice_common::credentials::ClientCredential for IssuedCertificate {
    fn certificate_pem(&self) -> &[u8] {
        self.cert_pem.as_bytes()
    }

    fn private_key_pem(&self) -> &[u8] {
        self.key_pem.as_bytes()
    }
}

/// Check whether a private key is the pair of a certificate's public key
pub fn key_matches_cert(cert_pem: &str, key_pem: &str) -> Result<bool> {
    let key_pem = der::normalize_private_key_pem(key_pem).map_err(PkiError::ParseError)?;
    let key = KeyPair::from_pem(&key_pem)
        .map_err(|e| PkiError::ParseError(format!("failed to parse private key: {}", e)))?;
    let cert_der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    Ok(public_key_matches(&cert, &key))
}

fn public_key_matches(cert: &X509Certificate<'_>, key: &KeyPair) -> bool {
    cert.public_key().subject_public_key.data.as_ref() == key.public_key_raw()
}

/// Certificate Authority for signing client certificates
#[derive(Clone)]
pub struct CertificateAuthority {
    /// CA key as PKCS#8 PEM (we deserialize each time since KeyPair isn't Clone)
    ca_key_pem: Zeroizing<String>,
    /// PEM-encoded CA certificate for distribution
    ca_cert_pem: String,
    /// CA validity window (Unix timestamps)
    not_before: i64,
    not_after: i64,
}

impl CertificateAuthority {
    /// Create a new self-signed CA valid for ten years
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ::time::Duration::days(10 * 365);

        let key_pair = KeyPair::generate()
            .map_err(|e| PkiError::InvalidCa(format!("failed to generate CA key: {}", e)))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| PkiError::InvalidCa(format!("failed to create CA cert: {}", e)))?;

        Self::from_pem(&cert.pem(), &key_pair.serialize_pem())
    }

    /// Load a CA from PEM material, checking that key and certificate pair up
    ///
    /// PKCS#8 keys and PKCS#1 RSA keys are accepted.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let ca_key_pem = der::normalize_private_key_pem(key_pem).map_err(PkiError::InvalidCa)?;
        let key = KeyPair::from_pem(&ca_key_pem)
            .map_err(|e| PkiError::InvalidCa(format!("failed to parse CA key: {}", e)))?;

        let cert_der = parse_pem(cert_pem).map_err(|e| PkiError::InvalidCa(e.to_string()))?;
        let (_, cert) = X509Certificate::from_der(&cert_der)
            .map_err(|e| PkiError::InvalidCa(format!("failed to parse CA cert: {}", e)))?;

        if !cert.is_ca() {
            return Err(PkiError::InvalidCa(
                "certificate is not a certificate authority".to_string(),
            ));
        }
        if !public_key_matches(&cert, &key) {
            return Err(PkiError::InvalidCa(
                "CA private key does not match CA certificate".to_string(),
            ));
        }

        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();

        Ok(Self {
            ca_key_pem,
            ca_cert_pem: encode_pem(CERTIFICATE_TAG, cert_der),
            not_before,
            not_after,
        })
    }

    /// Get the CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Get the CA private key in PKCS#8 PEM format
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Get certificate info (validity period, etc.)
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.ca_cert_pem)
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::InvalidCa(format!("failed to load CA key: {}", e)))
    }

    /// Compute the leaf validity window, clamped to the CA's own expiry
    fn leaf_validity(
        &self,
        requested: Option<Duration>,
    ) -> Result<(OffsetDateTime, OffsetDateTime)> {
        let now = OffsetDateTime::now_utc();
        let now_ts = now.unix_timestamp();
        if now_ts >= self.not_after {
            return Err(PkiError::InvalidCa(format!(
                "CA certificate expired at {}",
                self.not_after
            )));
        }
        if now_ts < self.not_before {
            return Err(PkiError::InvalidCa(format!(
                "CA certificate is not valid before {}",
                self.not_before
            )));
        }

        let lifetime = match requested {
            Some(validity) => ::time::Duration::seconds(
                i64::try_from(validity.as_secs()).unwrap_or(i64::MAX / 2),
            ),
            None => ::time::Duration::days(CERT_VALIDITY_YEARS * 365),
        };
        let ca_not_after = OffsetDateTime::from_unix_timestamp(self.not_after)
            .map_err(|e| PkiError::InvalidCa(format!("CA expiry out of range: {}", e)))?;
        let not_after = now
            .checked_add(lifetime)
            .map_or(ca_not_after, |end| end.min(ca_not_after));

        Ok((now, not_after))
    }

    /// Generate a key pair and a client certificate for the request, signed by this CA
    ///
    /// The subject carries `common_name` and one O attribute per organization,
    /// in request order. Extended key usage is TLS client authentication.
    pub fn sign_client_cert(&self, request: &CertificateRequest) -> Result<IssuedCertificate> {
        let name = request.name.as_str();
        let (not_before, not_after) = self.leaf_validity(request.validity)?;

        let mut params = CertificateParams::default();
        // The subject is written after signing (see der::replace_subject)
        params.distinguished_name = DistinguishedName::new();
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.serial_number = Some(random_serial());
        params.use_authority_key_identifier_extension = true;
        params.not_before = not_before;
        params.not_after = not_after;

        let client_key = KeyPair::generate()
            .map_err(|e| PkiError::signing(name, format!("failed to generate key: {}", e)))?;
        let client_key_pem = Zeroizing::new(client_key.serialize_pem());

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::InvalidCa(format!("failed to create issuer: {}", e)))?;

        let cert = params
            .signed_by(&client_key, &issuer)
            .map_err(|e| PkiError::signing(name, e.to_string()))?;

        let subject = der::encode_subject(&request.common_name, &request.organizations);
        let cert_der = der::replace_subject(cert.der(), &subject, &ca_key)
            .map_err(|e| PkiError::signing(name, e))?;

        Ok(IssuedCertificate::new(
            encode_pem(CERTIFICATE_TAG, cert_der),
            client_key_pem,
        ))
    }
}

/// Random positive 159-bit serial number
fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 20] = rand::random();
    bytes[0] &= 0x7f;
    bytes[0] |= 0x40;
    SerialNumber::from_slice(&bytes)
}

/// Verification result for client certificates
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Subject and validity of the verified certificate
    pub info: Option<CertificateInfo>,
    /// Whether the certificate is valid
    pub valid: bool,
    /// Reason if invalid
    pub reason: Option<String>,
}

impl VerificationResult {
    fn invalid(reason: &str) -> Self {
        Self {
            info: None,
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Verify a client certificate was signed by the given CA and is currently valid
pub fn verify_client_cert(cert_pem: &str, ca_cert_pem: &str) -> Result<VerificationResult> {
    let cert_der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse client cert: {}", e)))?;

    let ca_cert_der = parse_pem(ca_cert_pem)?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    if cert.issuer().as_raw() != ca_cert.subject().as_raw() {
        return Ok(VerificationResult::invalid(
            "issuer does not match CA subject",
        ));
    }

    if cert.verify_signature(Some(ca_cert.public_key())).is_err() {
        return Ok(VerificationResult::invalid(
            "signature verification failed",
        ));
    }

    let now = now_unix();
    if now < cert.validity().not_before.timestamp() {
        return Ok(VerificationResult::invalid("certificate not yet valid"));
    }
    if now > cert.validity().not_after.timestamp() {
        return Ok(VerificationResult::invalid("certificate expired"));
    }

    Ok(VerificationResult {
        info: Some(CertificateInfo::from_x509(&cert)),
        valid: true,
        reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, organizations: &[&str]) -> CertificateRequest {
        CertificateRequest::new(name, name, "ca.crt", "ca.key")
            .with_organizations(organizations.iter().copied())
    }

    #[test]
    fn ca_can_be_created() {
        let ca = CertificateAuthority::new("Lattice Test CA").expect("CA creation should succeed");
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.ca_key_pem().contains("BEGIN PRIVATE KEY"));

        let info = ca.cert_info().expect("CA info should parse");
        assert!(info.is_ca);
        assert_eq!(info.common_name, "Lattice Test CA");
    }

    #[test]
    fn ca_can_be_saved_and_loaded() {
        let ca1 = CertificateAuthority::new("Persistent CA").expect("CA creation should succeed");
        let ca2 = CertificateAuthority::from_pem(ca1.ca_cert_pem(), ca1.ca_key_pem())
            .expect("CA loading should succeed");

        let issued = ca2
            .sign_client_cert(&request("test", &[]))
            .expect("signing should succeed");
        let result =
            verify_client_cert(&issued.cert_pem, ca1.ca_cert_pem()).expect("verify should run");
        assert!(result.valid);
    }

    #[test]
    fn mismatched_ca_key_rejected() {
        let ca1 = CertificateAuthority::new("CA One").expect("CA1 creation should succeed");
        let ca2 = CertificateAuthority::new("CA Two").expect("CA2 creation should succeed");

        let result = CertificateAuthority::from_pem(ca1.ca_cert_pem(), ca2.ca_key_pem());
        assert!(matches!(result, Err(PkiError::InvalidCa(msg)) if msg.contains("does not match")));
    }

    #[test]
    fn garbage_ca_material_rejected() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");

        assert!(matches!(
            CertificateAuthority::from_pem("not a cert", ca.ca_key_pem()),
            Err(PkiError::InvalidCa(_))
        ));
        assert!(matches!(
            CertificateAuthority::from_pem(ca.ca_cert_pem(), "not a key"),
            Err(PkiError::InvalidCa(_))
        ));
    }

    #[test]
    fn leaf_certificate_cannot_act_as_ca() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let leaf = ca
            .sign_client_cert(&request("leaf", &[]))
            .expect("signing should succeed");

        let result = CertificateAuthority::from_pem(&leaf.cert_pem, &leaf.key_pem);
        assert!(matches!(result, Err(PkiError::InvalidCa(msg)) if msg.contains("not a certificate authority")));
    }

    #[test]
    fn subject_carries_common_name_and_groups_in_order() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let issued = ca
            .sign_client_cert(&request("test-user", &["group-b", "group-a", "system:masters"]))
            .expect("signing should succeed");

        let info = issued.info().expect("info should parse");
        assert_eq!(info.common_name, "test-user");
        assert_eq!(
            info.organizations,
            vec!["group-b", "group-a", "system:masters"]
        );
        assert!(!info.is_ca);
    }

    #[test]
    fn subject_without_groups_has_no_organization() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let issued = ca
            .sign_client_cert(&request("solo", &[]))
            .expect("signing should succeed");

        let info = issued.info().expect("info should parse");
        assert_eq!(info.common_name, "solo");
        assert!(info.organizations.is_empty());
    }

    #[test]
    fn issued_key_matches_certificate() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let a = ca
            .sign_client_cert(&request("a", &[]))
            .expect("signing should succeed");
        let b = ca
            .sign_client_cert(&request("b", &[]))
            .expect("signing should succeed");

        assert!(a.key_matches().expect("key check should run"));
        assert!(!key_matches_cert(&a.cert_pem, &b.key_pem).expect("key check should run"));
    }

    #[test]
    fn signed_cert_verifies_against_issuing_ca_only() {
        let ca1 = CertificateAuthority::new("CA One").expect("CA1 creation should succeed");
        let ca2 = CertificateAuthority::new("CA Two").expect("CA2 creation should succeed");
        let issued = ca1
            .sign_client_cert(&request("user", &["devs"]))
            .expect("signing should succeed");

        let good = verify_client_cert(&issued.cert_pem, ca1.ca_cert_pem())
            .expect("verification should run");
        assert!(good.valid);
        assert_eq!(
            good.info.expect("info should be set").organizations,
            vec!["devs"]
        );

        let bad = verify_client_cert(&issued.cert_pem, ca2.ca_cert_pem())
            .expect("verification should run");
        assert!(!bad.valid);
        assert!(bad.reason.is_some());
    }

    #[test]
    fn serial_numbers_are_unique() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let a = ca
            .sign_client_cert(&request("a", &[]))
            .expect("signing should succeed");
        let b = ca
            .sign_client_cert(&request("a", &[]))
            .expect("signing should succeed");

        let serial_a = a.info().expect("info should parse").serial;
        let serial_b = b.info().expect("info should parse").serial;
        assert_ne!(serial_a, serial_b);
    }

    #[test]
    fn default_validity_is_one_year() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let issued = ca
            .sign_client_cert(&request("user", &[]))
            .expect("signing should succeed");

        let info = issued.info().expect("info should parse");
        assert_eq!(info.lifetime_secs(), CERT_VALIDITY_YEARS * 365 * 24 * 3600);
        assert!(!info.is_expired());
    }

    #[test]
    fn validity_is_clamped_to_ca_expiry() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let req = request("long-lived", &[])
            .with_validity(Duration::from_secs(50 * 365 * 24 * 3600));
        let issued = ca.sign_client_cert(&req).expect("signing should succeed");

        let leaf = issued.info().expect("info should parse");
        let ca_info = ca.cert_info().expect("CA info should parse");
        assert!(leaf.not_after <= ca_info.not_after);
    }

    #[test]
    fn request_names_are_validated() {
        assert!(request("alice", &[]).validate().is_ok());
        assert!(request("system:admin", &[]).validate().is_ok());

        for bad in ["", "../etc", "a/b", ".hidden", "a\\b", "ca"] {
            assert!(
                matches!(request(bad, &[]).validate(), Err(PkiError::InvalidRequest(_))),
                "{bad:?} should be rejected"
            );
        }

        let zero = request("alice", &[]).with_validity(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(PkiError::InvalidRequest(_))));
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let ca = CertificateAuthority::new("CA").expect("CA creation should succeed");
        let issued = ca
            .sign_client_cert(&request("user", &[]))
            .expect("signing should succeed");

        let debug = format!("{:?}", issued);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[test]
    fn retryable_errors() {
        let conflict = PkiError::IdentityConflict {
            name: "x".into(),
            lock: PathBuf::from("x.lock"),
        };
        assert!(conflict.is_retryable());
        assert!(!PkiError::InvalidCa("bad".into()).is_retryable());
        assert!(!PkiError::signing("x", "boom").is_retryable());
    }
}
