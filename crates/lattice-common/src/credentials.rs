//! Client access credentials
//!
//! Bundles the CA certificate, a client certificate/key pair, the user name
//! and the API URL into a [`CredentialDocument`]. Assembly is pure: nothing
//! is read from or written to disk here.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{Error, Result};

/// Field names used in encoding errors
pub const FIELD_CA_CERT: &str = "ca_cert";
/// Field name of the client certificate
pub const FIELD_CLIENT_CERT: &str = "client_cert";
/// Field name of the client key
pub const FIELD_CLIENT_KEY: &str = "client_key";

/// A client certificate and its private key, both PEM encoded
pub trait ClientCredential {
    /// PEM encoded client certificate
    fn certificate_pem(&self) -> &[u8];
    /// PEM encoded private key of the client certificate
    fn private_key_pem(&self) -> &[u8];
}

/// Everything a client needs to authenticate to the API server
///
/// The three PEM fields are standard base64 without line breaks, ready to
/// be embedded in a kubeconfig.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialDocument {
    ca_cert_b64: String,
    client_cert_b64: String,
    client_key_b64: String,
    user: String,
    server_url: String,
}

impl CredentialDocument {
    /// Base64 of the CA certificate PEM
    pub fn ca_cert_b64(&self) -> &str {
        &self.ca_cert_b64
    }

    /// Base64 of the client certificate PEM
    pub fn client_cert_b64(&self) -> &str {
        &self.client_cert_b64
    }

    /// Base64 of the client key PEM
    pub fn client_key_b64(&self) -> &str {
        &self.client_key_b64
    }

    /// User the credential was issued for
    pub fn user(&self) -> &str {
        &self.user
    }

    /// API server URL
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl std::fmt::Debug for CredentialDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDocument")
            .field("user", &self.user)
            .field("server_url", &self.server_url)
            .field("client_key_b64", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Assemble a credential document from PEM material
///
/// Each PEM input must be valid UTF-8 containing at least one PEM block.
/// The bytes are encoded exactly as given; `server_url` is copied verbatim.
pub fn assemble(
    ca_cert_pem: &[u8],
    client: &impl ClientCredential,
    user: &str,
    server_url: &str,
) -> Result<CredentialDocument> {
    let ca_cert_b64 = encode_pem_field(FIELD_CA_CERT, ca_cert_pem)?;
    let client_cert_b64 = encode_pem_field(FIELD_CLIENT_CERT, client.certificate_pem())?;
    let client_key_b64 = encode_pem_field(FIELD_CLIENT_KEY, client.private_key_pem())?;

    Ok(CredentialDocument {
        ca_cert_b64,
        client_cert_b64,
        client_key_b64,
        user: user.to_string(),
        server_url: server_url.to_string(),
    })
}

fn encode_pem_field(field: &str, bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::invalid_encoding(field, format!("not valid UTF-8: {}", e)))?;
    let blocks = pem::parse_many(text)
        .map_err(|e| Error::invalid_encoding(field, format!("invalid PEM: {}", e)))?;
    if blocks.is_empty() {
        return Err(Error::invalid_encoding(field, "no PEM block found"));
    }
    Ok(STANDARD.encode(bytes))
}
