//! Error types for address resolution, credential assembly and cluster config
//!
//! Errors are structured with fields to aid debugging. Each variant names
//! the address, field or path that caused it.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for Lattice credential operations
#[derive(Debug, Error)]
pub enum Error {
    /// None of the external, internal or plain address fields is set
    #[error("no API address configured: set externalAddress, internalAddress or address")]
    NoAddressConfigured,

    /// The configured address cannot be turned into an API URL
    #[error("malformed API address '{address}': {reason}")]
    MalformedAddress {
        /// The offending address as configured
        address: String,
        /// What is wrong with it
        reason: String,
    },

    /// An input byte sequence is not UTF-8 PEM
    #[error("invalid encoding for {field}: {message}")]
    InvalidEncoding {
        /// Name of the credential field (e.g. "ca_cert")
        field: String,
        /// Description of what failed
        message: String,
    },

    /// The cluster configuration file could not be read or parsed
    #[error("cluster config error [{}]: {message}", path.display())]
    Config {
        /// Path of the configuration file
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a malformed address error
    pub fn malformed_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid encoding error for the named field
    pub fn invalid_encoding(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a config error for the given file
    pub fn config(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Get the field name if this error concerns a credential field
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::InvalidEncoding { field, .. } => Some(field),
            _ => None,
        }
    }
}
