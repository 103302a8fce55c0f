//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Certificate issuance or the PKI store failed
    #[error(transparent)]
    Pki(#[from] lattice_infra::PkiError),

    /// Cluster config, address resolution or kubeconfig assembly failed
    #[error(transparent)]
    Common(#[from] lattice_common::Error),

    /// Writing the kubeconfig to stdout failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An input file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The output file could not be written
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File that was being written
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Command-line arguments are inconsistent or out of range
    #[error("validation error: {message}")]
    Validation {
        /// What is wrong with the arguments
        message: String,
    },
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
