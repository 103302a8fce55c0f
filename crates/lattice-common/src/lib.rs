//! Common types for Lattice: API address resolution, client credentials, errors

#![deny(missing_docs)]

pub mod api_address;
pub mod credentials;
pub mod error;
pub mod kubeconfig;

pub use api_address::{resolve_api_url, ClusterAddressConfig, ClusterConfig};
pub use credentials::{assemble, ClientCredential, CredentialDocument};
pub use error::Error;
pub use kubeconfig::Kubeconfig;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port of the Kubernetes API server
pub const DEFAULT_API_PORT: u16 = 6443;
