//! Kubeconfig rendering
//!
//! Typed kubeconfig structures serialized with serde. A [`CredentialDocument`]
//! maps onto a single-cluster, single-user, single-context config.

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialDocument;
use crate::{Error, Result};

/// Kubeconfig structure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind (always "Config")
    pub kind: String,
    /// Clusters
    pub clusters: Vec<KubeconfigCluster>,
    /// Users
    pub users: Vec<KubeconfigUser>,
    /// Contexts
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    pub current_context: String,
}

/// Cluster entry in kubeconfig
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterEndpoint,
}

/// Cluster endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEndpoint {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded)
    pub certificate_authority_data: String,
}

/// User entry in kubeconfig
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserCredentials,
}

/// Client certificate credentials of a user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserCredentials {
    /// Client certificate (base64 encoded)
    pub client_certificate_data: String,
    /// Client key (base64 encoded)
    pub client_key_data: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("client_certificate_data", &self.client_certificate_data)
            .field("client_key_data", &"<redacted>")
            .finish()
    }
}

/// Context entry in kubeconfig
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// User name (reference)
    pub user: String,
}

impl Kubeconfig {
    /// Parse a kubeconfig from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid kubeconfig: {}", e)))
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization(format!("failed to serialize kubeconfig: {}", e)))
    }
}

impl CredentialDocument {
    /// Build a kubeconfig with one cluster, user and context
    ///
    /// The context is named `<user>@<cluster_name>` and is the current context.
    pub fn to_kubeconfig(&self, cluster_name: &str) -> Kubeconfig {
        let context_name = format!("{}@{}", self.user(), cluster_name);
        Kubeconfig {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![KubeconfigCluster {
                name: cluster_name.to_string(),
                cluster: ClusterEndpoint {
                    server: self.server_url().to_string(),
                    certificate_authority_data: self.ca_cert_b64().to_string(),
                },
            }],
            users: vec![KubeconfigUser {
                name: self.user().to_string(),
                user: UserCredentials {
                    client_certificate_data: self.client_cert_b64().to_string(),
                    client_key_data: self.client_key_b64().to_string(),
                },
            }],
            contexts: vec![KubeconfigContext {
                name: context_name.clone(),
                context: ContextConfig {
                    cluster: cluster_name.to_string(),
                    user: self.user().to_string(),
                },
            }],
            current_context: context_name,
        }
    }
}
