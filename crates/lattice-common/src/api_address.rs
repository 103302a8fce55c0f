//! Control plane API address resolution
//!
//! Picks the address a client outside the cluster should talk to and turns
//! it into an `https://host:port` URL. Precedence is external, then
//! internal, then the plain address; blank values are treated as unset.

use std::net::Ipv6Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result, DEFAULT_API_PORT};

/// Address settings of the cluster API server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAddressConfig {
    /// Address reachable from outside the cluster network (load balancer, DNS name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_address: Option<String>,
    /// Address reachable from inside the cluster network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_address: Option<String>,
    /// Address the API server binds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// API server port, zero means the default
    #[serde(default)]
    pub port: u16,
}

impl ClusterAddressConfig {
    /// Set the external address
    pub fn with_external_address(mut self, address: impl Into<String>) -> Self {
        self.external_address = Some(address.into());
        self
    }

    /// Set the internal address
    pub fn with_internal_address(mut self, address: impl Into<String>) -> Self {
        self.internal_address = Some(address.into());
        self
    }

    /// Set the plain address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the API port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Port to put in the URL
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_API_PORT
        } else {
            self.port
        }
    }

    /// First non-blank address by precedence, trimmed
    pub fn selected_address(&self) -> Option<&str> {
        [
            self.external_address.as_deref(),
            self.internal_address.as_deref(),
            self.address.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
    }
}

/// Resolve the API URL clients should use
///
/// Returns `https://<host>:<port>`. IPv6 literals are bracketed. Addresses
/// that already carry a scheme, a port or a path are rejected rather than
/// guessed at.
pub fn resolve_api_url(config: &ClusterAddressConfig) -> Result<String> {
    let address = config
        .selected_address()
        .ok_or(Error::NoAddressConfigured)?;
    let host = normalize_host(address)?;
    let url = format!("https://{}:{}", host, config.effective_port());
    debug!(address, url = %url, "resolved API URL");
    Ok(url)
}

/// Validate a bare host and bracket it when it is an IPv6 literal
fn normalize_host(address: &str) -> Result<String> {
    if address.contains("://") {
        return Err(Error::malformed_address(
            address,
            "address must not include a URL scheme",
        ));
    }
    if address.contains('/') {
        return Err(Error::malformed_address(
            address,
            "address must not include a path",
        ));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(Error::malformed_address(
            address,
            "address must not contain whitespace",
        ));
    }

    if let Some(inner) = address.strip_prefix('[') {
        return match inner.strip_suffix(']') {
            Some(literal) if literal.parse::<Ipv6Addr>().is_ok() => Ok(address.to_string()),
            Some(_) => Err(Error::malformed_address(
                address,
                "bracketed host is not an IPv6 address",
            )),
            None => Err(Error::malformed_address(
                address,
                "address must not include a port",
            )),
        };
    }

    if address.parse::<Ipv6Addr>().is_ok() {
        return Ok(format!("[{}]", address));
    }

    if address.contains(':') {
        return Err(Error::malformed_address(
            address,
            "address must not include a port",
        ));
    }

    Ok(address.to_string())
}

/// Cluster configuration document
///
/// Only the fields needed to locate the API server are modelled; anything
/// else in the document is ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// API version of the document
    #[serde(default)]
    pub api_version: String,
    /// Kind of the document
    #[serde(default)]
    pub kind: String,
    /// Object metadata
    #[serde(default)]
    pub metadata: ClusterMetadata,
    /// Cluster spec
    #[serde(default)]
    pub spec: ClusterSpec,
}

/// Metadata of a cluster configuration document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// Cluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Spec of a cluster configuration document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// API server address settings
    #[serde(default)]
    pub api: ClusterAddressConfig,
}

impl ClusterConfig {
    /// Parse a cluster configuration from YAML
    ///
    /// Blank input yields an empty configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid cluster config: {}", e)))
    }

    /// Read and parse a cluster configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::config(path, e.to_string()))?;
        Self::from_yaml(&contents).map_err(|e| Error::config(path, e.to_string()))
    }

    /// Address settings of the API server
    pub fn api(&self) -> &ClusterAddressConfig {
        &self.spec.api
    }

    /// Resolve the API URL for this cluster
    pub fn api_url(&self) -> Result<String> {
        resolve_api_url(self.api())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external(address: &str) -> ClusterAddressConfig {
        ClusterAddressConfig::default().with_external_address(address)
    }

    // ==========================================================================
    // Story Tests: Choosing the address clients connect to
    // ==========================================================================

    /// Story: A cluster behind a load balancer advertises its external address
    #[test]
    fn story_external_address_wins() {
        let config = ClusterAddressConfig::default()
            .with_external_address("api.example.com")
            .with_internal_address("10.0.0.1")
            .with_address("192.168.1.10");

        let url = resolve_api_url(&config).expect("resolution should succeed");
        assert_eq!(url, "https://api.example.com:6443");
    }

    /// Story: Without an external address the internal one is used
    #[test]
    fn story_internal_then_plain_address() {
        let config = ClusterAddressConfig::default()
            .with_internal_address("10.0.0.1")
            .with_address("192.168.1.10");
        assert_eq!(
            resolve_api_url(&config).expect("resolution should succeed"),
            "https://10.0.0.1:6443"
        );

        let config = ClusterAddressConfig::default().with_address("192.168.1.10");
        assert_eq!(
            resolve_api_url(&config).expect("resolution should succeed"),
            "https://192.168.1.10:6443"
        );
    }

    #[test]
    fn external_ip_uses_default_port() {
        let url = resolve_api_url(&external("1.2.3.4")).expect("resolution should succeed");
        assert_eq!(url, "https://1.2.3.4:6443");
    }

    #[test]
    fn custom_port_is_used() {
        let config = external("1.2.3.4").with_port(443);
        assert_eq!(config.effective_port(), 443);
        assert_eq!(
            resolve_api_url(&config).expect("resolution should succeed"),
            "https://1.2.3.4:443"
        );
    }

    #[test]
    fn blank_values_are_skipped_and_trimmed() {
        let config = ClusterAddressConfig::default()
            .with_external_address("   ")
            .with_internal_address("")
            .with_address("  node-1.local \n");
        assert_eq!(
            resolve_api_url(&config).expect("resolution should succeed"),
            "https://node-1.local:6443"
        );
    }

    #[test]
    fn nothing_configured_is_an_error() {
        let err = resolve_api_url(&ClusterAddressConfig::default())
            .expect_err("empty config should fail");
        assert!(matches!(err, Error::NoAddressConfigured));

        let blank = external(" ");
        assert!(matches!(
            resolve_api_url(&blank),
            Err(Error::NoAddressConfigured)
        ));
    }

    #[test]
    fn ipv6_literals_are_bracketed() {
        assert_eq!(
            resolve_api_url(&external("fd00::1")).expect("resolution should succeed"),
            "https://[fd00::1]:6443"
        );
        assert_eq!(
            resolve_api_url(&external("[fd00::1]")).expect("resolution should succeed"),
            "https://[fd00::1]:6443"
        );
    }

    #[test]
    fn address_with_port_is_malformed() {
        let config = ClusterAddressConfig::default().with_address("10.0.0.5:6443");
        match resolve_api_url(&config) {
            Err(Error::MalformedAddress { address, .. }) => assert_eq!(address, "10.0.0.5:6443"),
            other => panic!("expected MalformedAddress, got {:?}", other),
        }

        assert!(matches!(
            resolve_api_url(&external("[fd00::1]:6443")),
            Err(Error::MalformedAddress { .. })
        ));
    }

    #[test]
    fn address_with_scheme_or_path_is_malformed() {
        for bad in ["https://api.example.com", "api.example.com/k8s", "[not-v6]", "a b"] {
            assert!(
                matches!(
                    resolve_api_url(&external(bad)),
                    Err(Error::MalformedAddress { .. })
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    // ==========================================================================
    // Cluster config document
    // ==========================================================================

    #[test]
    fn parses_cluster_document() {
        let yaml = r#"
apiVersion: lattice.dev/v1alpha1
kind: ClusterConfig
metadata:
  name: prod
spec:
  api:
    externalAddress: 1.2.3.4
    address: 10.0.0.2
    port: 8443
"#;
        let config = ClusterConfig::from_yaml(yaml).expect("cluster config should parse");
        assert_eq!(config.kind, "ClusterConfig");
        assert_eq!(config.metadata.name.as_deref(), Some("prod"));
        assert_eq!(config.api().external_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(
            config.api_url().expect("resolution should succeed"),
            "https://1.2.3.4:8443"
        );
    }

    #[test]
    fn missing_api_section_yields_empty_config() {
        let config = ClusterConfig::from_yaml("kind: ClusterConfig\n")
            .expect("cluster config should parse");
        assert_eq!(config.api(), &ClusterAddressConfig::default());
        assert!(matches!(config.api_url(), Err(Error::NoAddressConfigured)));

        let config = ClusterConfig::from_yaml("").expect("blank config should parse");
        assert_eq!(config.api().effective_port(), DEFAULT_API_PORT);
    }

    #[test]
    fn invalid_yaml_is_a_serialization_error() {
        let err = ClusterConfig::from_yaml("spec: [unclosed").expect_err("should fail");
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("lattice.yaml");

        let err = ClusterConfig::from_file(&path).expect_err("missing file should fail");
        match err {
            Error::Config { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected Config error, got {:?}", other),
        }

        std::fs::write(&path, "spec:\n  api:\n    internalAddress: 10.1.1.1\n")
            .expect("write should succeed");
        let config = ClusterConfig::from_file(&path).expect("config should load");
        assert_eq!(
            config.api_url().expect("resolution should succeed"),
            "https://10.1.1.1:6443"
        );
    }
}
