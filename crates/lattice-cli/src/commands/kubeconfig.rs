//! `lattice kubeconfig` - issue a client certificate and print a kubeconfig
//!
//! Signs (or reuses) a client certificate from the cluster CA in the
//! certificate root, resolves the API URL from the cluster config and
//! renders a kubeconfig that authenticates with that certificate.
//!
//! # Usage
//!
//! ```bash
//! # Kubeconfig for user "alice" in groups "dev" and "ops"
//! lattice kubeconfig create alice --groups dev,ops
//!
//! # Replace an existing certificate for alice (e.g. after changing groups)
//! lattice kubeconfig create alice --groups dev --reissue
//!
//! # Cluster admin kubeconfig, saved to a file
//! lattice kubeconfig admin -o /root/admin.conf
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use lattice_common::credentials::assemble;
use lattice_common::{ClusterConfig, Kubeconfig};
use lattice_infra::{verify_client_cert, CertificateManager, CertificateRequest, PkiStore};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Default certificate root holding `ca.crt`, `ca.key` and issued identities
pub const DEFAULT_CERT_ROOT: &str = "/var/lib/lattice/pki";

/// Default cluster configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lattice/lattice.yaml";

/// Cluster name used when neither the flag nor the config provides one
pub const DEFAULT_CLUSTER_NAME: &str = "lattice";

/// Store identity of the admin credential
pub const ADMIN_IDENTITY: &str = "admin";
/// Subject CN of the admin credential
pub const ADMIN_COMMON_NAME: &str = "kubernetes-admin";
/// Group granting cluster-admin through the default RBAC bindings
pub const ADMIN_GROUP: &str = "system:masters";

/// Issue client certificates and render kubeconfigs
#[derive(Args, Debug)]
pub struct KubeconfigArgs {
    #[command(subcommand)]
    pub command: KubeconfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum KubeconfigCommand {
    /// Create a kubeconfig for a user, signed by the cluster CA
    Create(CreateArgs),
    /// Create a cluster-admin kubeconfig
    Admin(CommonArgs),
}

/// Arguments for `lattice kubeconfig create`
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// User name, used as the certificate CN
    pub user: String,

    /// Comma-separated groups, one certificate O entry each
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Options shared by all kubeconfig subcommands
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Cluster configuration file
    #[arg(long, env = "LATTICE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory holding the CA and issued certificates
    #[arg(long, env = "LATTICE_CERT_ROOT", default_value = DEFAULT_CERT_ROOT)]
    pub cert_root: PathBuf,

    /// Cluster name in the kubeconfig (default: metadata.name from the config)
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Owner recorded for the issued key; a numeric uid also sets file ownership
    #[arg(long, default_value = "root")]
    pub owner: String,

    /// Sign a new certificate even if one is already stored
    #[arg(long, default_value = "false")]
    pub reissue: bool,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Identity a kubeconfig is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Store key of the certificate pair
    pub name: String,
    /// Certificate CN (Kubernetes user)
    pub common_name: String,
    /// Certificate O entries (Kubernetes groups)
    pub groups: Vec<String>,
}

impl Identity {
    /// Identity for a regular user; the user name doubles as store key
    pub fn user(user: &str, groups: &[String]) -> Result<Self> {
        let user = user.trim();
        if user.is_empty() {
            return Err(Error::validation("user name must not be empty"));
        }
        let groups = groups
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            name: user.to_string(),
            common_name: user.to_string(),
            groups,
        })
    }

    /// The cluster-admin identity
    pub fn admin() -> Self {
        Self {
            name: ADMIN_IDENTITY.to_string(),
            common_name: ADMIN_COMMON_NAME.to_string(),
            groups: vec![ADMIN_GROUP.to_string()],
        }
    }
}

/// Run the kubeconfig command
pub fn run(args: KubeconfigArgs) -> Result<()> {
    let (identity, common) = match args.command {
        KubeconfigCommand::Create(create) => {
            (Identity::user(&create.user, &create.groups)?, create.common)
        }
        KubeconfigCommand::Admin(common) => (Identity::admin(), common),
    };

    let kubeconfig = create_kubeconfig(&identity, &common)?;
    let yaml = kubeconfig.to_yaml()?;

    match &common.output {
        Some(path) => {
            write_private_file(path, yaml.as_bytes())?;
            eprintln!("Kubeconfig written to {}", path.display());
        }
        None => {
            std::io::stdout().write_all(yaml.as_bytes())?;
        }
    }

    Ok(())
}

/// Issue (or reuse) the identity's certificate and build its kubeconfig
pub fn create_kubeconfig(identity: &Identity, common: &CommonArgs) -> Result<Kubeconfig> {
    let cluster = ClusterConfig::from_file(&common.config)?;
    let server_url = cluster.api_url()?;
    debug!(config = %common.config.display(), server = %server_url, "loaded cluster config");

    let store = PkiStore::new(&common.cert_root);
    let request = CertificateRequest::new(
        identity.name.as_str(),
        identity.common_name.as_str(),
        store.ca_cert_path(),
        store.ca_key_path(),
    )
    .with_organizations(identity.groups.iter().cloned());

    let manager = CertificateManager::new(store);
    let issued = if common.reissue {
        manager.reissue_certificate(&request, &common.owner)?
    } else {
        manager.ensure_certificate(&request, &common.owner)?
    };

    let ca_cert_pem = std::fs::read(&request.ca_cert).map_err(|source| Error::Read {
        path: request.ca_cert.clone(),
        source,
    })?;
    check_issued_by_ca(&issued.cert_pem, &ca_cert_pem, &identity.name);

    let document = assemble(&ca_cert_pem, &issued, &identity.common_name, &server_url)?;
    let cluster_name = common
        .cluster_name
        .as_deref()
        .or(cluster.metadata.name.as_deref())
        .unwrap_or(DEFAULT_CLUSTER_NAME);

    info!(
        user = %identity.common_name,
        cluster = cluster_name,
        server = %server_url,
        "Generated kubeconfig"
    );
    Ok(document.to_kubeconfig(cluster_name))
}

/// Warn when the client certificate does not chain to the CA embedded next
/// to it, e.g. after the CA was rotated under a stored identity. Returns
/// whether the certificate verified.
fn check_issued_by_ca(cert_pem: &str, ca_cert_pem: &[u8], name: &str) -> bool {
    let result = std::str::from_utf8(ca_cert_pem)
        .map_err(|e| e.to_string())
        .and_then(|ca| verify_client_cert(cert_pem, ca).map_err(|e| e.to_string()));

    match result {
        Ok(verification) if verification.valid => true,
        Ok(verification) => {
            warn!(
                name,
                reason = verification.reason.as_deref().unwrap_or("unknown"),
                "client certificate does not verify against the cluster CA; use --reissue to replace it"
            );
            false
        }
        Err(error) => {
            warn!(name, %error, "could not verify client certificate against the cluster CA");
            false
        }
    }
}

/// Write a file readable only by its owner; it carries a private key
fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let to_write_error = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = options.open(path).map_err(to_write_error)?;
    file.write_all(contents).map_err(to_write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> KubeconfigCommand {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        match cli.command {
            Commands::Kubeconfig(args) => args.command,
        }
    }

    #[test]
    fn create_parses_user_and_groups() {
        let command = parse(&[
            "lattice",
            "kubeconfig",
            "create",
            "alice",
            "--groups",
            "dev,ops",
            "--cert-root",
            "/tmp/pki",
            "--config",
            "/tmp/lattice.yaml",
        ]);

        match command {
            KubeconfigCommand::Create(create) => {
                assert_eq!(create.user, "alice");
                assert_eq!(create.groups, vec!["dev", "ops"]);
                assert_eq!(create.common.cert_root, PathBuf::from("/tmp/pki"));
                assert_eq!(create.common.config, PathBuf::from("/tmp/lattice.yaml"));
                assert!(!create.common.reissue);
                assert!(create.common.output.is_none());
            }
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn admin_parses_output_and_reissue() {
        let command = parse(&["lattice", "kubeconfig", "admin", "--reissue", "-o", "admin.conf"]);
        match command {
            KubeconfigCommand::Admin(common) => {
                assert!(common.reissue);
                assert_eq!(common.output, Some(PathBuf::from("admin.conf")));
                assert_eq!(common.owner, "root");
            }
            other => panic!("expected admin, got {:?}", other),
        }
    }

    #[test]
    fn create_requires_user() {
        assert!(Cli::try_parse_from(["lattice", "kubeconfig", "create"]).is_err());
    }

    #[test]
    fn user_identity_trims_and_drops_blank_groups() {
        let groups = vec![" dev ".to_string(), String::new(), "ops".to_string()];
        let identity = Identity::user(" alice ", &groups).expect("identity should be valid");
        assert_eq!(identity.name, "alice");
        assert_eq!(identity.common_name, "alice");
        assert_eq!(identity.groups, vec!["dev", "ops"]);
    }

    #[test]
    fn blank_user_is_rejected() {
        assert!(matches!(
            Identity::user("  ", &[]),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn admin_identity_is_in_masters_group() {
        let admin = Identity::admin();
        assert_eq!(admin.name, "admin");
        assert_eq!(admin.common_name, "kubernetes-admin");
        assert_eq!(admin.groups, vec!["system:masters"]);
    }

    #[cfg(unix)]
    #[test]
    fn output_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("kubeconfig");
        write_private_file(&path, b"apiVersion: v1\n").expect("write should succeed");

        let mode = std::fs::metadata(&path)
            .expect("metadata should succeed")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            std::fs::read_to_string(&path).expect("read should succeed"),
            "apiVersion: v1\n"
        );
    }

    #[test]
    fn issuer_check_flags_certificate_from_another_ca() {
        let ca = lattice_infra::CertificateAuthority::new("cluster-ca").expect("CA should build");
        let other = lattice_infra::CertificateAuthority::new("other-ca").expect("CA should build");
        let issued = ca
            .sign_client_cert(&CertificateRequest::new("alice", "alice", "ca.crt", "ca.key"))
            .expect("signing should succeed");

        assert!(check_issued_by_ca(&issued.cert_pem, ca.ca_cert_pem().as_bytes(), "alice"));
        assert!(!check_issued_by_ca(&issued.cert_pem, other.ca_cert_pem().as_bytes(), "alice"));
        assert!(!check_issued_by_ca(&issued.cert_pem, b"not a certificate", "alice"));
    }
}
