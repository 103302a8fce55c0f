//! On-disk PKI store
//!
//! Layout under the store root:
//!
//! - `ca.crt` / `ca.key`: default CA material
//! - `<name>.crt` / `<name>.key`: issued client pair for identity `name`
//! - `<name>.lock`: held while an issuer is working on `name`
//!
//! Pairs are written through a temporary file in the same directory and
//! renamed into place, key first, so a certificate is never visible without
//! its key. A pair only counts as present when both files exist and the key
//! matches the certificate.
//!
//! Lock files record the holder's PID. A lock whose holder is no longer
//! running, or whose contents cannot be read back as a PID after
//! [`STALE_LOCK_AGE`], is reclaimed by the next issuer.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::pki::{key_matches_cert, CertificateAuthority, IssuedCertificate, PkiError, Result};

/// Default CA certificate file name
pub const CA_CERT_FILE: &str = "ca.crt";

/// Default CA key file name
pub const CA_KEY_FILE: &str = "ca.key";

/// How often a blocked issuer re-checks the identity lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Age after which a lock without a verifiable live holder is reclaimed
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

const STORE_DIR_MODE: u32 = 0o755;
const CERT_FILE_MODE: u32 = 0o644;
const KEY_FILE_MODE: u32 = 0o600;

/// Accessor for CA material and issued identity pairs under a root directory
#[derive(Debug, Clone)]
pub struct PkiStore {
    root: PathBuf,
}

impl PkiStore {
    /// Create a store rooted at `root` (created lazily)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default CA certificate location
    pub fn ca_cert_path(&self) -> PathBuf {
        self.root.join(CA_CERT_FILE)
    }

    /// Default CA key location
    pub fn ca_key_path(&self) -> PathBuf {
        self.root.join(CA_KEY_FILE)
    }

    /// Certificate location for an identity
    pub fn cert_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.crt", name))
    }

    /// Private key location for an identity
    pub fn key_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.key", name))
    }

    /// Lock file location for an identity
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.lock", name))
    }

    /// Create the store root if missing
    pub fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.root)
            .map_err(|e| PkiError::store_unavailable(&self.root, e))?;
        set_mode(&self.root, STORE_DIR_MODE)
    }

    /// Read and validate CA material from the given locations
    pub fn read_ca(&self, cert_path: &Path, key_path: &Path) -> Result<CertificateAuthority> {
        let cert_pem = read_ca_file(cert_path, "certificate")?;
        let key_pem = Zeroizing::new(read_ca_file(key_path, "key")?);
        CertificateAuthority::from_pem(&cert_pem, &key_pem)
    }

    /// Load the issued pair for `name`, if a complete and consistent one exists
    pub fn read_identity(&self, name: &str) -> Result<Option<IssuedCertificate>> {
        let cert_path = self.cert_path(name);
        let key_path = self.key_path(name);

        let cert_pem = read_optional(&cert_path)?;
        let key_pem = read_optional(&key_path)?.map(Zeroizing::new);

        let (cert_pem, key_pem) = match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => return Ok(None),
            (cert, _) => {
                warn!(
                    name,
                    has_cert = cert.is_some(),
                    "ignoring incomplete identity pair"
                );
                return Ok(None);
            }
        };

        match key_matches_cert(&cert_pem, &key_pem) {
            Ok(true) => Ok(Some(IssuedCertificate::new(cert_pem, key_pem))),
            Ok(false) => {
                warn!(name, "ignoring identity pair whose key does not match its certificate");
                Ok(None)
            }
            Err(e) => {
                warn!(name, error = %e, "ignoring unreadable identity pair");
                Ok(None)
            }
        }
    }

    /// Persist an issued pair for `name`, replacing any previous pair
    ///
    /// Callers must hold the identity lock.
    pub fn write_identity(&self, name: &str, issued: &IssuedCertificate, owner: &str) -> Result<()> {
        let key_path = self.key_path(name);
        let cert_path = self.cert_path(name);

        self.write_atomic(&key_path, issued.key_pem.as_bytes(), KEY_FILE_MODE, Some(owner))?;
        self.write_atomic(&cert_path, issued.cert_pem.as_bytes(), CERT_FILE_MODE, None)?;

        debug!(name, owner, path = %cert_path.display(), "identity pair written");
        Ok(())
    }

    /// Acquire the exclusive lock for `name`, waiting up to `timeout` for a
    /// concurrent issuer to finish
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    pub fn lock_identity(&self, name: &str, timeout: Duration) -> Result<IdentityLock> {
        let path = self.lock_path(name);
        let deadline = Instant::now().checked_add(timeout);

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let lock = IdentityLock { path };
                    writeln!(file, "{}", std::process::id())
                        .map_err(|e| PkiError::store_unavailable(&lock.path, e))?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if reclaim_stale_lock(&path) {
                        continue;
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(PkiError::IdentityConflict {
                            name: name.to_string(),
                            lock: path,
                        });
                    }
                    debug!(name, "identity lock held, waiting");
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(PkiError::store_unavailable(&path, e)),
            }
        }
    }

    /// Write `contents` to a temp file, hand it to `owner`, then rename it
    /// over `path`. Any failure leaves `path` untouched.
    fn write_atomic(
        &self,
        path: &Path,
        contents: &[u8],
        mode: u32,
        owner: Option<&str>,
    ) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("identity");
        let tmp = self
            .root
            .join(format!(".{}.{:08x}.tmp", file_name, rand::random::<u32>()));

        let result = (|| {
            let mut file = create_with_mode(&tmp, mode)?;
            file.write_all(contents)?;
            file.sync_all()?;
            if let Some(owner) = owner {
                apply_owner(&tmp, owner)?;
            }
            fs::rename(&tmp, path)
        })();

        result.map_err(|e| {
            let _ = fs::remove_file(&tmp);
            PkiError::store_unavailable(path, e)
        })
    }
}

/// Exclusive per-identity lock, released on drop
#[derive(Debug)]
pub struct IdentityLock {
    path: PathBuf,
}

impl IdentityLock {
    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IdentityLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release identity lock");
        }
    }
}

fn read_ca_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            PkiError::InvalidCa(format!("CA {} not found at {}", what, path.display()))
        }
        ErrorKind::InvalidData => PkiError::InvalidCa(format!(
            "CA {} at {} is not valid UTF-8 PEM",
            what,
            path.display()
        )),
        _ => PkiError::store_unavailable(path, e),
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PkiError::store_unavailable(path, e)),
    }
}

fn create_with_mode(path: &Path, mode: u32) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| PkiError::store_unavailable(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Hand the key file to `owner` when it names a numeric uid.
///
/// Non-numeric owners are bookkeeping labels only.
fn apply_owner(path: &Path, owner: &str) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if let Ok(uid) = owner.parse::<u32>() {
            std::os::unix::fs::chown(path, Some(uid), None)?;
        }
    }
    #[cfg(not(unix))]
    let _ = (path, owner);
    Ok(())
}

/// Remove the lock at `path` if its holder is gone. Returns true when the
/// caller should retry the exclusive create.
fn reclaim_stale_lock(path: &Path) -> bool {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        // Released between the create attempt and this read
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(_) => return false,
    };

    let stale = match contents.trim().parse::<u32>() {
        Ok(pid) => holder_is_gone(pid).unwrap_or_else(|| lock_age_exceeded(path)),
        // The holder may not have written its PID yet
        Err(_) => lock_age_exceeded(path),
    };
    if !stale {
        return false;
    }

    // Only remove the lock we inspected, not one a racing issuer just took
    match fs::read_to_string(path) {
        Ok(current) if current == contents => {}
        Ok(_) => return false,
        Err(e) => return e.kind() == ErrorKind::NotFound,
    }
    match fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), holder = contents.trim(), "reclaimed stale identity lock");
            true
        }
        Err(e) => e.kind() == ErrorKind::NotFound,
    }
}

/// Whether process `pid` has exited, when that can be told from procfs
fn holder_is_gone(pid: u32) -> Option<bool> {
    if pid == std::process::id() {
        return Some(false);
    }
    if !Path::new("/proc/self").exists() {
        return None;
    }
    Some(!Path::new("/proc").join(pid.to_string()).exists())
}

fn lock_age_exceeded(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= STALE_LOCK_AGE)
}
