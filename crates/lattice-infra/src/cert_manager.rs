//! Client certificate issuance against the PKI store
//!
//! [`CertificateManager::ensure_certificate`] issues at most one pair per
//! identity name: if the store already holds a consistent pair for the name
//! it is returned unchanged. Re-signing an existing identity (for example to
//! change its groups) is only done through
//! [`CertificateManager::reissue_certificate`].
//!
//! A stored pair is returned without taking the lock. Signing runs under the
//! identity's lock file, so concurrent callers for the same name serialize:
//! the loser either observes the winner's pair or gives up with
//! [`IdentityConflict`](crate::pki::PkiError::IdentityConflict) once the lock
//! wait expires.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::cert_store::PkiStore;
use crate::pki::{CertificateAuthority, CertificateRequest, IssuedCertificate, Result};

/// Default time to wait for a concurrent issuer of the same identity
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueMode {
    /// Return the stored pair when present
    Ensure,
    /// Always sign a new pair and replace the stored one
    Reissue,
}

/// Issues client certificates into a [`PkiStore`]
#[derive(Debug, Clone)]
pub struct CertificateManager {
    store: PkiStore,
    lock_timeout: Duration,
}

impl CertificateManager {
    /// Create a manager writing to `store`
    pub fn new(store: PkiStore) -> Self {
        Self {
            store,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override how long to wait on a concurrent issuer
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// The backing store
    pub fn store(&self) -> &PkiStore {
        &self.store
    }

    /// Return the stored pair for `request.name`, issuing one if none exists
    ///
    /// The CA is loaded from the request's locators only when a new
    /// certificate has to be signed. `owner` is a bookkeeping label for the
    /// written files (see [`PkiStore::write_identity`]).
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn ensure_certificate(
        &self,
        request: &CertificateRequest,
        owner: &str,
    ) -> Result<IssuedCertificate> {
        self.issue(request, None, owner, IssueMode::Ensure)
    }

    /// Like [`ensure_certificate`](Self::ensure_certificate) with an already
    /// loaded CA handle; the request's CA locators are ignored
    #[instrument(skip(self, request, ca), fields(name = %request.name))]
    pub fn ensure_certificate_with_ca(
        &self,
        request: &CertificateRequest,
        ca: &CertificateAuthority,
        owner: &str,
    ) -> Result<IssuedCertificate> {
        self.issue(request, Some(ca), owner, IssueMode::Ensure)
    }

    /// Sign a fresh pair for `request.name`, replacing any stored pair
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn reissue_certificate(
        &self,
        request: &CertificateRequest,
        owner: &str,
    ) -> Result<IssuedCertificate> {
        self.issue(request, None, owner, IssueMode::Reissue)
    }

    fn issue(
        &self,
        request: &CertificateRequest,
        ca: Option<&CertificateAuthority>,
        owner: &str,
        mode: IssueMode,
    ) -> Result<IssuedCertificate> {
        request.validate()?;
        self.store.ensure_root()?;

        // Stored pairs are only ever replaced whole, so reading one needs no lock
        if mode == IssueMode::Ensure {
            if let Some(existing) = self.reuse_stored(request)? {
                return Ok(existing);
            }
        }

        let _lock = self.store.lock_identity(&request.name, self.lock_timeout)?;

        if mode == IssueMode::Ensure {
            if let Some(existing) = self.reuse_stored(request)? {
                return Ok(existing);
            }
        }

        let loaded;
        let ca = match ca {
            Some(ca) => ca,
            None => {
                loaded = self.store.read_ca(&request.ca_cert, &request.ca_key)?;
                &loaded
            }
        };

        let issued = ca.sign_client_cert(request)?;
        self.store.write_identity(&request.name, &issued, owner)?;

        info!(
            owner,
            common_name = %request.common_name,
            organizations = ?request.organizations,
            reissue = mode == IssueMode::Reissue,
            "issued client certificate"
        );
        Ok(issued)
    }

    fn reuse_stored(&self, request: &CertificateRequest) -> Result<Option<IssuedCertificate>> {
        let existing = self.store.read_identity(&request.name)?;
        if let Some(existing) = &existing {
            warn_on_subject_drift(request, existing);
            debug!("reusing stored certificate");
        }
        Ok(existing)
    }
}

fn warn_on_subject_drift(request: &CertificateRequest, existing: &IssuedCertificate) {
    match existing.info() {
        Ok(info) if !request.matches_subject(&info) => warn!(
            stored_common_name = %info.common_name,
            stored_organizations = ?info.organizations,
            requested_common_name = %request.common_name,
            requested_organizations = ?request.organizations,
            "stored certificate subject differs from request; use reissue to replace it"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to inspect stored certificate"),
    }
}
