//! Infrastructure components for Lattice
//!
//! This crate provides the PKI plumbing behind client credential issuance:
//!
//! - **PKI**: Certificate authority loading, leaf signing, certificate inspection
//! - **Store**: On-disk layout for CA material and issued identities
//! - **Manager**: Idempotent, lock-guarded issuance on top of the store
//!
//! # Architecture
//!
//! The CA is always passed in explicitly, either as file locators on a
//! [`pki::CertificateRequest`] or as a loaded [`pki::CertificateAuthority`].
//! Nothing in this crate holds global state.
//!
//! # Public API
//!
//! ## PKI
//! - [`pki::CertificateAuthority`]: CA handle used to sign client certificates
//! - [`pki::CertificateRequest`], [`pki::IssuedCertificate`]: Issuance input and output
//! - [`pki::PkiError`]: Error type for PKI operations
//!
//! ## Issuance
//! - [`cert_manager::CertificateManager`]: `ensure_certificate` / `reissue_certificate`
//! - [`cert_store::PkiStore`]: File layout under the certificate root

pub mod cert_manager;
pub mod cert_store;
pub mod pki;

pub use cert_manager::{CertificateManager, DEFAULT_LOCK_TIMEOUT};
pub use cert_store::{IdentityLock, PkiStore};
pub use pki::{
    verify_client_cert, CertificateAuthority, CertificateInfo, CertificateRequest,
    IssuedCertificate, PkiError,
};
