//! Signed, hash-verified self-replacement of the host executable.
//!
//! An update is accepted only when its descriptor carries an ed25519 signature
//! from a trusted key over `mailindex-host|host_version=..|platform=..|sha256=..|url=..`
//! and the downloaded bytes hash to the signed digest. The new binary is staged
//! next to the install path and renamed into place.

mod descriptor;
mod download;
mod install;
mod manager;
mod phase;
mod trust;
mod version;

use thiserror::Error;

pub use descriptor::{signed_message, UpdateDescriptor};
pub use download::{download_artifact, sha256_hex, verify_digest};
pub use install::{can_write_dir, install_binary, InstallReport};
pub use manager::{UpdateCheckReport, UpdateManager, UpdateOutcome};
pub use phase::{PhaseTracker, UpdatePhase};
pub use trust::{TrustedKeys, EMBEDDED_PUBLIC_KEYS, PUBLIC_KEYS_ENV};
pub use version::{compare_versions, needs_update};

pub type UpdateResult<T> = Result<T, UpdateError>;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid update request: {0}")]
    InvalidDescriptor(String),
    #[error("update signature verification not configured (no trusted public keys)")]
    NotConfigured,
    #[error("update signature verification failed: {0}")]
    Signature(String),
    #[error("update download failed: {0}")]
    Download(String),
    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("update install failed: {0}")]
    Io(String),
}
