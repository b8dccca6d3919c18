use std::path::{Path, PathBuf};
use std::time::Duration;

use mailindex_core::config::{update::DOWNLOAD_TIMEOUT_SECS, HOST_VERSION};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::descriptor::UpdateDescriptor;
use crate::download::{download_artifact, verify_digest};
use crate::install::{can_write_dir, install_binary};
use crate::phase::{PhaseTracker, UpdatePhase};
use crate::trust::TrustedKeys;
use crate::version::needs_update;
use crate::{UpdateError, UpdateResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckReport {
    pub current_version: String,
    pub target_version: String,
    pub needs_update: bool,
    pub can_update: bool,
}

/// Result of a completed `updateRequest`; the host exits after sending it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub success: bool,
    pub old_version: String,
    pub new_version: String,
    pub install_path: String,
    pub requires_restart: bool,
    pub message: String,
}

/// Verifies, downloads and installs updates for one install path.
#[derive(Debug, Clone)]
pub struct UpdateManager {
    install_path: PathBuf,
    trusted_keys: TrustedKeys,
    download_timeout: Duration,
    current_version: String,
}

impl UpdateManager {
    pub fn new(install_path: impl Into<PathBuf>, trusted_keys: TrustedKeys) -> Self {
        Self {
            install_path: install_path.into(),
            trusted_keys,
            download_timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            current_version: HOST_VERSION.to_string(),
        }
    }

    /// Uses the environment key override, falling back to the embedded keys.
    pub fn from_env(install_path: impl Into<PathBuf>) -> Self {
        Self::new(install_path, TrustedKeys::from_env())
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_current_version(mut self, version: &str) -> Self {
        self.current_version = version.to_string();
        self
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// Whether the install directory accepts new files.
    pub fn can_self_update(&self) -> bool {
        self.install_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or(false, can_write_dir)
    }

    /// `updateCheck({targetVersion})`.
    pub fn check(&self, params: &Value) -> UpdateResult<UpdateCheckReport> {
        let target_version = params
            .get("targetVersion")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|version| !version.is_empty())
            .ok_or_else(|| UpdateError::InvalidDescriptor("missing or empty 'targetVersion'".to_string()))?;
        Ok(UpdateCheckReport {
            current_version: self.current_version.clone(),
            target_version: target_version.to_string(),
            needs_update: needs_update(&self.current_version, target_version),
            can_update: self.can_self_update(),
        })
    }

    /// `updateRequest`: verify signature, download, check digest, install.
    ///
    /// Nothing touches the install path until both the signature and the digest
    /// have been verified.
    pub fn apply(&self, params: &Value) -> UpdateResult<UpdateOutcome> {
        let mut tracker = PhaseTracker::default();
        let result = self.run(&mut tracker, params);
        if let Err(error) = &result {
            warn!(phase = %tracker.phase(), %error, "update request failed");
            tracker.fail(&error.to_string());
        }
        result
    }

    fn run(&self, tracker: &mut PhaseTracker, params: &Value) -> UpdateResult<UpdateOutcome> {
        tracker.advance();
        let descriptor = UpdateDescriptor::from_params(params)?;
        info!(
            from = %self.current_version,
            to = %descriptor.target_version,
            url = %descriptor.update_url,
            "starting self-update"
        );
        self.trusted_keys.verify(&descriptor)?;

        tracker.advance();
        let bytes = download_artifact(&descriptor.update_url, self.download_timeout)?;
        verify_digest(&bytes, &descriptor.sha256)?;

        tracker.advance();
        debug_assert_eq!(tracker.phase(), UpdatePhase::VerifiedDownload);
        tracker.advance();
        let report = install_binary(&self.install_path, &bytes)?;

        tracker.advance();
        Ok(UpdateOutcome {
            success: true,
            old_version: self.current_version.clone(),
            new_version: descriptor.target_version.clone(),
            install_path: report.install_path.display().to_string(),
            requires_restart: true,
            message: format!(
                "Updated from {} to {}. Restarting...",
                self.current_version, descriptor.target_version
            ),
        })
    }
}
