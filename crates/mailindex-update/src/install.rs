use std::path::{Path, PathBuf};

use mailindex_core::config::update::{BACKUP_SUFFIX, STAGED_SUFFIX};
use mailindex_core::{write_bytes_atomic, AtomicWriteOptions};
use tracing::{info, warn};

use crate::{UpdateError, UpdateResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub install_path: PathBuf,
    pub backup_path: Option<PathBuf>,
}

/// Replaces `target` with `bytes`.
///
/// The current file is copied to `<target>.bak`, then the new bytes are staged at
/// `<target>.new` (fsynced, mode 0755) and renamed over the target. A failure
/// leaves the target untouched and removes the staged file.
pub fn install_binary(target: &Path, bytes: &[u8]) -> UpdateResult<InstallReport> {
    let backup_path = if target.is_file() {
        let backup = suffixed(target, BACKUP_SUFFIX);
        std::fs::copy(target, &backup).map_err(|error| {
            UpdateError::Io(format!("failed backing up to {}: {error}", backup.display()))
        })?;
        info!(backup = %backup.display(), "backed up current binary");
        Some(backup)
    } else {
        warn!(path = %target.display(), "no existing binary to back up");
        None
    };

    write_bytes_atomic(target, bytes, &AtomicWriteOptions::executable(STAGED_SUFFIX))
        .map_err(|error| UpdateError::Io(format!("{error:#}")))?;
    info!(path = %target.display(), bytes = bytes.len(), "installed new binary");
    Ok(InstallReport {
        install_path: target.to_path_buf(),
        backup_path,
    })
}

/// Whether a file can be created in `dir`, checked with a throwaway file.
pub fn can_write_dir(dir: &Path) -> bool {
    let scratch = dir.join(format!(".mailindex-write-check-{}", std::process::id()));
    match std::fs::File::create(&scratch) {
        Ok(_) => {
            let _ = std::fs::remove_file(&scratch);
            true
        }
        Err(_) => false,
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
