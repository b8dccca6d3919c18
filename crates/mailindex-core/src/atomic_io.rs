use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Controls how [`write_bytes_atomic`] stages and finalizes the destination file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicWriteOptions {
    /// Fixed staging suffix appended to the destination name (e.g. `.new`).
    /// When unset a hidden per-process temp name is used.
    pub staged_suffix: Option<String>,
    /// Unix permission bits applied to the staged file before the rename.
    pub unix_mode: Option<u32>,
    /// Fsync the staged file before renaming it into place.
    pub sync: bool,
}

impl AtomicWriteOptions {
    pub fn executable(staged_suffix: &str) -> Self {
        Self {
            staged_suffix: Some(staged_suffix.to_string()),
            unix_mode: Some(0o755),
            sync: true,
        }
    }

    /// Path the bytes are staged at before the final rename.
    pub fn staged_path(&self, path: &Path) -> PathBuf {
        let parent_dir = parent_or_current(path);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("mailindex");
        match &self.staged_suffix {
            Some(suffix) => parent_dir.join(format!("{file_name}{suffix}")),
            None => parent_dir.join(format!(
                ".{file_name}.tmp-{}-{}",
                std::process::id(),
                current_unix_timestamp_ms()
            )),
        }
    }
}

/// Writes bytes using a staged file + rename so readers never observe partial data.
///
/// The staged file lives in the destination directory, so the final rename never
/// crosses a filesystem boundary. On failure the staged file is removed and the
/// destination is left as it was.
pub fn write_bytes_atomic(path: &Path, content: &[u8], options: &AtomicWriteOptions) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = parent_or_current(path);
    std::fs::create_dir_all(&parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let staged_path = options.staged_path(path);
    let result = stage_and_rename(path, &staged_path, content, options);
    if result.is_err() && staged_path.exists() {
        let _ = std::fs::remove_file(&staged_path);
    }
    result
}

fn stage_and_rename(
    path: &Path,
    staged_path: &Path,
    content: &[u8],
    options: &AtomicWriteOptions,
) -> Result<()> {
    let mut file = std::fs::File::create(staged_path)
        .with_context(|| format!("failed to create staged file {}", staged_path.display()))?;
    file.write_all(content)
        .with_context(|| format!("failed to write staged file {}", staged_path.display()))?;
    if options.sync {
        file.sync_all()
            .with_context(|| format!("failed to sync staged file {}", staged_path.display()))?;
    }
    drop(file);

    if let Some(mode) = options.unix_mode {
        apply_unix_mode(staged_path, mode)?;
    }

    std::fs::rename(staged_path, path).with_context(|| {
        format!(
            "failed to rename staged file {} to {}",
            staged_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn parent_or_current(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

#[cfg(unix)]
fn apply_unix_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn apply_unix_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_staged_path_uses_fixed_suffix_in_same_directory() {
        let options = AtomicWriteOptions::executable(".new");
        let staged = options.staged_path(Path::new("/opt/mailindex/mailindex-host"));
        assert_eq!(staged, PathBuf::from("/opt/mailindex/mailindex-host.new"));
    }

    #[test]
    fn functional_write_bytes_atomic_replaces_existing_file_and_removes_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("mailindex-host");
        std::fs::write(&path, b"old").expect("seed");

        let options = AtomicWriteOptions::executable(".new");
        write_bytes_atomic(&path, b"new binary", &options).expect("write");

        assert_eq!(std::fs::read(&path).expect("read"), b"new binary");
        assert!(!options.staged_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn functional_write_bytes_atomic_applies_unix_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tool");
        write_bytes_atomic(&path, b"#!/bin/sh\n", &AtomicWriteOptions::executable(".new"))
            .expect("write");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn regression_write_bytes_atomic_rejects_directory_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = write_bytes_atomic(temp.path(), b"x", &AtomicWriteOptions::default())
            .expect_err("directory destination must fail");
        assert!(error.to_string().contains("is a directory"));
    }
}
