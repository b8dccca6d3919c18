use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::env_parse;

const DEFAULT_LOG_ROTATION_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_ROTATION_MAX_FILES: usize = 5;

/// Configuration for size-based log rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_LOG_ROTATION_MAX_BYTES,
            max_files: DEFAULT_LOG_ROTATION_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Build policy from env vars with safe defaults.
    pub fn from_env() -> Self {
        let max_bytes = env_parse::<u64>("MAILINDEX_LOG_ROTATION_MAX_BYTES")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_LOG_ROTATION_MAX_BYTES);
        let max_files = env_parse::<usize>("MAILINDEX_LOG_ROTATION_MAX_FILES")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_LOG_ROTATION_MAX_FILES);
        Self {
            max_bytes,
            max_files,
        }
    }

    /// Returns true when size-based rotation is enabled.
    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

/// Append-only log file that rotates to `<path>.1 .. <path>.N-1` once a write
/// would push it past `max_bytes`.
///
/// Wrapped in a `Mutex` it serves as a `tracing_subscriber` writer.
#[derive(Debug)]
pub struct RotatingLogFile {
    path: PathBuf,
    policy: LogRotationPolicy,
    file: File,
    written: u64,
}

impl RotatingLogFile {
    pub fn open(path: &Path, policy: LogRotationPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = open_append(path)?;
        let written = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            policy,
            file,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate_if_needed(&mut self, incoming: usize) -> Result<()> {
        if !self.policy.is_enabled() || self.written == 0 {
            return Ok(());
        }
        let incoming = u64::try_from(incoming).unwrap_or(u64::MAX);
        if self.written.saturating_add(incoming) <= self.policy.max_bytes {
            return Ok(());
        }
        self.file
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        rotate_log_file(&self.path, self.policy)?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingLogFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.rotate_if_needed(buf.len())
            .map_err(|error| std::io::Error::other(format!("{error:#}")))?;
        let written = self.file.write(buf)?;
        self.written = self
            .written
            .saturating_add(u64::try_from(written).unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn rotated_backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), index))
}

/// Drops the oldest backup, shifts the rest up by one and moves the live file
/// to `<path>.1`. With `max_files == 1` the live file is simply discarded.
fn rotate_log_file(path: &Path, policy: LogRotationPolicy) -> Result<()> {
    if !path.exists() || !policy.is_enabled() {
        return Ok(());
    }
    let keep = policy.max_files.saturating_sub(1);
    if keep == 0 {
        return std::fs::remove_file(path)
            .with_context(|| format!("failed to discard {}", path.display()));
    }

    let oldest = rotated_backup_path(path, keep);
    if oldest.exists() {
        std::fs::remove_file(&oldest)
            .with_context(|| format!("failed to drop {}", oldest.display()))?;
    }
    for index in (1..keep).rev() {
        let backup = rotated_backup_path(path, index);
        if backup.exists() {
            rename(&backup, &rotated_backup_path(path, index + 1))?;
        }
    }
    rename(path, &rotated_backup_path(path, 1))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to)
        .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))
}
