use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mailindex_core::config::logging::{DEFAULT_FILTER, LOG_DIR_REL, LOG_FILE_NAME};
use mailindex_core::{LogRotationPolicy, RotatingLogFile};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// `$HOME/.mailindex/logs`, or a relative fallback when `HOME` is unset.
pub fn default_log_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Path::new(&home).join(LOG_DIR_REL),
        _ => PathBuf::from(LOG_DIR_REL),
    }
}

fn env_filter(default: &str) -> EnvFilter {
    let directives = ["MAILINDEX_LOG", "RUST_LOG"]
        .into_iter()
        .find_map(mailindex_core::config::env_string)
        .unwrap_or_else(|| default.to_string());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber. Stdout carries protocol frames, so logs go
/// to a rotating file, or to stderr at WARN when the file cannot be opened.
pub fn init_tracing(log_dir: Option<&Path>) {
    let path = log_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(default_log_dir)
        .join(LOG_FILE_NAME);

    match RotatingLogFile::open(&path, LogRotationPolicy::from_env()) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(DEFAULT_FILTER))
                .with_target(false)
                .with_ansi(false)
                .compact()
                .with_writer(Mutex::new(file))
                .try_init();
        }
        Err(error) => {
            let filter = EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .parse_lossy("");
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .with_writer(std::io::stderr)
                .try_init();
            tracing::warn!(path = %path.display(), error = %format!("{error:#}"), "log file unavailable");
        }
    }
}
