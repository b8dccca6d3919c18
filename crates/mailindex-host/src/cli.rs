use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "mailindex-host",
    about = "Native messaging host that indexes and searches mail and memory",
    version
)]
pub struct Cli {
    #[arg(
        long = "log-dir",
        env = "MAILINDEX_LOG_DIR",
        help = "Directory for the rotating host log (default: $HOME/.mailindex/logs)"
    )]
    pub log_dir: Option<PathBuf>,

    #[arg(
        long = "install-path",
        env = "MAILINDEX_INSTALL_PATH",
        help = "Executable replaced by updateRequest (default: the running executable)"
    )]
    pub install_path: Option<PathBuf>,

    #[arg(
        long,
        env = "MAILINDEX_EMBEDDER",
        help = "Embedding backend: hash, provider or none"
    )]
    pub embedder: Option<String>,

    /// Launchers append the manifest path and extension id.
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub launcher_args: Vec<String>,
}

impl Cli {
    /// Resolves the update target, falling back to the running executable.
    pub fn resolve_install_path(&self) -> PathBuf {
        self.install_path
            .clone()
            .or_else(|| std::env::current_exe().ok())
            .unwrap_or_else(|| PathBuf::from(mailindex_core::config::PRODUCT))
    }
}
