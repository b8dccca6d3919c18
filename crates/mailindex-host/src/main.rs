use anyhow::Result;
use clap::Parser;
use mailindex_host::{init_tracing, serve, Cli, HostOptions};
use mailindex_store::EmbedderKind;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_dir.as_deref());

    let install_path = cli.resolve_install_path();
    let mut options = HostOptions::new(&install_path);
    if let Some(raw) = cli.embedder.as_deref() {
        match EmbedderKind::parse(raw) {
            Some(kind) => options.embedder.kind = kind,
            None => tracing::warn!(value = %raw, "unknown --embedder, keeping default"),
        }
    }
    tracing::info!(
        version = mailindex_core::config::HOST_VERSION,
        install_path = %install_path.display(),
        embedder = ?options.embedder.kind,
        "host starting"
    );

    let stdin = std::io::stdin();
    let result = serve(stdin.lock(), std::io::stdout(), options);
    if let Err(error) = &result {
        tracing::error!(error = %format!("{error:#}"), "host stopped");
    }
    result
}
