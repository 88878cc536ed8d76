//! ossync command line entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ossync", version, about = "Resumable multipart transfers to an object store")]
struct Cli {
    /// Configuration file (default: ~/.config/ossync/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Object store root directory.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Part size in bytes.
    #[arg(long, global = true)]
    part_size: Option<u64>,

    /// Concurrent part transfers.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload FILE, resuming an unfinished upload when --upload-id is given.
    Upload {
        file: PathBuf,
        /// Key prefix; the object key is PREFIX/<file name>.
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long)]
        upload_id: Option<String>,
    },
    /// Download KEY into DEST, continuing a partial DEST.
    Download { key: String, dest: PathBuf },
    /// List unfinished multipart uploads.
    Uploads,
    /// Abort an unfinished multipart upload.
    Abort { key: String, upload_id: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::load(cli.config.as_deref())?.with_overrides(
        cli.store,
        cli.part_size,
        cli.concurrency,
    );
    tracing::debug!(
        store = %config.store_root.display(),
        part_size = config.part_size,
        concurrency = config.concurrency,
        "configuration resolved"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli.command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_with_globals() {
        let cli = Cli::try_parse_from([
            "ossync",
            "--part-size",
            "1024",
            "upload",
            "data.bin",
            "--prefix",
            "backups",
            "--concurrency",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.part_size, Some(1024));
        assert_eq!(cli.concurrency, Some(3));
        assert!(matches!(
            cli.command,
            Command::Upload { ref prefix, upload_id: None, .. } if prefix == "backups"
        ));
    }

    #[test]
    fn parses_download_and_abort() {
        let cli = Cli::try_parse_from(["ossync", "download", "a/b.bin", "out.bin"]).unwrap();
        assert!(matches!(cli.command, Command::Download { ref key, .. } if key == "a/b.bin"));

        let cli = Cli::try_parse_from(["ossync", "abort", "k", "id-1"]).unwrap();
        assert!(matches!(cli.command, Command::Abort { ref upload_id, .. } if upload_id == "id-1"));
    }

    #[test]
    fn command_required() {
        assert!(Cli::try_parse_from(["ossync"]).is_err());
    }
}
