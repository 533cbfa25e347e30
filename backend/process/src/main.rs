use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bulk import trails into the Trails API")]
struct Args {
    /// JSON array of trails to import
    manifest: PathBuf,

    /// Validate the manifest without uploading anything
    #[arg(long)]
    dry_run: bool,

    /// Directory holding one file per secret
    #[arg(long, env = "SECRETS_DIR", default_value = "/run/secrets")]
    secrets_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    process::import_trails(&args.manifest, &args.secrets_dir, args.dry_run).await?;

    Ok(())
}
