//! Receives a directory tree from a sender over stdin/stdout.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use diffcopy::{receive, ReceiveOpt};

#[derive(Parser)]
#[command(name = "diffcopy-receive", about = "Receive a directory tree over stdio")]
struct Args {
    /// Destination directory; created if missing.
    dest: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    receive(
        tokio::io::stdin(),
        tokio::io::stdout(),
        args.dest,
        ReceiveOpt::default(),
        CancellationToken::new(),
    )
    .await?;
    Ok(())
}
