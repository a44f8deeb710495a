//! Streams a directory tree to a receiver over stdin/stdout.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use diffcopy::{send, WalkOpt};

#[derive(Parser)]
#[command(name = "diffcopy-send", about = "Send a directory tree over stdio")]
struct Args {
    /// Source directory to stream.
    root: PathBuf,
    /// Include patterns; everything when empty.
    #[arg(long = "include")]
    include: Vec<String>,
    /// Exclude patterns, gitignore style (`!` re-includes).
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    /// Symlinks whose targets are pulled into the include set.
    #[arg(long = "follow")]
    follow: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let opt = WalkOpt {
        include_patterns: args.include,
        exclude_patterns: args.exclude,
        follow_paths: args.follow,
        map: None,
    };

    send(
        tokio::io::stdin(),
        tokio::io::stdout(),
        args.root,
        opt,
        CancellationToken::new(),
    )
    .await?;
    Ok(())
}
