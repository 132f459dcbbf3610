//! litedit-worker: serves one SQLite engine over stdin/stdout.
//!
//! Spawned by `NativeDatabase`. Frames in, frames out; logs go to stderr
//! (filter with `RUST_LOG`) so stdout carries nothing but frames.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    info!(pid = std::process::id(), "litedit-worker starting");
    match litedit::native::serve_engine(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => {
            info!("litedit-worker exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "litedit-worker failed");
            ExitCode::FAILURE
        }
    }
}
