//! PDF Signing Server - Entry point
//!
//! Usage: `pdf-sign-server [RESOURCE_DIR]...`

use pdf_sign_server::run_server_with_dirs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout carries the MCP stream
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_sign_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let resource_dirs: Vec<String> = std::env::args().skip(1).collect();
    tracing::info!(?resource_dirs, "Starting PDF signing server");

    run_server_with_dirs(resource_dirs).await
}
