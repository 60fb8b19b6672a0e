//! gqlupd: GraphQL multipart upload daemon.
//!
//! # Usage
//!
//! ```text
//! gqlupd serve --config /etc/gqlupd.toml --bind 0.0.0.0:4000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use gqlupd::{build_router, ServerConfig};

#[derive(Parser)]
#[command(name = "gqlupd", about = "GraphQL multipart upload daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept multipart uploads over HTTP.
    Serve {
        /// Path to a gqlupd.toml file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on. Overrides `[server] bind`.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gqlupd=debug,gqlup_multipart=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, bind } => serve(config, bind).await,
    }
}

async fn serve(config_path: Option<PathBuf>, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(config_path.as_deref())?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    info!(
        max_field_size = config.uploads.max_field_size,
        max_file_size = ?config.uploads.max_file_size,
        max_files = ?config.uploads.max_files,
        "upload limits"
    );

    let router = build_router(config.uploads);
    let addr = config.server.bind;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gqlupd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("gqlupd stopped");
    Ok(())
}
