//! The reference origin server.
//!
//! Serves a data directory over plain HTTP in the listing/range/MOVE dialect
//! the `gridfs` client expects.

use clap::Parser;
use gridfs_origin::{OriginState, serve};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Reference HTTP origin for gridfs")]
struct Args {
    /// Directory whose contents are served.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// URL path prefix to answer with 403; may be repeated.
    #[arg(long = "forbid")]
    forbidden: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize the logging and tracing subscriber.
    // Uses `RUST_LOG` env var or defaults to "gridfs_origin=debug,tower_http=debug".
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridfs_origin=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = fs::create_dir_all(&args.data_dir) {
        tracing::warn!("could not create data directory {}: {}", args.data_dir.display(), e);
    }

    let state = OriginState {
        root: args.data_dir,
        forbidden: args.forbidden,
    };

    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("cannot bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };
    tracing::info!("serving {} on {}", state.root.display(), args.listen);
    if let Err(e) = serve(listener, state).await {
        tracing::error!("server stopped: {}", e);
        std::process::exit(1);
    }
}
