//! The `gridfs` mount daemon.
//!
//! Loads the configuration, clears a stale mount left by a crash, detaches
//! unless asked not to, then serves the mount until it is unmounted.

use clap::Parser;
use daemonize::Daemonize;
use fuser::MountOption;
use gridfs::fs::GridFs;
use gridfs::{Config, GridCore, load_config};
use nix::mount::{MntFlags, umount2};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Mount HTTP and HTTPS servers as a filesystem")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "/etc/gridfs.toml")]
    config: PathBuf,

    /// Log every decision of the core.
    #[arg(long)]
    debug: bool,

    /// Stay attached to the terminal.
    #[arg(long)]
    foreground: bool,

    #[arg(default_value = "/grid")]
    mountpoint: PathBuf,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("gridfs=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "gridfs=info".into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// A mount whose daemon died leaves a dead endpoint behind that blocks a new mount.
fn clear_stale_mount(mountpoint: &Path) {
    match umount2(mountpoint, MntFlags::MNT_DETACH) {
        Ok(()) => warn!("detached stale mount at {}", mountpoint.display()),
        Err(e) => tracing::debug!("nothing to unmount at {}: {}", mountpoint.display(), e),
    }
}

fn detach(log_file: Option<&Path>) -> Result<(), String> {
    let mut daemon = Daemonize::new().working_directory("/");
    if let Some(path) = log_file {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
        daemon = daemon.stderr(log);
    }
    daemon.start().map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match load_config(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("gridfs: {e}");
            return ExitCode::FAILURE;
        }
    };

    // tracing is set up after detaching so its writer is the redirected stderr
    if !cli.foreground {
        let log_file = loaded.as_ref().and_then(|config| config.log_file.as_deref());
        if let Err(e) = detach(log_file) {
            eprintln!("gridfs: cannot daemonize: {e}");
            return ExitCode::FAILURE;
        }
    }
    init_tracing(cli.debug);

    let config = loaded.unwrap_or_else(|| {
        warn!("{} not found, using default configuration", cli.config.display());
        Config::default()
    });

    clear_stale_mount(&cli.mountpoint);

    if let Err(e) = config.prepare_dirs() {
        error!("cannot prepare cache directories: {}", e);
        return ExitCode::FAILURE;
    }

    let core = match GridCore::new(config.clone()) {
        Ok(core) => Arc::new(core),
        Err(e) => {
            error!("cannot start the connection pool: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut options = vec![
        MountOption::FSName("gridfs".to_string()),
        MountOption::AutoUnmount,
        MountOption::RW,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }

    info!("mounting at {}", cli.mountpoint.display());
    match fuser::mount2(GridFs::new(core), &cli.mountpoint, &options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("failed to mount at {}: {}", cli.mountpoint.display(), e);
            ExitCode::FAILURE
        }
    }
}
