//! Failure taxonomy of the core and its mapping onto POSIX error codes.
//!
//! The filesystem contract has no "network unreachable" or "server error"
//! case, so the mapping is coarse: only a 403 (EACCES), a
//! cross-namespace rename (EXDEV) and a local cache write failure (EIO) are
//! distinguished; every other failure is reported as ENOENT.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// An exchange that could not complete at the connection level.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP exchange failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cannot load client credential {path}: {reason}")]
    Credential { path: PathBuf, reason: String },

    #[error("cannot store response body: {0}")]
    Sink(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum GridError {
    /// Path outside the `/http` and `/https` namespaces, or nothing there.
    #[error("no such resource: {0}")]
    NotFound(String),

    /// The origin answered 403.
    #[error("origin refused access to {0}")]
    Forbidden(String),

    /// Any other non-success status.
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A redirect that is not the "add a trailing slash" directory shape.
    #[error("unexpected redirect from {url} to {location:?}")]
    Redirect { url: String, location: Option<String> },

    #[error("cannot rename between http and https namespaces")]
    CrossDevice,

    #[error("local cache I/O failed: {0}")]
    CacheIo(#[from] io::Error),
}

pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    /// Coarse status mapping: 403 is the only status with its own errno.
    pub fn from_status(status: u16, url: &str) -> Self {
        if status == 403 {
            GridError::Forbidden(url.to_string())
        } else {
            GridError::Status {
                status,
                url: url.to_string(),
            }
        }
    }

    pub fn errno(&self) -> i32 {
        match self {
            GridError::Forbidden(_) => libc::EACCES,
            GridError::CrossDevice => libc::EXDEV,
            GridError::CacheIo(_) => libc::EIO,
            GridError::NotFound(_)
            | GridError::Status { .. }
            | GridError::Transport(_)
            | GridError::Redirect { .. } => libc::ENOENT,
        }
    }
}

/// Success window shared by every exchange.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
