//! Remote HTTP(S) resources as a filesystem.
//!
//! Paths under `/http/<host>/...` and `/https/<host>/...` map onto URLs.
//! [`grid::GridCore`] implements the operations over a bounded pool of
//! client connections and two disk caches; [`fs::GridFs`] adapts it to the
//! kernel through `fuser`.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod encode;
pub mod error;
pub mod fs;
pub mod grid;
pub mod index;
pub mod paths;
pub mod pool;
pub mod request;

pub use config::{Config, load_config};
pub use credentials::Caller;
pub use error::{GridError, GridResult};
pub use grid::{Attributes, EntryKind, GridCore, ListedEntry};
