//! The two disk cache tiers.
//!
//! Both trees are partitioned by uid, then by the [`encode`](crate::encode)d
//! mount path. Records are written to a scratch file and renamed into place,
//! so readers see either the old record, the new one, or nothing. Records
//! older than [`EXPIRY`] are treated as absent.

pub mod blocks;
pub mod metadata;

use std::fs::{self, DirBuilder, Metadata};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::time::{Duration, SystemTime};

pub use blocks::{BLOCK_SIZE, BlockCache};
pub use metadata::{CachedAttrs, DIR_SENTINEL, MetadataCache};

pub const EXPIRY: Duration = Duration::from_secs(60);

/// A record is fresh until its own mtime is more than [`EXPIRY`] old.
pub(crate) fn is_fresh(meta: &Metadata) -> bool {
    match meta.modified().map(|mtime| SystemTime::now().duration_since(mtime)) {
        Ok(Ok(age)) => age <= EXPIRY,
        Ok(Err(_)) => true, // mtime in the future
        Err(_) => false,
    }
}

fn private_dirs() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.mode(0o700);
    builder
}

/// Makes `dir` a directory, replacing a plain file that is in the way.
pub(crate) fn ensure_dir(dir: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            fs::remove_file(dir)?;
            private_dirs().create(dir)
        }
        Err(_) => private_dirs().create(dir),
    }
}

pub(crate) fn ensure_dir_all(dir: &Path) -> io::Result<()> {
    let mut builder = private_dirs();
    builder.recursive(true);
    builder.create(dir)
}
