//! Size and modification time of remote resources, one small file per path.
//!
//! A record lives at `<headers>/<uid><encoded path>` and holds one line,
//! `content-length=N last-modified=M `. Directory paths end with `/`, so
//! their record is the [`DIR_SENTINEL`] file inside the directory's own
//! subtree. `:` is always escaped by the encoder, so no real name collides
//! with the sentinel.

use super::{ensure_dir, is_fresh};
use crate::config::Config;
use crate::encode::encode;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

pub const DIR_SENTINEL: &str = "::DIR::";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedAttrs {
    pub size: u64,
    /// Seconds since the epoch.
    pub modified: i64,
}

impl CachedAttrs {
    fn parse(record: &str) -> Option<Self> {
        let mut size = None;
        let mut modified = None;
        for field in record.split_whitespace() {
            if let Some(value) = field.strip_prefix("content-length=") {
                size = value.parse().ok();
            } else if let Some(value) = field.strip_prefix("last-modified=") {
                modified = value.parse().ok();
            }
        }
        Some(Self {
            size: size?,
            modified: modified?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MetadataCache {
    root: PathBuf,
    tmp: PathBuf,
}

impl MetadataCache {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.headers_dir.clone(),
            tmp: config.tmp_dir.clone(),
        }
    }

    fn record_path(&self, identity: u32, path: &str) -> PathBuf {
        let mut name = format!("{identity}{}", encode(path));
        if name.ends_with('/') {
            name.push_str(DIR_SENTINEL);
        }
        self.root.join(name)
    }

    /// A fresh record for `path`, if any. Stale records are deleted on sight.
    pub fn lookup(&self, identity: u32, path: &str) -> Option<CachedAttrs> {
        let record = self.record_path(identity, path);
        let meta = fs::metadata(&record).ok()?;
        if !meta.is_file() {
            return None;
        }
        if !is_fresh(&meta) {
            debug!(uid = identity, "stale metadata for {}", path);
            let _ = fs::remove_file(&record);
            return None;
        }

        let text = fs::read_to_string(&record).ok()?;
        let attrs = CachedAttrs::parse(&text);
        if attrs.is_none() {
            warn!("unreadable metadata record {}", record.display());
        }
        attrs
    }

    /// Publishes a record atomically: written to scratch, renamed into place.
    ///
    /// Missing parents are created and plain files standing where a parent
    /// directory must go are replaced. A directory standing where the record
    /// must go is only removed if it is empty.
    pub fn store(&self, identity: u32, path: &str, attrs: CachedAttrs) -> io::Result<()> {
        let mut scratch = tempfile::Builder::new().prefix("headers-").tempfile_in(&self.tmp)?;
        writeln!(scratch, "content-length={} last-modified={} ", attrs.size, attrs.modified)?;

        let encoded = encode(path);
        let prefix = format!("{identity}");
        for (slash, _) in encoded.match_indices('/') {
            let dir = self.root.join(format!("{prefix}{}", &encoded[..slash]));
            if let Err(e) = ensure_dir(&dir) {
                debug!("cannot prepare {}: {}", dir.display(), e);
            }
        }

        let record = self.record_path(identity, path);
        if record.is_dir() {
            let _ = fs::remove_dir(&record);
        }

        scratch.persist(&record).map_err(|e| e.error)?;
        Ok(())
    }

    /// Drops the record for `path`; a missing record is not an error.
    pub fn remove(&self, identity: u32, path: &str) {
        let record = self.record_path(identity, path);
        match fs::remove_file(&record) {
            Ok(()) => debug!(uid = identity, "dropped metadata for {}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot drop metadata record {}: {}", record.display(), e),
        }
    }
}
