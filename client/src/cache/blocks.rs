//! Fixed-size byte ranges of remote files, one local file per block.
//!
//! Block `n` of a file covers bytes `[n * BLOCK_SIZE, (n + 1) * BLOCK_SIZE)`
//! and is stored at `<blocks>/<uid><encoded path>/<start>-<end>` with an
//! inclusive end. The last block of a file may be shorter than requested.

use super::{ensure_dir_all, is_fresh};
use crate::config::Config;
use crate::credentials::Caller;
use crate::encode::encode;
use crate::error::{GridError, GridResult, is_success};
use crate::paths;
use crate::request::{ByteRange, Exchange, Executor, RequestSpec, Sink};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Clone)]
pub struct BlockCache {
    root: PathBuf,
    tmp: PathBuf,
}

impl BlockCache {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.blocks_dir.clone(),
            tmp: config.tmp_dir.clone(),
        }
    }

    fn file_dir(&self, identity: u32, path: &str) -> PathBuf {
        self.root.join(format!("{identity}{}", encode(path)))
    }

    fn block_path(&self, identity: u32, path: &str, range: ByteRange) -> PathBuf {
        self.file_dir(identity, path)
            .join(format!("{}-{}", range.start, range.finish))
    }

    /// An open handle on a fresh cached block.
    pub fn lookup(&self, identity: u32, path: &str, range: ByteRange) -> Option<File> {
        let block = self.block_path(identity, path, range);
        let meta = fs::metadata(&block).ok()?;
        if !meta.is_file() || !is_fresh(&meta) {
            return None;
        }
        File::open(&block).ok()
    }

    /// Downloads one block and publishes it, returning a handle on it.
    ///
    /// The body lands in a scratch file first, so a failed download never
    /// leaves a partial block in the cache.
    pub fn fetch(&self, executor: &Executor, caller: &Caller, path: &str, range: ByteRange) -> GridResult<File> {
        let url = paths::to_url(path).ok_or_else(|| GridError::NotFound(path.to_string()))?;

        let mut scratch = tempfile::Builder::new().prefix("block-").tempfile_in(&self.tmp)?;
        let meta = executor.perform(
            caller,
            RequestSpec {
                url: &url,
                exchange: Exchange::Get {
                    range: Some(range),
                    sink: Sink::File(scratch.as_file_mut()),
                },
            },
        )?;
        if !is_success(meta.status) {
            return Err(GridError::from_status(meta.status, &url));
        }

        ensure_dir_all(&self.file_dir(caller.uid, path))?;
        let block = self.block_path(caller.uid, path, range);
        let file = scratch.persist(&block).map_err(|e| e.error)?;
        debug!(uid = caller.uid, "cached {}-{} of {}", range.start, range.finish, path);
        Ok(file)
    }

    /// Drops every cached block of `path` for `identity`.
    pub fn invalidate(&self, identity: u32, path: &str) {
        let dir = self.file_dir(identity, path);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("cannot list cached blocks in {}: {}", dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let block = entry.path();
            if block.is_file() {
                if let Err(e) = fs::remove_file(&block) {
                    warn!("cannot drop cached block {}: {}", block.display(), e);
                }
            }
        }
        // fails while a subdirectory for child paths remains, which is fine
        let _ = fs::remove_dir(&dir);
        debug!(uid = identity, "invalidated cached blocks of {}", path);
    }
}
