//! The filesystem operations, expressed over mount paths and callers.
//!
//! Every operation maps its path to a URL, consults the caches where it
//! can, runs at most a handful of exchanges through the [`Executor`] and
//! translates the outcome into [`GridResult`]. Nothing here knows about
//! inodes or kernel replies; that is the adapter's business.

use crate::cache::{BLOCK_SIZE, BlockCache, CachedAttrs, MetadataCache};
use crate::config::Config;
use crate::credentials::{Caller, CredentialResolver};
use crate::error::{GridError, GridResult, is_success};
use crate::index::parse_index;
use crate::paths;
use crate::pool::ConnectionPool;
use crate::request::{ByteRange, Exchange, Executor, RequestSpec, ResponseMeta, Sink};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// What `getattr` knows about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub kind: EntryKind,
    pub size: u64,
    /// Seconds since the epoch; 0 when the origin did not say.
    pub modified: i64,
}

impl Attributes {
    pub const fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            modified: 0,
        }
    }
}

/// One child in a directory listing, named as the mount shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub attrs: Attributes,
}

/// Statistics of the filesystem holding the block cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub fragment_size: u32,
}

pub struct GridCore {
    config: Config,
    executor: Executor,
    metadata: MetadataCache,
    blocks: BlockCache,
}

impl GridCore {
    pub fn new(config: Config) -> io::Result<Self> {
        let pool = ConnectionPool::new(&config)?;
        let credentials = CredentialResolver::new(&config);
        Ok(Self {
            executor: Executor::new(pool, credentials),
            metadata: MetadataCache::new(&config),
            blocks: BlockCache::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn url_for(path: &str) -> GridResult<String> {
        paths::to_url(path).ok_or_else(|| GridError::NotFound(path.to_string()))
    }

    fn dir_url_for(path: &str) -> GridResult<String> {
        paths::to_dir_url(path).ok_or_else(|| GridError::NotFound(path.to_string()))
    }

    /// Runs an exchange and turns any non-2xx status into an error.
    fn expect_success(&self, caller: &Caller, url: &str, exchange: Exchange<'_>) -> GridResult<ResponseMeta> {
        let meta = self.executor.perform(caller, RequestSpec { url, exchange })?;
        if is_success(meta.status) {
            Ok(meta)
        } else {
            debug!(status = meta.status, "{} failed", url);
            Err(GridError::from_status(meta.status, url))
        }
    }

    pub fn getattr(&self, caller: &Caller, path: &str) -> GridResult<Attributes> {
        if paths::is_synthetic_dir(path) {
            return Ok(Attributes::directory());
        }
        let url = Self::url_for(path)?;

        // A host root can only be a directory, so it is keyed like one.
        let (mut key, mut kind) = if paths::is_host_root(path) {
            (format!("{path}/"), EntryKind::Directory)
        } else {
            (path.to_string(), EntryKind::File)
        };

        if let Some(attrs) = self.cached(caller.uid, &key, kind) {
            return Ok(attrs);
        }
        if kind == EntryKind::File {
            // directories learned from a listing are only known with the slash
            if let Some(attrs) = self.cached(caller.uid, &format!("{path}/"), EntryKind::Directory) {
                return Ok(attrs);
            }
        }

        let mut meta = self.executor.perform(caller, RequestSpec { url: &url, exchange: Exchange::Head })?;
        if meta.status == 301 {
            let expected = format!("{url}/");
            if meta.location.as_deref() != Some(expected.as_str()) {
                let target = meta.location.as_deref().and_then(paths::from_url);
                debug!(location = ?meta.location, target = ?target, "redirect from {} is not a directory", url);
                return Err(GridError::Redirect {
                    url,
                    location: meta.location,
                });
            }

            meta = self.executor.perform(caller, RequestSpec { url: &expected, exchange: Exchange::Head })?;
            if !is_success(meta.status) && meta.status != 403 {
                return Err(GridError::Status {
                    status: meta.status,
                    url: expected,
                });
            }
            kind = EntryKind::Directory;
            key = format!("{path}/");
        } else if !is_success(meta.status) {
            debug!(status = meta.status, "HEAD {} failed", url);
            return Err(GridError::from_status(meta.status, &url));
        }

        let attrs = Attributes {
            kind,
            size: meta.length.unwrap_or(0),
            modified: meta.modified.unwrap_or(0),
        };
        self.remember(caller.uid, &key, attrs);
        Ok(attrs)
    }

    fn cached(&self, identity: u32, key: &str, kind: EntryKind) -> Option<Attributes> {
        let hit = self.metadata.lookup(identity, key)?;
        debug!(uid = identity, "metadata cache hit for {}", key);
        Some(Attributes {
            kind,
            size: hit.size,
            modified: hit.modified,
        })
    }

    fn remember(&self, identity: u32, key: &str, attrs: Attributes) {
        let record = CachedAttrs {
            size: attrs.size,
            modified: attrs.modified,
        };
        if let Err(e) = self.metadata.store(identity, key, record) {
            warn!("cannot cache metadata for {}: {}", key, e);
        }
    }

    fn forget(&self, identity: u32, path: &str) {
        let trimmed = path.trim_end_matches('/');
        self.metadata.remove(identity, trimmed);
        self.metadata.remove(identity, &format!("{trimmed}/"));
    }

    /// Lists a directory and refreshes the metadata of every child.
    ///
    /// `/` lists the two namespaces; the namespaces themselves list nothing,
    /// since hosts cannot be enumerated.
    pub fn readdir(&self, caller: &Caller, path: &str) -> GridResult<Vec<ListedEntry>> {
        if path == "/" {
            return Ok(["http", "https"]
                .into_iter()
                .map(|name| ListedEntry {
                    name: name.to_string(),
                    attrs: Attributes::directory(),
                })
                .collect());
        }
        if paths::is_synthetic_dir(path) {
            return Ok(Vec::new());
        }

        let url = Self::dir_url_for(path)?;
        let mut body = Vec::new();
        self.expect_success(
            caller,
            &url,
            Exchange::Get {
                range: None,
                sink: Sink::Buffer(&mut body),
            },
        )?;

        let entries = parse_index(&body, &url);
        debug!("{} lists {} entries", url, entries.len());

        let listed = entries
            .iter()
            .filter(|entry| !entry.is_mailto())
            .map(|entry| {
                let attrs = Attributes {
                    kind: if entry.is_dir() {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    },
                    size: entry.length.unwrap_or(0),
                    modified: entry.modified.unwrap_or(0),
                };
                self.remember(caller.uid, &paths::join(path, &entry.filename), attrs);
                ListedEntry {
                    name: entry.display_name().to_string(),
                    attrs,
                }
            })
            .collect();
        Ok(listed)
    }

    /// Reads up to `size` bytes at `offset`, block by block.
    ///
    /// Stops early at a short block (end of file). A failure on the first
    /// block is an error unless the origin says the range starts past the
    /// end; a failure further on just ends the read.
    pub fn read(&self, caller: &Caller, path: &str, offset: u64, size: u32) -> GridResult<Vec<u8>> {
        if paths::namespace(path).is_none() {
            return Err(GridError::NotFound(path.to_string()));
        }
        let size = u64::from(size);
        let mut out = Vec::with_capacity(size as usize);
        if size == 0 {
            return Ok(out);
        }

        let end = offset + size;
        let first_block = offset / BLOCK_SIZE * BLOCK_SIZE;
        let mut block_start = first_block;

        while block_start < end {
            let copied = match self.read_block(caller, path, block_start, offset, end, &mut out) {
                Ok(copied) => copied,
                // 416: the read starts at or past the end of the file
                Err(GridError::Status { status: 416, .. }) if block_start == first_block => break,
                Err(e) if block_start == first_block => return Err(e),
                Err(e) => {
                    warn!("read of {} stopped at {}: {}", path, block_start, e);
                    break;
                }
            };
            let wanted = end.min(block_start + BLOCK_SIZE) - offset.max(block_start);
            if copied < wanted {
                break;
            }
            block_start += BLOCK_SIZE;
        }
        Ok(out)
    }

    /// Copies the part of one block that overlaps `[offset, end)` into `out`.
    fn read_block(
        &self,
        caller: &Caller,
        path: &str,
        block_start: u64,
        offset: u64,
        end: u64,
        out: &mut Vec<u8>,
    ) -> GridResult<u64> {
        let Some(range) = ByteRange::new(block_start, BLOCK_SIZE) else {
            return Ok(0);
        };
        let file = match self.blocks.lookup(caller.uid, path, range) {
            Some(file) => {
                debug!(uid = caller.uid, "block cache hit for {} at {}", path, block_start);
                file
            }
            None => self.blocks.fetch(&self.executor, caller, path, range)?,
        };

        let from = offset.max(block_start) - block_start;
        let len = (end.min(block_start + BLOCK_SIZE) - block_start - from) as usize;
        let mut chunk = vec![0u8; len];
        let got = read_fully(&file, &mut chunk, from)?;
        out.extend_from_slice(&chunk[..got]);
        Ok(got as u64)
    }

    /// Sends `data` as a ranged PUT after dropping every cached block.
    pub fn write(&self, caller: &Caller, path: &str, offset: u64, data: &[u8]) -> GridResult<usize> {
        let url = Self::url_for(path)?;
        self.blocks.invalidate(caller.uid, path);
        self.expect_success(
            caller,
            &url,
            Exchange::Put {
                range: ByteRange::new(offset, data.len() as u64),
                body: data,
            },
        )?;
        self.forget(caller.uid, path);
        Ok(data.len())
    }

    /// Creates an empty file.
    pub fn mknod(&self, caller: &Caller, path: &str) -> GridResult<()> {
        self.write(caller, path, 0, &[]).map(|_| ())
    }

    /// Creates a directory: an empty PUT of the slash-terminated path.
    pub fn mkdir(&self, caller: &Caller, path: &str) -> GridResult<()> {
        let url = Self::dir_url_for(path)?;
        self.expect_success(caller, &url, Exchange::Put { range: None, body: &[] })?;
        self.forget(caller.uid, path);
        Ok(())
    }

    pub fn unlink(&self, caller: &Caller, path: &str) -> GridResult<()> {
        let url = Self::url_for(path)?;
        self.blocks.invalidate(caller.uid, path);
        self.expect_success(caller, &url, Exchange::Delete)?;
        self.forget(caller.uid, path);
        Ok(())
    }

    pub fn rmdir(&self, caller: &Caller, path: &str) -> GridResult<()> {
        let url = Self::dir_url_for(path)?;
        self.expect_success(caller, &url, Exchange::Delete)?;
        self.forget(caller.uid, path);
        Ok(())
    }

    /// MOVE within one namespace; crossing between http and https is EXDEV.
    pub fn rename(&self, caller: &Caller, from: &str, to: &str) -> GridResult<()> {
        let Some(namespace) = paths::namespace(from) else {
            return Err(GridError::NotFound(from.to_string()));
        };
        if paths::namespace(to) != Some(namespace) {
            debug!(?namespace, "refusing rename of {} to {}", from, to);
            return Err(GridError::CrossDevice);
        }

        let url = Self::url_for(from)?;
        let destination = Self::url_for(to)?;
        self.blocks.invalidate(caller.uid, from);
        self.blocks.invalidate(caller.uid, to);
        self.expect_success(
            caller,
            &url,
            Exchange::Move {
                destination: &destination,
            },
        )?;
        self.forget(caller.uid, from);
        self.forget(caller.uid, to);
        Ok(())
    }

    pub fn truncate(&self, caller: &Caller, path: &str, length: u64) -> GridResult<()> {
        let url = Self::url_for(path)?;
        self.blocks.invalidate(caller.uid, path);
        self.expect_success(caller, &url, Exchange::Truncate { length })?;
        self.forget(caller.uid, path);
        Ok(())
    }

    /// Reports the filesystem the block cache lives on.
    pub fn statfs(&self) -> GridResult<FsStats> {
        let stat = nix::sys::statvfs::statvfs(&self.config.blocks_dir).map_err(io::Error::from)?;
        Ok(FsStats {
            blocks: stat.blocks() as u64,
            blocks_free: stat.blocks_free() as u64,
            blocks_available: stat.blocks_available() as u64,
            files: stat.files() as u64,
            files_free: stat.files_free() as u64,
            block_size: stat.block_size() as u32,
            name_max: stat.name_max() as u32,
            fragment_size: stat.fragment_size() as u32,
        })
    }

    /// Records the daemon's pid. Failure is logged, never fatal.
    pub fn init(&self) {
        let pid_file = &self.config.pid_file;
        match std::fs::write(pid_file, format!("{}\n", std::process::id())) {
            Ok(()) => info!("wrote pid file {}", pid_file.display()),
            Err(e) => warn!("cannot write pid file {}: {}", pid_file.display(), e),
        }
    }

    pub fn destroy(&self) {
        if let Err(e) = std::fs::remove_file(&self.config.pid_file) {
            debug!("cannot remove pid file {}: {}", self.config.pid_file.display(), e);
        }
        info!("filesystem torn down");
    }
}

/// Like `read_exact_at`, but a short file is not an error.
fn read_fully(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn core() -> (TempDir, GridCore) {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            ca_dir: root.path().join("no-anchors"),
            proc_dir: root.path().join("no-proc"),
            ..Config::rooted_at(root.path())
        };
        config.prepare_dirs().unwrap();
        let core = GridCore::new(config).unwrap();
        (root, core)
    }

    const CALLER: Caller = Caller {
        uid: 1000,
        gid: 1000,
        pid: 1,
    };

    #[test]
    fn synthetic_directories_need_no_network() {
        let (_root, core) = core();
        for path in ["/", "/http", "/https"] {
            assert_eq!(core.getattr(&CALLER, path).unwrap(), Attributes::directory());
        }
        let names: Vec<_> = core.readdir(&CALLER, "/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["http", "https"]);
        assert!(core.readdir(&CALLER, "/https").unwrap().is_empty());
    }

    #[test]
    fn paths_outside_the_namespaces_are_not_found() {
        let (_root, core) = core();
        assert_eq!(core.getattr(&CALLER, "/ftp/host/x").unwrap_err().errno(), libc::ENOENT);
        assert_eq!(core.read(&CALLER, "/elsewhere", 0, 10).unwrap_err().errno(), libc::ENOENT);
        assert_eq!(core.unlink(&CALLER, "/nope/x").unwrap_err().errno(), libc::ENOENT);
    }

    #[test]
    fn rename_across_namespaces_is_exdev() {
        let (_root, core) = core();
        let err = core.rename(&CALLER, "/http/host/a", "/https/host/a").unwrap_err();
        assert_eq!(err.errno(), libc::EXDEV);
        let err = core.rename(&CALLER, "/https/host/a", "/tmp/a").unwrap_err();
        assert_eq!(err.errno(), libc::EXDEV);
    }

    #[test]
    fn cached_metadata_answers_getattr() {
        let (_root, core) = core();
        core.metadata
            .store(1000, "/http/host/f", CachedAttrs { size: 42, modified: 7 })
            .unwrap();
        core.metadata
            .store(1000, "/http/host/d/", CachedAttrs { size: 0, modified: 9 })
            .unwrap();

        let file = core.getattr(&CALLER, "/http/host/f").unwrap();
        assert_eq!((file.kind, file.size, file.modified), (EntryKind::File, 42, 7));
        let dir = core.getattr(&CALLER, "/http/host/d").unwrap();
        assert_eq!((dir.kind, dir.modified), (EntryKind::Directory, 9));
    }

    #[test]
    fn cached_blocks_serve_reads() {
        let (root, core) = core();
        let dir = root.path().join("blocks/1000/http/host/f");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("0-4095"), vec![b'a'; 4096]).unwrap();
        std::fs::write(dir.join("4096-8191"), b"bbbb").unwrap();

        let data = core.read(&CALLER, "/http/host/f", 4094, 100).unwrap();
        assert_eq!(data, b"aabbbb");
    }

    #[test]
    fn zero_length_read_is_empty() {
        let (_root, core) = core();
        assert!(core.read(&CALLER, "/http/host/f", 0, 0).unwrap().is_empty());
    }

    #[test]
    fn init_and_destroy_manage_the_pid_file() {
        let (root, core) = core();
        core.init();
        let pid = std::fs::read_to_string(root.path().join("gridfs.pid")).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        core.destroy();
        assert!(!root.path().join("gridfs.pid").exists());
    }

    #[test]
    fn statfs_reports_the_cache_filesystem() {
        let (_root, core) = core();
        let stats = core.statfs().unwrap();
        assert!(stats.block_size > 0);
        assert!(stats.blocks >= stats.blocks_free);
    }
}
