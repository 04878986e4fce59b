//! The kernel-facing side of the mount.
//!
//! `fuser` calls into [`GridFs`] on its session thread. Each request is
//! resolved to a mount path there, then handed to its own worker thread so
//! slow exchanges never hold up unrelated operations; the core therefore
//! sees many concurrent callers, bounded only by the connection pool.

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::error;

use crate::cache::BLOCK_SIZE;
use crate::credentials::Caller;
use crate::grid::{Attributes, EntryKind, GridCore};

mod attr_ops;
mod inodes;
mod prelude;
mod read_ops;
mod write_ops;

pub use inodes::InodeTable;

pub struct GridFs {
    pub(crate) core: Arc<GridCore>,
    pub(crate) inodes: Arc<Mutex<InodeTable>>,
    pub(crate) ttl: Duration,
}

impl GridFs {
    pub fn new(core: Arc<GridCore>) -> Self {
        let ttl = Duration::from_secs(core.config().kernel_attr_timeout_seconds);
        Self {
            core,
            inodes: Arc::new(Mutex::new(InodeTable::new())),
            ttl,
        }
    }

    pub(crate) fn inodes(&self) -> MutexGuard<'_, InodeTable> {
        lock_table(&self.inodes)
    }
}

pub(crate) fn lock_table(table: &Mutex<InodeTable>) -> MutexGuard<'_, InodeTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn caller(req: &Request<'_>) -> Caller {
    Caller {
        uid: req.uid(),
        gid: req.gid(),
        pid: req.pid(),
    }
}

/// Kernel attributes for a path, owned by whoever asked.
pub(crate) fn file_attr(ino: u64, attrs: &Attributes, caller: &Caller) -> FileAttr {
    let mtime = UNIX_EPOCH + Duration::from_secs(attrs.modified.max(0) as u64);
    let (kind, perm, nlink) = match attrs.kind {
        EntryKind::Directory => (FileType::Directory, 0o755, 2),
        EntryKind::File => (FileType::RegularFile, 0o644, 1),
    };
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime: SystemTime::now(),
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        perm,
        nlink,
        uid: caller.uid,
        gid: caller.gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE as u32,
    }
}

pub(crate) fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
    }
}

/// Runs one request on a fresh thread. If the thread cannot be started the
/// job, and with it the reply, is dropped, which answers the kernel with EIO.
pub(crate) fn spawn_worker<F>(op: &'static str, job: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = thread::Builder::new().name(format!("gridfs-{op}")).spawn(job) {
        error!("cannot start worker for {}: {}", op, e);
    }
}

impl Filesystem for GridFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        self.core.init();
        Ok(())
    }

    fn destroy(&mut self) {
        self.core.destroy();
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        read_ops::lookup(self, req, parent, name, reply);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        attr_ops::getattr(self, req, ino, reply);
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        attr_ops::setattr(self, req, ino, mode, uid, gid, size, reply);
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        attr_ops::statfs(self, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(&mut self, req: &Request<'_>, ino: u64, _fh: u64, offset: i64, reply: ReplyDirectory) {
        read_ops::readdir(self, req, ino, offset, reply);
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        read_ops::read(self, req, ino, offset, size, reply);
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        write_ops::write(self, req, ino, offset, data, reply);
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        write_ops::create(self, req, parent, name, reply);
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        write_ops::mknod(self, req, parent, name, reply);
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        write_ops::mkdir(self, req, parent, name, reply);
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        write_ops::unlink(self, req, parent, name, reply);
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        write_ops::rmdir(self, req, parent, name, reply);
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        write_ops::rename(self, req, parent, name, newparent, newname, reply);
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLER: Caller = Caller {
        uid: 1000,
        gid: 100,
        pid: 1,
    };

    #[test]
    fn files_and_directories_get_distinct_modes() {
        let file = Attributes {
            kind: EntryKind::File,
            size: 5000,
            modified: 1_000,
        };
        let attr = file_attr(7, &file, &CALLER);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.blocks, 10);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1_000));
        assert_eq!((attr.uid, attr.gid), (1000, 100));

        let dir = file_attr(8, &Attributes::directory(), &CALLER);
        assert_eq!(dir.kind, FileType::Directory);
        assert_eq!(dir.nlink, 2);
        assert_eq!(dir.perm, 0o755);
    }

    #[test]
    fn negative_times_clamp_to_the_epoch() {
        let attrs = Attributes {
            kind: EntryKind::File,
            size: 0,
            modified: -5,
        };
        assert_eq!(file_attr(2, &attrs, &CALLER).mtime, UNIX_EPOCH);
    }
}
