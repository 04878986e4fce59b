use super::prelude::*;
use std::time::{SystemTime, UNIX_EPOCH};

fn fresh(kind: EntryKind) -> Attributes {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64);
    Attributes {
        kind,
        size: 0,
        modified: now,
    }
}

pub fn write(fs: &GridFs, req: &Request<'_>, ino: u64, offset: i64, data: &[u8], reply: ReplyWrite) {
    let Some(path) = fs.inodes().path(ino) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let data = data.to_vec();

    spawn_worker("write", move || match core.write(&caller, &path, offset.max(0) as u64, &data) {
        Ok(written) => reply.written(written as u32),
        Err(e) => {
            debug!(uid = caller.uid, "write {} at {}: {}", path, offset, e);
            reply.error(e.errno());
        }
    });
}

pub fn create(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyCreate) {
    let Some(path) = fs.inodes().child_path(parent, name) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let inodes = Arc::clone(&fs.inodes);
    let ttl = fs.ttl;

    spawn_worker("create", move || match core.mknod(&caller, &path) {
        Ok(()) => {
            let ino = lock_table(&inodes).intern(&path);
            reply.created(&ttl, &file_attr(ino, &fresh(EntryKind::File), &caller), 0, 0, 0);
        }
        Err(e) => reply.error(e.errno()),
    });
}

pub fn mknod(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
    make(fs, req, parent, name, EntryKind::File, reply);
}

pub fn mkdir(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
    make(fs, req, parent, name, EntryKind::Directory, reply);
}

fn make(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, kind: EntryKind, reply: ReplyEntry) {
    let Some(path) = fs.inodes().child_path(parent, name) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let inodes = Arc::clone(&fs.inodes);
    let ttl = fs.ttl;

    spawn_worker("mknod", move || {
        let result = match kind {
            EntryKind::File => core.mknod(&caller, &path),
            EntryKind::Directory => core.mkdir(&caller, &path),
        };
        match result {
            Ok(()) => {
                let ino = lock_table(&inodes).intern(&path);
                reply.entry(&ttl, &file_attr(ino, &fresh(kind), &caller), 0);
            }
            Err(e) => {
                debug!(uid = caller.uid, "creating {}: {}", path, e);
                reply.error(e.errno());
            }
        }
    });
}

pub fn unlink(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
    remove(fs, req, parent, name, EntryKind::File, reply);
}

pub fn rmdir(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
    remove(fs, req, parent, name, EntryKind::Directory, reply);
}

fn remove(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, kind: EntryKind, reply: ReplyEmpty) {
    let Some(path) = fs.inodes().child_path(parent, name) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let inodes = Arc::clone(&fs.inodes);

    spawn_worker("unlink", move || {
        let result = match kind {
            EntryKind::File => core.unlink(&caller, &path),
            EntryKind::Directory => core.rmdir(&caller, &path),
        };
        match result {
            Ok(()) => {
                lock_table(&inodes).remove(&path);
                reply.ok();
            }
            Err(e) => {
                debug!(uid = caller.uid, "removing {}: {}", path, e);
                reply.error(e.errno());
            }
        }
    });
}

pub fn rename(
    fs: &GridFs,
    req: &Request<'_>,
    parent: u64,
    name: &OsStr,
    newparent: u64,
    newname: &OsStr,
    reply: ReplyEmpty,
) {
    let (from, to) = {
        let table = fs.inodes();
        match (table.child_path(parent, name), table.child_path(newparent, newname)) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                reply.error(ENOENT);
                return;
            }
        }
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let inodes = Arc::clone(&fs.inodes);

    spawn_worker("rename", move || match core.rename(&caller, &from, &to) {
        Ok(()) => {
            lock_table(&inodes).rename(&from, &to);
            reply.ok();
        }
        Err(e) => {
            debug!(uid = caller.uid, "rename {} to {}: {}", from, to, e);
            reply.error(e.errno());
        }
    });
}
