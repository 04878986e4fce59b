use super::prelude::*;
use crate::paths;

pub fn lookup(fs: &GridFs, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
    let Some(path) = fs.inodes().child_path(parent, name) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let inodes = Arc::clone(&fs.inodes);
    let ttl = fs.ttl;

    spawn_worker("lookup", move || match core.getattr(&caller, &path) {
        Ok(attrs) => {
            let ino = lock_table(&inodes).intern(&path);
            reply.entry(&ttl, &file_attr(ino, &attrs, &caller), 0);
        }
        Err(e) => {
            debug!(uid = caller.uid, "lookup {}: {}", path, e);
            reply.error(e.errno());
        }
    });
}

pub fn readdir(fs: &GridFs, req: &Request<'_>, ino: u64, offset: i64, mut reply: ReplyDirectory) {
    let Some(dir_path) = fs.inodes().path(ino) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let inodes = Arc::clone(&fs.inodes);

    spawn_worker("readdir", move || {
        let listing = match core.readdir(&caller, &dir_path) {
            Ok(listing) => listing,
            Err(e) => {
                debug!(uid = caller.uid, "readdir {}: {}", dir_path, e);
                reply.error(e.errno());
                return;
            }
        };

        let mut entries = vec![
            (ino, EntryKind::Directory, ".".to_string()),
            (super::inodes::ROOT_INO, EntryKind::Directory, "..".to_string()),
        ];
        {
            let mut table = lock_table(&inodes);
            for entry in listing {
                let child = table.intern(&paths::join(&dir_path, &entry.name));
                entries.push((child, entry.attrs.kind, entry.name));
            }
        }

        for (i, (child, kind, name)) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(child, (i + 1) as i64, file_type(kind), &name) {
                break;
            }
        }
        reply.ok();
    });
}

pub fn read(fs: &GridFs, req: &Request<'_>, ino: u64, offset: i64, size: u32, reply: ReplyData) {
    let Some(path) = fs.inodes().path(ino) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);

    spawn_worker("read", move || match core.read(&caller, &path, offset.max(0) as u64, size) {
        Ok(data) => reply.data(&data),
        Err(e) => {
            debug!(uid = caller.uid, "read {} at {}: {}", path, offset, e);
            reply.error(e.errno());
        }
    });
}
