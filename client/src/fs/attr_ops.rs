use super::prelude::*;

pub fn getattr(fs: &GridFs, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
    let Some(path) = fs.inodes().path(ino) else {
        reply.error(ENOENT);
        return;
    };
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let ttl = fs.ttl;

    spawn_worker("getattr", move || match core.getattr(&caller, &path) {
        Ok(attrs) => reply.attr(&ttl, &file_attr(ino, &attrs, &caller)),
        Err(e) => {
            debug!(uid = caller.uid, "getattr {}: {}", path, e);
            reply.error(e.errno());
        }
    });
}

/// Only a size change reaches the origin; mode and ownership changes are
/// accepted and ignored.
#[allow(clippy::too_many_arguments)]
pub fn setattr(
    fs: &GridFs,
    req: &Request<'_>,
    ino: u64,
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    reply: ReplyAttr,
) {
    let Some(path) = fs.inodes().path(ino) else {
        reply.error(ENOENT);
        return;
    };
    if mode.is_some() || uid.is_some() || gid.is_some() {
        debug!("ignoring mode/owner change on {}", path);
    }
    let caller = caller(req);
    let core = Arc::clone(&fs.core);
    let ttl = fs.ttl;

    spawn_worker("setattr", move || {
        let result = match size {
            Some(length) => core.truncate(&caller, &path, length),
            None => Ok(()),
        };
        match result.and_then(|()| core.getattr(&caller, &path)) {
            Ok(attrs) => reply.attr(&ttl, &file_attr(ino, &attrs, &caller)),
            Err(e) => {
                debug!(uid = caller.uid, "setattr {}: {}", path, e);
                reply.error(e.errno());
            }
        }
    });
}

pub fn statfs(fs: &GridFs, reply: ReplyStatfs) {
    match fs.core.statfs() {
        Ok(s) => reply.statfs(
            s.blocks,
            s.blocks_free,
            s.blocks_available,
            s.files,
            s.files_free,
            s.block_size,
            s.name_max,
            s.fragment_size,
        ),
        Err(e) => reply.error(e.errno()),
    }
}
