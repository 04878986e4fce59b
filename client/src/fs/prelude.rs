//! Common imports for the `*_ops` files.

pub use fuser::{
    ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyStatfs, ReplyWrite,
    Request,
};

pub use libc::ENOENT;

pub use std::ffi::OsStr;
pub use std::sync::Arc;

pub use tracing::debug;

pub use crate::grid::{Attributes, EntryKind};

pub(crate) use super::{GridFs, caller, file_attr, file_type, lock_table, spawn_worker};
