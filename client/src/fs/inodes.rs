//! Inode numbers handed to the kernel and the mount paths they stand for.

use crate::paths;
use std::collections::HashMap;
use std::ffi::OsStr;

pub(crate) const ROOT_INO: u64 = 1;

/// Inodes are allocated on first sight of a path and never reused.
#[derive(Debug)]
pub struct InodeTable {
    inode_to_path: HashMap<u64, String>,
    path_to_inode: HashMap<String, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();
        inode_to_path.insert(ROOT_INO, "/".to_string());
        path_to_inode.insert("/".to_string(), ROOT_INO);
        Self {
            inode_to_path,
            path_to_inode,
            next_inode: ROOT_INO + 1,
        }
    }

    pub fn path(&self, ino: u64) -> Option<String> {
        self.inode_to_path.get(&ino).cloned()
    }

    /// Path of `name` inside directory `parent`; `None` for unknown parents
    /// and names that are not UTF-8.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let dir = self.inode_to_path.get(&parent)?;
        Some(paths::join(dir, name.to_str()?))
    }

    /// The inode for `path`, allocating one if the path is new.
    pub fn intern(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.inode_to_path.insert(ino, path.to_string());
        self.path_to_inode.insert(path.to_string(), ino);
        ino
    }

    pub fn remove(&mut self, path: &str) {
        if let Some(ino) = self.path_to_inode.remove(path) {
            self.inode_to_path.remove(&ino);
        }
    }

    /// Moves `from` and everything below it to `to`, keeping inode numbers.
    pub fn rename(&mut self, from: &str, to: &str) {
        self.remove(to);
        let prefix = format!("{from}/");
        let moved: Vec<(String, u64)> = self
            .path_to_inode
            .iter()
            .filter(|(path, _)| *path == from || path.starts_with(&prefix))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();

        for (old, ino) in moved {
            let new = format!("{to}{}", &old[from.len()..]);
            self.path_to_inode.remove(&old);
            self.path_to_inode.insert(new.clone(), ino);
            self.inode_to_path.insert(ino, new);
        }
    }
}
