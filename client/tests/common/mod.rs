#![allow(dead_code)]

use gridfs::encode::encode;
use gridfs::{Caller, Config, GridCore};
use gridfs_origin::{OriginState, serve};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;

pub const CALLER: Caller = Caller {
    uid: 1000,
    gid: 1000,
    pid: 1,
};

/// A reference origin running on its own thread and runtime.
pub struct Origin {
    pub data: TempDir,
    pub addr: SocketAddr,
}

impl Origin {
    pub fn start(forbid: &[&str]) -> Self {
        let data = tempfile::tempdir().unwrap();
        let mut state = OriginState::new(data.path());
        for prefix in forbid {
            state = state.forbid(*prefix);
        }

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let _ = serve(listener, state).await;
            });
        });

        Self { data, addr }
    }

    /// Mount path of `relative` (which starts with `/`) on this origin.
    pub fn path(&self, relative: &str) -> String {
        format!("/http/{}{}", self.addr, relative)
    }

    pub fn file(&self, relative: &str) -> PathBuf {
        self.data.path().join(relative.trim_start_matches('/'))
    }

    pub fn put(&self, relative: &str, contents: impl AsRef<[u8]>) {
        let target = self.file(relative);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, contents).unwrap();
    }
}

/// A core whose caches and scratch space live in a temporary directory.
pub struct Mount {
    pub root: TempDir,
    pub core: GridCore,
}

impl Mount {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            ca_dir: root.path().join("no-anchors"),
            proc_dir: root.path().join("no-proc"),
            ..Config::rooted_at(root.path())
        };
        config.prepare_dirs().unwrap();
        let core = GridCore::new(config).unwrap();
        Self { root, core }
    }

    /// Directory holding the cached blocks of `path` for [`CALLER`].
    pub fn block_dir(&self, path: &str) -> PathBuf {
        blocks_root(self.root.path()).join(format!("{}{}", CALLER.uid, encode(path)))
    }
}

fn blocks_root(root: &Path) -> PathBuf {
    root.join("blocks")
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
