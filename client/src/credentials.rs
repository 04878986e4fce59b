//! Per-request selection of the client certificate that authenticates a caller.

use crate::config::Config;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use tracing::debug;

/// The process on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// Finds a caller's proxy certificate.
///
/// The caller's own environment wins; otherwise the per-uid default is used,
/// but only when that file belongs to the caller. Resolution is repeated for
/// every request since the same uid may run processes with different proxies.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    proc_dir: PathBuf,
    env_var: String,
    default_dir: PathBuf,
    default_prefix: String,
}

impl CredentialResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            proc_dir: config.proc_dir.clone(),
            env_var: config.proxy_env_var.clone(),
            default_dir: config.proxy_dir.clone(),
            default_prefix: config.proxy_prefix.clone(),
        }
    }

    /// `None` means anonymous TLS.
    pub fn resolve(&self, caller: &Caller) -> Option<PathBuf> {
        let found = self
            .from_environment(caller.pid)
            .or_else(|| self.default_for(caller.uid));
        if let Some(path) = &found {
            debug!(uid = caller.uid, pid = caller.pid, "using proxy file {}", path.display());
        }
        found
    }

    /// Looks the variable up in `<proc>/<pid>/environ`; only the first
    /// occurrence counts, and it must name an existing file.
    fn from_environment(&self, pid: u32) -> Option<PathBuf> {
        let environ = fs::read(self.proc_dir.join(pid.to_string()).join("environ")).ok()?;
        let prefix = format!("{}=", self.env_var);

        let value = environ
            .split(|&b| b == 0)
            .find_map(|var| var.strip_prefix(prefix.as_bytes()))?;
        if value.is_empty() {
            return None;
        }

        let path = PathBuf::from(String::from_utf8_lossy(value).into_owned());
        fs::metadata(&path).ok().map(|_| path)
    }

    fn default_for(&self, uid: u32) -> Option<PathBuf> {
        let path = self.default_dir.join(format!("{}{}", self.default_prefix, uid));
        match fs::metadata(&path) {
            Ok(meta) if meta.uid() == uid => Some(path),
            _ => None,
        }
    }
}
