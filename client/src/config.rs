use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where the mount keeps its state and how it finds credentials.
///
/// Every field has a default, so an empty (or missing) `gridfs.toml`
/// gives the stock layout under `/var/spool/gridfs`.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Root of the metadata cache tree.
    pub headers_dir: PathBuf,
    /// Root of the block cache tree.
    pub blocks_dir: PathBuf,
    /// Scratch directory for files that are renamed into either cache.
    /// Must live on the same filesystem as both cache roots.
    pub tmp_dir: PathBuf,
    /// Directory of PEM trust anchors added on top of the built-in roots.
    pub ca_dir: PathBuf,
    /// Environment variable naming a caller's proxy certificate.
    pub proxy_env_var: String,
    /// Directory holding the per-uid default proxy certificates.
    pub proxy_dir: PathBuf,
    /// File name prefix of a default proxy; the uid is appended.
    pub proxy_prefix: String,
    /// Where process environments are read from.
    pub proc_dir: PathBuf,
    pub pid_file: PathBuf,
    pub user_agent: String,
    pub allow_other: bool,
    pub kernel_attr_timeout_seconds: u64,
    /// Daemon stderr is redirected here when set.
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            headers_dir: PathBuf::from("/var/spool/gridfs/headers"),
            blocks_dir: PathBuf::from("/var/spool/gridfs/blocks"),
            tmp_dir: PathBuf::from("/var/spool/gridfs/tmp"),
            ca_dir: PathBuf::from("/etc/grid-security/certificates"),
            proxy_env_var: "X509_USER_PROXY".to_string(),
            proxy_dir: PathBuf::from("/tmp"),
            proxy_prefix: "x509up_u".to_string(),
            proc_dir: PathBuf::from("/proc"),
            pid_file: PathBuf::from("/var/run/gridfs.pid"),
            user_agent: format!("gridfs/{}", env!("CARGO_PKG_VERSION")),
            allow_other: true,
            kernel_attr_timeout_seconds: 1,
            log_file: None,
        }
    }
}

impl Config {
    /// A configuration whose cache, scratch and pid paths all live under `root`.
    ///
    /// Used by tests and by unprivileged mounts that cannot write to `/var`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            headers_dir: root.join("headers"),
            blocks_dir: root.join("blocks"),
            tmp_dir: root.join("tmp"),
            pid_file: root.join("gridfs.pid"),
            ..Self::default()
        }
    }

    /// Creates the cache roots and the scratch directory if they are missing.
    pub fn prepare_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.headers_dir, &self.blocks_dir, &self.tmp_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Loads the configuration file; `None` when it does not exist.
///
/// Logging may not be set up yet, so the caller reports the fallback.
pub fn load_config(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map(Some).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridfs.toml");
        fs::write(&path, "blocks_dir = \"/srv/blocks\"\nallow_other = false\n").unwrap();

        let config = load_config(&path).unwrap().unwrap();
        assert_eq!(config.blocks_dir, PathBuf::from("/srv/blocks"));
        assert!(!config.allow_other);
        assert_eq!(config.proxy_env_var, "X509_USER_PROXY");
        assert_eq!(config.ca_dir, PathBuf::from("/etc/grid-security/certificates"));
    }

    #[test]
    fn missing_file_is_reported_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.toml")).unwrap().is_none());
        assert_eq!(Config::default().proxy_prefix, "x509up_u");
    }

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridfs.toml");
        fs::write(&path, "").unwrap();
        let config = load_config(&path).unwrap().unwrap();
        assert_eq!(config.blocks_dir, PathBuf::from("/var/spool/gridfs/blocks"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridfs.toml");
        fs::write(&path, "allow_other = \"maybe\"").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }
}
