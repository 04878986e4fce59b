//! A fixed set of reusable HTTP client connections.
//!
//! Each slot holds one `reqwest::Client` configured for a single
//! (uid, credential file) owner. A slot's connection mutex is held for a whole
//! exchange, so a slot serves one exchange at a time and the pool as a whole
//! runs at most [`POOL_SIZE`] exchanges concurrently.
//!
//! Slot selection scans a small per-slot tag (owner, last use) that is only
//! ever locked briefly, so choosing a slot never waits behind a running
//! exchange. Waiting happens afterwards, on the chosen slot's connection lock,
//! and has no timeout.

use crate::config::Config;
use crate::error::TransportError;
use reqwest::{Certificate, Client, Identity, redirect};
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

pub const POOL_SIZE: usize = 16;

/// Who a pooled connection authenticates as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub identity: u32,
    /// `None` only ever matches `None`: anonymous TLS.
    pub credential: Option<PathBuf>,
}

struct Connection {
    client: Client,
    owner: Owner,
}

#[derive(Debug, Default, Clone)]
struct SlotTag {
    owner: Option<Owner>,
    last_used: Option<Instant>,
}

#[derive(Default)]
struct Slot {
    tag: Mutex<SlotTag>,
    connection: Mutex<Option<Connection>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConnectionPool {
    slots: Vec<Slot>,
    runtime: Runtime,
    user_agent: String,
    trust_anchors: Vec<Certificate>,
}

impl ConnectionPool {
    /// Creates every slot up front, empty, and the runtime exchanges run on.
    pub fn new(config: &Config) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("gridfs-http")
            .build()?;

        let trust_anchors = load_trust_anchors(&config.ca_dir);
        info!(
            "connection pool ready: {} slots, {} trust anchors from {}",
            POOL_SIZE,
            trust_anchors.len(),
            config.ca_dir.display()
        );

        Ok(Self {
            slots: (0..POOL_SIZE).map(|_| Slot::default()).collect(),
            runtime,
            user_agent: config.user_agent.clone(),
            trust_anchors,
        })
    }

    /// Locks a connection configured for `owner`, reconfiguring a slot if needed.
    ///
    /// Prefers a slot already configured for `owner`, then an empty slot,
    /// then the least recently used one. The returned guard releases the
    /// slot when dropped.
    pub fn acquire(&self, owner: &Owner) -> Result<PooledConnection<'_>, TransportError> {
        let index = self.select(owner);
        let slot = &self.slots[index];
        let mut guard = lock(&slot.connection);

        // Another thread may have reconfigured the slot between select and lock.
        let client = match guard.as_ref() {
            Some(conn) if conn.owner == *owner => conn.client.clone(),
            _ => {
                debug!(
                    slot = index,
                    uid = owner.identity,
                    credential = ?owner.credential,
                    "configuring pooled connection"
                );
                *guard = None;
                lock(&slot.tag).owner = None;

                let client = self.build_client(owner)?;
                *guard = Some(Connection {
                    client: client.clone(),
                    owner: owner.clone(),
                });
                client
            }
        };

        {
            let mut tag = lock(&slot.tag);
            tag.owner = Some(owner.clone());
            tag.last_used = Some(Instant::now());
        }

        Ok(PooledConnection {
            slot: index,
            owner: owner.clone(),
            client,
            runtime: &self.runtime,
            _guard: guard,
        })
    }

    fn select(&self, owner: &Owner) -> usize {
        let tags: Vec<SlotTag> = self.slots.iter().map(|slot| lock(&slot.tag).clone()).collect();

        if let Some(index) = tags.iter().position(|tag| tag.owner.as_ref() == Some(owner)) {
            return index;
        }

        let mut chosen = 0;
        for (index, tag) in tags.iter().enumerate() {
            if tag.owner.is_none() {
                return index;
            }
            if tag.last_used < tags[chosen].last_used {
                chosen = index;
            }
        }
        chosen
    }

    fn build_client(&self, owner: &Owner) -> Result<Client, TransportError> {
        let mut builder = Client::builder()
            .user_agent(self.user_agent.as_str())
            .redirect(redirect::Policy::none())
            .tls_built_in_root_certs(true);

        for anchor in &self.trust_anchors {
            builder = builder.add_root_certificate(anchor.clone());
        }

        if let Some(path) = &owner.credential {
            builder = builder.identity(load_identity(path)?);
        }

        let _runtime = self.runtime.enter();
        Ok(builder.build()?)
    }

    /// Current owner of every slot, in slot order.
    pub fn owners(&self) -> Vec<Option<Owner>> {
        self.slots.iter().map(|slot| lock(&slot.tag).owner.clone()).collect()
    }
}

/// A locked slot. Only this holder can run exchanges on it until dropped.
pub struct PooledConnection<'a> {
    slot: usize,
    owner: Owner,
    client: Client,
    runtime: &'a Runtime,
    _guard: MutexGuard<'a, Option<Connection>>,
}

impl PooledConnection<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drives one exchange to completion on the calling thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// A proxy file holds the certificate, its key and the issuing chain.
fn load_identity(path: &Path) -> Result<Identity, TransportError> {
    let credential_error = |reason: String| TransportError::Credential {
        path: path.to_path_buf(),
        reason,
    };
    let pem = fs::read(path).map_err(|e| credential_error(e.to_string()))?;
    Identity::from_pem(&pem).map_err(|e| credential_error(e.to_string()))
}

fn load_trust_anchors(dir: &Path) -> Vec<Certificate> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("no trust anchors in {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut anchors = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_anchor = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "pem" || ext.bytes().all(|b| b.is_ascii_digit()));
        if !is_anchor {
            continue;
        }
        match fs::read(&path).map(|pem| Certificate::from_pem_bundle(&pem)) {
            Ok(Ok(certs)) => anchors.extend(certs),
            Ok(Err(e)) => warn!("skipping trust anchor {}: {}", path.display(), e),
            Err(e) => warn!("cannot read trust anchor {}: {}", path.display(), e),
        }
    }
    anchors
}
