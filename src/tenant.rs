use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::scheduler::{self, CompactionPolicy};

/// One engine per tenant, each with its own WAL and compactor.
/// The tenant is the database name from the connection startup.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compaction: CompactionPolicy,
    shutdown: CancellationToken,
}

/// Tenant names map one-to-one onto WAL files, so only letters, digits, `_` and `-`
/// are accepted.
fn wal_file_stem(tenant: &str) -> io::Result<&str> {
    if tenant.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    if let Some(c) = tenant
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid character {c:?} in tenant name"),
        ));
    }
    Ok(tenant)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compaction: CompactionPolicy) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compaction,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get or lazily load the engine for `tenant`. Loading replays its WAL.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let stem = wal_file_stem(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The entry guard keeps two connections racing on a new tenant from replaying its WAL twice.
        // `len()` would deadlock on the guarded shard, so the gauge is set after it drops.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{stem}.wal"));
                let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()))?);
                tokio::spawn(scheduler::run_compactor(
                    engine.clone(),
                    self.compaction,
                    self.shutdown.child_token(),
                ));
                slot.insert(engine.clone());
                engine
            }
        };
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!("loaded tenant {tenant}");
        Ok(engine)
    }

    /// Stop every tenant's background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
