//! Shared state visible to every command handler.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use subtle::ConstantTimeEq;

use crate::commands::CommandRegistry;
use crate::server::config::Config;
use crate::server::ip_filter::IpFilter;
use crate::slots::SlotsManager;
use crate::storage::Store;

/// Shared server state passed to every command handler.
///
/// Handlers run on the reactor thread and on worker threads at the same
/// time, so everything here is either immutable after startup or
/// internally synchronized.
pub struct ServerContext {
    /// Storage engine.
    pub store: Arc<Store>,
    /// Slot bookkeeping and migration state.
    pub slots: SlotsManager,
    /// Live IP allow/deny filter.
    pub ip_filter: RwLock<IpFilter>,
    /// Command table.
    pub registry: CommandRegistry,
    password: Option<String>,
    link_count: AtomicI32,
}

impl ServerContext {
    pub fn new(config: &Config) -> Self {
        let store = Arc::new(Store::new());
        let slots = SlotsManager::new(Arc::clone(&store));
        let mut ip_filter = IpFilter::new();
        for prefix in &config.allow {
            ip_filter.add_allow(prefix);
        }
        for prefix in &config.deny {
            ip_filter.add_deny(prefix);
        }
        Self {
            store,
            slots,
            ip_filter: RwLock::new(ip_filter),
            registry: CommandRegistry::new(),
            password: config.auth.clone(),
            link_count: AtomicI32::new(0),
        }
    }

    /// Configured password, forwarded to migration peers on the shared
    /// secret assumption.
    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// True when clients must authenticate before issuing commands.
    pub fn need_auth(&self) -> bool {
        self.password.is_some()
    }

    /// Compare an auth attempt against the configured password.
    ///
    /// Constant-time comparison, so timing does not leak how much of the
    /// password matched.
    pub fn check_password(&self, attempt: &[u8]) -> bool {
        match &self.password {
            Some(password) => password.as_bytes().ct_eq(attempt).into(),
            None => true,
        }
    }

    /// Number of connected clients.
    pub fn link_count(&self) -> i32 {
        self.link_count.load(Ordering::Relaxed)
    }

    pub(crate) fn incr_links(&self) {
        self.link_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr_links(&self) {
        self.link_count.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("need_auth", &self.need_auth())
            .field("link_count", &self.link_count())
            .field("commands", &self.registry.len())
            .finish()
    }
}
