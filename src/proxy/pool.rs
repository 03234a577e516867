// src/proxy/pool.rs
use super::backend::Backend;
use crate::config::BackendConfig;
use dashmap::DashMap;
use std::sync::Arc;

/// Registry of all configured backends.
///
/// Membership is fixed at startup; registration order is preserved because
/// round-robin cycles through it. Lookups by id go through the index so
/// health and latency writers never scan the list.
#[derive(Clone)]
pub struct BackendPool {
    backends: Arc<Vec<Arc<Backend>>>,
    by_id: Arc<DashMap<String, Arc<Backend>>>,
}

impl BackendPool {
    pub fn new(configs: &[BackendConfig]) -> Self {
        let mut backends = Vec::with_capacity(configs.len());
        let by_id = DashMap::new();

        for config in configs {
            let backend = Arc::new(Backend::new(config.url.clone()));
            by_id.insert(backend.id.clone(), backend.clone());
            backends.push(backend);
        }

        Self {
            backends: Arc::new(backends),
            by_id: Arc::new(by_id),
        }
    }

    /// All backends in registration order.
    pub fn snapshot(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn get_backend(&self, id: &str) -> Option<Arc<Backend>> {
        self.by_id.get(id).map(|b| b.value().clone())
    }

    /// Unknown ids are ignored; membership is static so this only happens
    /// on a caller bug.
    pub fn set_healthy(&self, id: &str, healthy: bool) {
        if let Some(backend) = self.by_id.get(id) {
            backend.set_healthy(healthy);
        }
    }

    pub fn record_latency(&self, id: &str, millis: u64) {
        if let Some(backend) = self.by_id.get(id) {
            backend.record_latency(millis);
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }
}
