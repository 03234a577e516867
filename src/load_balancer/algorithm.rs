// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Selection policy over the pool's registration-ordered snapshot.
///
/// Implementations are read-only: they never mutate health or latency state.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Pick one healthy backend, or `None` when every entry is unhealthy.
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
