// src/load_balancer/least_response_time.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Picks the healthy backend with the lowest recent average response time.
///
/// Ties keep the earlier entry in registration order, so backends without
/// samples yet (average 0) all get a chance instead of one absorbing every
/// request.
pub struct LeastResponseTimeBalancer;

impl LeastResponseTimeBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastResponseTimeBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for LeastResponseTimeBalancer {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, f64)> = None;

        for backend in backends {
            if !backend.is_healthy() {
                continue;
            }
            let avg = backend.avg_latency_ms();
            match best {
                // Strict comparison keeps the first entry on equal averages.
                Some((_, best_avg)) if avg >= best_avg => {}
                _ => best = Some((backend, avg)),
            }
        }

        best.map(|(backend, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "least_response_time"
    }
}
