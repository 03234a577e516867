// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        // The cursor advances once per scan step, healthy or not, so an
        // unhealthy stretch cannot starve the entries behind it. At most one
        // full lap before giving up.
        for _ in 0..backends.len() {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % backends.len();
            let backend = &backends[index];
            if backend.is_healthy() {
                return Some(backend.clone());
            }
        }

        None
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn backends(ports: &[u16]) -> Vec<Arc<Backend>> {
        ports
            .iter()
            .map(|p| {
                Arc::new(Backend::new(
                    Url::parse(&format!("http://localhost:{}", p)).unwrap(),
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cycles_in_registration_order() {
        let backends = backends(&[8080, 8081, 8082]);
        let balancer = RoundRobinBalancer::new();

        let mut picked = Vec::new();
        for _ in 0..3 {
            picked.push(balancer.select_backend(&backends).await.unwrap().id.clone());
        }
        assert_eq!(
            picked,
            vec!["localhost:8080", "localhost:8081", "localhost:8082"]
        );

        // Next lap starts where the cursor stopped.
        let next = balancer.select_backend(&backends).await.unwrap();
        assert_eq!(next.id, "localhost:8080");
    }

    #[tokio::test]
    async fn test_skips_unhealthy_backend() {
        let backends = backends(&[8080, 8081, 8082]);
        backends[1].set_healthy(false);
        let balancer = RoundRobinBalancer::new();

        let mut picked = Vec::new();
        for _ in 0..4 {
            picked.push(balancer.select_backend(&backends).await.unwrap().id.clone());
        }
        assert_eq!(
            picked,
            vec![
                "localhost:8080",
                "localhost:8082",
                "localhost:8080",
                "localhost:8082"
            ]
        );
    }

    #[tokio::test]
    async fn test_none_when_all_unhealthy() {
        let backends = backends(&[8080, 8081]);
        for b in &backends {
            b.set_healthy(false);
        }
        let balancer = RoundRobinBalancer::new();
        assert!(balancer.select_backend(&backends).await.is_none());

        // Recovery is picked up on the next call.
        backends[1].set_healthy(true);
        let picked = balancer.select_backend(&backends).await.unwrap();
        assert_eq!(picked.id, "localhost:8081");
    }

    #[tokio::test]
    async fn test_none_on_empty_slice() {
        let balancer = RoundRobinBalancer::new();
        assert!(balancer.select_backend(&[]).await.is_none());
    }
}
