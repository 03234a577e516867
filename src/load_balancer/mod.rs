// src/load_balancer/mod.rs
mod algorithm;
mod least_response_time;
mod round_robin;

pub use algorithm::LoadBalancer; // trait
pub use least_response_time::LeastResponseTimeBalancer;
pub use round_robin::RoundRobinBalancer;

use crate::config::LoadBalancerAlgorithm;
use std::sync::Arc;

pub fn create_load_balancer(algorithm: LoadBalancerAlgorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancerAlgorithm::LeastResponseTime => Arc::new(LeastResponseTimeBalancer::new()),
    }
}
