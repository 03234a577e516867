// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use reqwest::Client;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Periodically probes every backend and maintains its health flag.
///
/// Cycles are delay-scheduled: the next cycle starts one interval after the
/// previous one finished, so slow backends never pile probe bursts on top of
/// each other. Probes within a cycle run sequentially in registration order.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        // Redirects are not followed: a 3xx answer is not a healthy backend.
        let client = Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pool,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting health checker with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = sleep(self.config.interval()) => {
                    self.run_once().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One full probe cycle over the pool.
    pub async fn run_once(&self) {
        debug!("Performing health checks");

        let mut healthy_count = 0;
        let mut unhealthy_count = 0;

        for backend in self.pool.snapshot() {
            let result = self.check_backend(backend).await;
            if result.healthy {
                healthy_count += 1;
            } else {
                unhealthy_count += 1;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.pool.healthy_count(), self.pool.len());
        }

        info!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count, unhealthy_count
        );
    }

    async fn check_backend(&self, backend: &Arc<Backend>) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let was_healthy = backend.is_healthy();

        let url = match backend.url.join(&self.config.path) {
            Ok(url) => url,
            Err(e) => {
                self.pool.set_healthy(&backend.id, false);
                return HealthCheckResult {
                    backend_id: backend.id.clone(),
                    healthy: false,
                    response_time_ms: 0,
                    error: Some(format!("Invalid health check URL: {}", e)),
                };
            }
        };

        let result = timeout(
            self.config.timeout(),
            self.client.get(url.as_str()).send(),
        )
        .await;

        let response_time_ms = start.elapsed().as_millis() as u64;

        // Only a 200 counts as healthy; redirects and other 2xx do not.
        let (healthy, error) = match result {
            Ok(Ok(response)) => {
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    (true, None)
                } else {
                    (false, Some(format!("HTTP {}", status)))
                }
            }
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("Probe timeout".to_string())),
        };

        self.pool.set_healthy(&backend.id, healthy);

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, healthy);
        }

        match (was_healthy, healthy) {
            (false, true) => info!("Backend {} is healthy again", backend.id),
            (true, false) => warn!(
                "Backend {} is unhealthy: {}",
                backend.id,
                error.as_deref().unwrap_or("unknown")
            ),
            _ => debug!(
                "Backend {} unchanged ({}, {}ms)",
                backend.id,
                if healthy { "healthy" } else { "unhealthy" },
                response_time_ms
            ),
        }

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error,
        }
    }
}
