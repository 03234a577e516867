// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use url::Url;

/// Number of recent latency samples retained per backend.
const LATENCY_WINDOW: usize = 10;

#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,

    // Runtime state
    healthy: AtomicBool,
    latency: Mutex<LatencyWindow>,
    // Cached f64 bits of the window average, readable without the lock.
    avg_latency_bits: AtomicU64,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

#[derive(Debug, Default)]
struct LatencyWindow {
    samples: VecDeque<u64>,
}

impl LatencyWindow {
    fn push(&mut self, millis: u64) -> f64 {
        self.samples.push_back(millis);
        while self.samples.len() > LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.average()
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.samples.iter().sum();
        sum as f64 / self.samples.len() as f64
    }
}

impl Backend {
    pub fn new(url: Url) -> Self {
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );

        Self {
            id,
            url,
            healthy: AtomicBool::new(true),
            latency: Mutex::new(LatencyWindow::default()),
            avg_latency_bits: AtomicU64::new(0.0f64.to_bits()),
            last_health_check: Mutex::new(None),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        let mut last_check = self.last_health_check.lock().unwrap();
        *last_check = Some(Utc::now());
    }

    /// Append one round-trip sample (milliseconds) and refresh the cached
    /// average. The window keeps the most recent samples only.
    pub fn record_latency(&self, millis: u64) {
        let mut window = self.latency.lock().unwrap();
        let avg = window.push(millis);
        self.avg_latency_bits.store(avg.to_bits(), Ordering::Release);
    }

    /// Arithmetic mean over the retained samples, 0 when none recorded yet.
    pub fn avg_latency_ms(&self) -> f64 {
        f64::from_bits(self.avg_latency_bits.load(Ordering::Acquire))
    }

    pub fn latency_samples(&self) -> Vec<u64> {
        self.latency.lock().unwrap().samples.iter().copied().collect()
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        *self.last_health_check.lock().unwrap()
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_metrics(&self) -> BackendMetrics {
        BackendMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct BackendMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
}
