//! Metrics and observability for soma_compose

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Request counters shared by every connection.
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub cancelled_jobs: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-operation counters
    pub image_to_video_count: AtomicU64,
    pub sequence_to_video_count: AtomicU64,
    pub overlay_count: AtomicU64,
    pub layers_count: AtomicU64,
    pub probe_count: AtomicU64,
    pub capabilities_count: AtomicU64,
    pub metrics_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let counter = match op {
            "compose.image_to_video" => &self.image_to_video_count,
            "compose.sequence_to_video" => &self.sequence_to_video_count,
            "compose.overlay" => &self.overlay_count,
            "compose.layers" => &self.layers_count,
            "media.probe" => &self.probe_count,
            "media.capabilities" => &self.capabilities_count,
            "metrics" => &self.metrics_count,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: failed,
            cancelled_jobs: self.cancelled_jobs.load(Ordering::Relaxed),
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            operations: OperationMetrics {
                image_to_video: self.image_to_video_count.load(Ordering::Relaxed),
                sequence_to_video: self.sequence_to_video_count.load(Ordering::Relaxed),
                overlay: self.overlay_count.load(Ordering::Relaxed),
                layers: self.layers_count.load(Ordering::Relaxed),
                probe: self.probe_count.load(Ordering::Relaxed),
                capabilities: self.capabilities_count.load(Ordering::Relaxed),
                metrics: self.metrics_count.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cancelled_jobs: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub operations: OperationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub image_to_video: u64,
    pub sequence_to_video: u64,
    pub overlay: u64,
    pub layers: u64,
    pub probe: u64,
    pub capabilities: u64,
    pub metrics: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
