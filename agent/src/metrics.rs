//! Host Metrics Probe: short-window CPU/memory sampling for the batch
//! controller.
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::System;
use tracing::warn;

/// CPU sampling window. `sysinfo` requires at least one prior refresh
/// separated by this much wall-clock time to report a meaningful delta.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// A point-in-time reading of host resource usage, all fields in `[0, 100]`.
/// `queue_load` is filled in by the caller, not the probe.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SystemMetrics {
    /// System-wide CPU utilisation percentage.
    pub cpu_usage: f64,
    /// Used memory as a percentage of total.
    pub memory_usage: f64,
    /// Current queue depth as a percentage of its configured maximum.
    pub queue_load: f64,
}

/// Samples host resource usage. Implementations must be pure of side
/// effects beyond the sampling itself and safe to call repeatedly from the
/// Egress Worker's hot loop.
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    /// Takes a fresh sample. `queue_load` is always 0 in the result; the
    /// caller fills it in from the queue's current depth.
    async fn sample(&self) -> SystemMetrics;
}

/// [`MetricsProbe`] backed by `sysinfo`.
pub struct HostMetricsProbe {
    system: tokio::sync::Mutex<System>,
}

impl HostMetricsProbe {
    /// Builds a probe with an initial baseline refresh so the first real
    /// sample already has a delta to compute CPU usage from.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        HostMetricsProbe {
            system: tokio::sync::Mutex::new(system),
        }
    }
}

impl Default for HostMetricsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsProbe for HostMetricsProbe {
    async fn sample(&self) -> SystemMetrics {
        let mut system = self.system.lock().await;

        tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_usage = system.global_cpu_usage() as f64;
        let cpu_usage = if cpu_usage.is_finite() {
            cpu_usage.clamp(0.0, 100.0)
        } else {
            warn!("CPU sample was not finite, reporting 0");
            0.0
        };

        let total_memory = system.total_memory();
        let memory_usage = if total_memory > 0 {
            (system.used_memory() as f64 / total_memory as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            warn!("total memory reported as 0, reporting 0 memory usage");
            0.0
        };

        SystemMetrics {
            cpu_usage,
            memory_usage,
            queue_load: 0.0,
        }
    }
}
