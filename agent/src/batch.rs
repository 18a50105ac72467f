//! Batch Controller: a pure function of metrics and configuration producing
//! the size and flush cadence the Egress Worker should use next.
use std::time::Duration;

use crate::config::Config;
use crate::metrics::SystemMetrics;

/// Adaptive batching parameters for one Egress Worker cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchParameters {
    /// Number of messages to accumulate before flushing, always within
    /// `[config.min_batch_size, config.max_batch_size]`.
    pub batch_size: usize,
    /// Time to wait before flushing a non-empty buffer, always within
    /// `[config.min_batch_interval, config.max_batch_interval]`.
    pub flush_interval: Duration,
}

/// Computes [`BatchParameters`] from the current [`SystemMetrics`] and
/// `config`. Pure: calling this twice with the same inputs returns
/// identical results.
///
/// `config.scale_factor` is intentionally unread here; see the open
/// question recorded in DESIGN.md.
pub fn compute(metrics: &SystemMetrics, config: &Config) -> BatchParameters {
    let cpu_factor = (1.0 - metrics.cpu_usage / config.target_cpu_percent).max(0.0);
    let mem_factor = (1.0 - metrics.memory_usage / config.target_mem_percent).max(0.0);
    let queue_factor = (metrics.queue_load / 50.0).min(1.0);

    let resource_factor = 0.4 * cpu_factor + 0.4 * mem_factor + 0.2 * queue_factor;

    let raw_size = (config.max_batch_size as f64 * resource_factor).floor() as i64;
    let batch_size = raw_size.clamp(
        config.min_batch_size as i64,
        config.max_batch_size as i64,
    ) as usize;

    let raw_interval_secs =
        config.max_batch_interval.as_secs_f64() * (1.0 - metrics.queue_load / 100.0);
    let flush_interval = Duration::from_secs_f64(raw_interval_secs).max(config.min_batch_interval);

    BatchParameters {
        batch_size,
        flush_interval,
    }
}
