//! Egress Worker: drains the message queue into adaptively sized batches
//! and flushes them upstream on a size-or-time trigger, with a final
//! drain-and-flush on shutdown.
use std::sync::Arc;

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info};

use crate::batch;
use crate::client::UpstreamClient;
use crate::config::Config;
use crate::metrics::MetricsProbe;
use crate::queue::MessageQueue;
use crate::Message;

/// Runs the Egress Worker until `shutdown` fires, then performs one final
/// drain-and-flush before returning.
///
/// Cooperative loop over three events: a message becoming available, the
/// flush timer firing, and shutdown being signalled. Only one task ever
/// runs this loop for a given queue.
pub async fn run(
    queue: Arc<MessageQueue>,
    probe: Arc<dyn MetricsProbe>,
    upstream: UpstreamClient,
    config: Arc<Config>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut buffer: Vec<Message> = Vec::with_capacity(config.max_batch_size);
    let deadline = sleep(config.flush_interval_default);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("egress worker received shutdown signal, draining");
                queue.close();
                buffer.extend(queue.drain());
                // `close()` only rejects *new* offers; a producer already
                // parked in `offer()` on a full queue can still land its
                // message once this drain frees a slot. Keep draining until
                // two consecutive passes come back empty so no such
                // in-flight offer is lost.
                let mut empty_passes = 0;
                while empty_passes < 2 {
                    tokio::task::yield_now().await;
                    let drained = queue.drain();
                    if drained.is_empty() {
                        empty_passes += 1;
                    } else {
                        empty_passes = 0;
                        buffer.extend(drained);
                    }
                }
                if !buffer.is_empty() {
                    info!(count = buffer.len(), "flushing final batch on shutdown");
                    upstream.post_batch(&buffer).await;
                }
                return;
            }

            maybe_message = queue.receive() => {
                let Some(message) = maybe_message else {
                    // Queue closed and drained from elsewhere; treat like shutdown.
                    if !buffer.is_empty() {
                        upstream.post_batch(&buffer).await;
                    }
                    return;
                };
                buffer.push(message);

                let mut metrics = probe.sample().await;
                metrics.queue_load = queue_load(&queue, &config);
                let params = batch::compute(&metrics, &config);

                deadline.as_mut().reset(Instant::now() + params.flush_interval);

                if buffer.len() >= params.batch_size {
                    debug!(count = buffer.len(), "flushing batch on size trigger");
                    upstream.post_batch(&buffer).await;
                    buffer.clear();
                }
            }

            _ = &mut deadline => {
                let mut metrics = probe.sample().await;
                metrics.queue_load = queue_load(&queue, &config);
                let params = batch::compute(&metrics, &config);

                if !buffer.is_empty() {
                    debug!(count = buffer.len(), "flushing batch on timer trigger");
                    upstream.post_batch(&buffer).await;
                    buffer.clear();
                }
                deadline.as_mut().reset(Instant::now() + params.flush_interval);
            }
        }
    }
}

fn queue_load(queue: &MessageQueue, config: &Config) -> f64 {
    if config.max_queue_size == 0 {
        return 0.0;
    }
    (queue.depth() as f64 / config.max_queue_size as f64 * 100.0).min(100.0)
}
