//! Lifecycle Supervisor: wires every component together, installs the
//! signal handler, and orchestrates startup and drain-on-shutdown.
use std::sync::Arc;

use tracing::{error, info};

use crate::client::UpstreamClient;
use crate::config::Config;
use crate::metrics::{HostMetricsProbe, MetricsProbe};
use crate::queue::MessageQueue;
use crate::{dirs, egress, ingress, Error};

/// Runs the agent to completion: provisions directories, constructs the
/// upstream client and queue, spawns the Egress Worker, then runs the
/// Ingress Listener's accept loop until an interrupt or termination signal
/// arrives. Returns once the Egress Worker has finished draining.
pub async fn run(config: Config) -> Result<(), Error> {
    let config = Arc::new(config);

    dirs::ensure_dirs(&config.socket_path)?;

    #[cfg(windows)]
    if !ingress::is_supported() {
        return Err(Error::Configuration(
            "local stream sockets are not supported on this host; Windows 10 1803 or later is required".into(),
        ));
    }

    let upstream = UpstreamClient::new(config.app_url.clone(), config.api_key.clone())?;
    let queue = Arc::new(MessageQueue::new(config.max_queue_size));
    let probe: Arc<dyn MetricsProbe> = Arc::new(HostMetricsProbe::new());

    let (egress_shutdown_tx, egress_shutdown_rx) = tokio::sync::oneshot::channel();
    let (ingress_shutdown_tx, ingress_shutdown_rx) = tokio::sync::watch::channel(false);

    let egress_handle = tokio::spawn(egress::run(
        queue.clone(),
        probe,
        upstream.clone(),
        config.clone(),
        egress_shutdown_rx,
    ));

    let ingress_result = tokio::select! {
        biased;

        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received, stopping ingress listener");
            let _ = ingress_shutdown_tx.send(true);
            Ok(())
        }

        result = ingress::run(config, queue, upstream, ingress_shutdown_rx) => {
            result
        }
    };

    let _ = egress_shutdown_tx.send(());
    if let Err(e) = egress_handle.await {
        error!(error = %e, "egress worker task panicked");
    }

    ingress_result
}

/// Waits for either SIGINT (Ctrl+C, all platforms) or SIGTERM (Unix only).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler, falling back to Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_fails_fast_when_directory_provisioning_cannot_create_its_path() {
        let mut config = Config::default();
        config.api_key = "secret".into();
        // A path through a file (not a directory) can never be created as a directory.
        let blocking_file = std::env::temp_dir().join(format!("tendrl-supervisor-test-{}", std::process::id()));
        std::fs::write(&blocking_file, b"not a directory").unwrap();
        config.socket_path = blocking_file.join("nested/tendrl_agent.sock").to_str().unwrap().to_string();

        let result = run(config).await;
        assert!(result.is_err());

        std::fs::remove_file(&blocking_file).unwrap();
    }
}
