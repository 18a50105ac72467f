//! Ingress Listener: binds the local stream socket and spawns a concurrent
//! handler per accepted connection.
pub mod connection;

use std::sync::Arc;

use tokio::net::UnixListener;
use tracing::{debug, error, info};

use crate::client::UpstreamClient;
use crate::config::Config;
use crate::queue::MessageQueue;
use crate::Error;

/// Binds `config.socket_path`, removing any stale entry first, and accepts
/// connections until `shutdown` fires. Each accepted connection is handed
/// to [`connection::handle`] on its own task.
pub async fn run(
    config: Arc<Config>,
    queue: Arc<MessageQueue>,
    upstream: UpstreamClient,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Error> {
    remove_stale_socket(&config.socket_path)?;

    let listener = UnixListener::bind(&config.socket_path)?;
    info!(path = %config.socket_path, "ingress listener bound");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!("ingress listener shutting down, no longer accepting connections");
                return Ok(());
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let queue = queue.clone();
                        let upstream = upstream.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = connection::handle(stream, queue, upstream, shutdown).await {
                                debug!(error = %e, "connection handler exited with error");
                            }
                        });
                    }
                    Err(e) => {
                        if *shutdown.borrow() {
                            // Shutdown in progress: accept errors here are expected
                            // (listener being torn down) and not worth logging.
                            return Ok(());
                        }
                        error!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

fn remove_stale_socket(path: &str) -> Result<(), Error> {
    let path = std::path::Path::new(path);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Windows-only structural preflight: bind-and-close a throwaway local
/// stream socket to confirm AF_UNIX support (Windows 10 1803+) before
/// attempting the real bind.
#[cfg(windows)]
pub fn is_supported() -> bool {
    use std::os::windows::net::UnixListener;

    let probe_path = std::env::temp_dir().join(format!("tendrl-probe-{}.sock", std::process::id()));
    let result = UnixListener::bind(&probe_path);
    let _ = std::fs::remove_file(&probe_path);
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_stale_socket_is_a_noop_when_absent() {
        let path = std::env::temp_dir().join("tendrl-test-does-not-exist.sock");
        let _ = std::fs::remove_file(&path);
        assert!(remove_stale_socket(path.to_str().unwrap()).is_ok());
    }

    #[test]
    fn remove_stale_socket_removes_an_existing_file() {
        let path = std::env::temp_dir().join(format!("tendrl-test-stale-{}.sock", std::process::id()));
        std::fs::write(&path, b"stale").unwrap();
        assert!(path.exists());
        remove_stale_socket(path.to_str().unwrap()).unwrap();
        assert!(!path.exists());
    }
}
