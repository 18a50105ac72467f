//! Crate-level integration test: drives the Ingress Listener and Egress
//! Worker together, end to end, over a real temp Unix socket, against a
//! stub HTTP server standing in for the upstream ingest API.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tendrl_agent::config::Config;
use tendrl_agent::queue::MessageQueue;
use tendrl_agent::{dirs, egress, ingress};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixStream};

/// A loopback HTTP stub that answers every request on a path present in
/// `routes` with the configured status/body, and records the request body
/// it received under that path for later assertions. Request parsing is
/// deliberately minimal: read the headers to find `Content-Length`, then
/// read exactly that many body bytes.
async fn spawn_stub(
    routes: HashMap<&'static str, (&'static str, &'static str)>,
) -> (String, Arc<Mutex<HashMap<String, Vec<u8>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));

    let received_for_task = received.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let routes = routes.clone();
            let received = received_for_task.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    return;
                }
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    if line == "\r\n" || line == "\n" {
                        break;
                    }
                    if let Some(rest) = line
                        .to_ascii_lowercase()
                        .strip_prefix("content-length:")
                    {
                        content_length = rest.trim().parse().unwrap_or(0);
                    }
                }

                let mut body = vec![0u8; content_length];
                if content_length > 0 {
                    reader.read_exact(&mut body).await.unwrap();
                }
                received.lock().unwrap().insert(path.clone(), body);

                let (status_line, resp_body) = routes
                    .get(path.as_str())
                    .copied()
                    .unwrap_or(("HTTP/1.1 404 Not Found", r#"{"error":"no route"}"#));
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{resp_body}",
                    resp_body.len()
                );
                write_half.write_all(response.as_bytes()).await.unwrap();
                write_half.shutdown().await.unwrap();
            });
        }
    });

    (format!("http://{addr}"), received)
}

fn temp_socket_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("tendrl-integration-{name}-{}.sock", std::process::id()))
        .to_str()
        .unwrap()
        .to_string()
}

/// Polls `path` until it exists (the ingress listener binds it asynchronously
/// after the pipeline is spawned) or panics after a generous timeout.
async fn wait_for_socket(path: &str) {
    for _ in 0..200 {
        if std::path::Path::new(path).exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("socket {path} was never created");
}

#[tokio::test]
async fn fire_and_forget_publish_flows_through_to_a_batch_post() {
    let mut routes = HashMap::new();
    routes.insert("/messages", ("HTTP/1.1 201 Created", "{}"));
    let (app_url, received) = spawn_stub(routes).await;

    let socket_path = temp_socket_path("publish");
    let _ = std::fs::remove_file(&socket_path);
    dirs::ensure_dirs(&socket_path).unwrap();

    let config = Arc::new(Config {
        api_key: "secret".into(),
        app_url,
        socket_path: socket_path.clone(),
        min_batch_size: 1,
        max_batch_size: 1,
        max_queue_size: 10,
        ..Config::default()
    });

    let upstream = tendrl_agent::client::UpstreamClient::new(config.app_url.clone(), config.api_key.clone()).unwrap();
    let queue = Arc::new(MessageQueue::new(config.max_queue_size));
    let probe: Arc<dyn tendrl_agent::metrics::MetricsProbe> =
        Arc::new(tendrl_agent::metrics::HostMetricsProbe::new());

    let (egress_shutdown_tx, egress_shutdown_rx) = tokio::sync::oneshot::channel();
    let (ingress_shutdown_tx, ingress_shutdown_rx) = tokio::sync::watch::channel(false);

    let egress_handle = tokio::spawn(egress::run(
        queue.clone(),
        probe,
        upstream.clone(),
        config.clone(),
        egress_shutdown_rx,
    ));
    let ingress_handle = tokio::spawn(ingress::run(
        config.clone(),
        queue.clone(),
        upstream,
        ingress_shutdown_rx,
    ));

    wait_for_socket(&socket_path).await;

    let mut client = UnixStream::connect(&socket_path).await.unwrap();
    client
        .write_all(br#"{"msg_type":"publish","data":"hello-world"}"#)
        .await
        .unwrap();

    // Fire-and-forget publishes never reply; give the batch a moment to
    // land at the stub before tearing the pipeline down.
    for _ in 0..200 {
        if received.lock().unwrap().contains_key("/messages") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let _ = ingress_shutdown_tx.send(true);
    let _ = egress_shutdown_tx.send(());
    ingress_handle.await.unwrap().unwrap();
    egress_handle.await.unwrap();

    let body = received
        .lock()
        .unwrap()
        .remove("/messages")
        .expect("batch POST never reached the stub upstream");
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed[0]["data"], "hello-world");

    let _ = std::fs::remove_file(&socket_path);
}

#[tokio::test]
async fn synchronous_publish_returns_the_upstream_body_on_the_same_connection() {
    let mut routes = HashMap::new();
    routes.insert("/entities/message", ("HTTP/1.1 200 OK", r#"{"ack":"stored"}"#));
    let (app_url, _received) = spawn_stub(routes).await;

    let socket_path = temp_socket_path("sync-publish");
    let _ = std::fs::remove_file(&socket_path);
    dirs::ensure_dirs(&socket_path).unwrap();

    let config = Arc::new(Config {
        api_key: "secret".into(),
        app_url,
        socket_path: socket_path.clone(),
        ..Config::default()
    });

    let upstream = tendrl_agent::client::UpstreamClient::new(config.app_url.clone(), config.api_key.clone()).unwrap();
    let queue = Arc::new(MessageQueue::new(config.max_queue_size));
    let probe: Arc<dyn tendrl_agent::metrics::MetricsProbe> =
        Arc::new(tendrl_agent::metrics::HostMetricsProbe::new());

    let (egress_shutdown_tx, egress_shutdown_rx) = tokio::sync::oneshot::channel();
    let (ingress_shutdown_tx, ingress_shutdown_rx) = tokio::sync::watch::channel(false);

    let egress_handle = tokio::spawn(egress::run(
        queue.clone(),
        probe,
        upstream.clone(),
        config.clone(),
        egress_shutdown_rx,
    ));
    let ingress_handle = tokio::spawn(ingress::run(
        config.clone(),
        queue.clone(),
        upstream,
        ingress_shutdown_rx,
    ));

    wait_for_socket(&socket_path).await;

    let mut client = UnixStream::connect(&socket_path).await.unwrap();
    client
        .write_all(br#"{"msg_type":"publish","data":"please-wait","context":{"wait":true}}"#)
        .await
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let reply: Value = serde_json::from_slice(&buf[..n]).unwrap();
    assert_eq!(reply, serde_json::json!({"ack": "stored"}));

    let _ = ingress_shutdown_tx.send(true);
    let _ = egress_shutdown_tx.send(());
    ingress_handle.await.unwrap().unwrap();
    egress_handle.await.unwrap();

    let _ = std::fs::remove_file(&socket_path);
}
