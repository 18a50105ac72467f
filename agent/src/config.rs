//! Configuration loading: defaults, environment variables, then explicit
//! overrides (typically parsed from the command line by the CLI crate).
use std::time::Duration;

use crate::Error;

const DEFAULT_APP_URL: &str = "https://app.tendrl.com/api";

#[cfg(unix)]
const DEFAULT_SOCKET_PATH: &str = "/var/lib/tendrl/tendrl_agent.sock";
#[cfg(windows)]
const DEFAULT_SOCKET_PATH: &str = r"C:\ProgramData\tendrl\tendrl_agent.sock";

/// Process-wide, read-only configuration. Built once at startup via
/// [`Config::load`] and shared behind an `Arc` thereafter.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Bearer credential sent on every upstream request.
    pub api_key: String,
    /// Base URL of the upstream ingest API, no trailing slash.
    pub app_url: String,
    /// Path of the local stream socket to bind.
    pub socket_path: String,
    /// Default flush interval used before the first batch-controller tick.
    pub flush_interval_default: Duration,
    /// Lower bound on the computed batch size.
    pub min_batch_size: usize,
    /// Upper bound on the computed batch size.
    pub max_batch_size: usize,
    /// Capacity of the bounded message queue.
    pub max_queue_size: usize,
    /// Target CPU utilisation percentage used by the batch controller.
    pub target_cpu_percent: f64,
    /// Target memory utilisation percentage used by the batch controller.
    pub target_mem_percent: f64,
    /// Lower bound on the computed flush interval.
    pub min_batch_interval: Duration,
    /// Upper bound on the computed flush interval.
    pub max_batch_interval: Duration,
    /// Reserved for future queue-driven scaling; accepted and stored but
    /// intentionally unread by [`crate::batch::compute`] today (see
    /// DESIGN.md for the open-question rationale).
    pub scale_factor: f64,
    /// Default `tracing` verbosity when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: String::new(),
            app_url: DEFAULT_APP_URL.to_string(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            flush_interval_default: Duration::from_millis(250),
            min_batch_size: 10,
            max_batch_size: 200,
            max_queue_size: 1000,
            target_cpu_percent: 70.0,
            target_mem_percent: 80.0,
            min_batch_interval: Duration::from_millis(100),
            max_batch_interval: Duration::from_secs(1),
            scale_factor: 0.5,
            log_level: "info".to_string(),
        }
    }
}

/// Explicit overrides, one field per recognized CLI flag. `None` means "not
/// provided on the command line" and falls through to the environment or
/// the default. Populated by the CLI crate's `clap` parser; kept free of
/// any CLI-parsing dependency here so the loader stays a pure merge step.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    /// `--api-key`
    pub api_key: Option<String>,
    /// `--app-url`
    pub app_url: Option<String>,
    /// `--socket-path`
    pub socket_path: Option<String>,
    /// `--flush-interval`
    pub flush_interval: Option<Duration>,
    /// `--min-batch-size`
    pub min_batch_size: Option<usize>,
    /// `--max-batch-size`
    pub max_batch_size: Option<usize>,
    /// `--scale-factor`
    pub scale_factor: Option<f64>,
    /// `--max-queue`
    pub max_queue_size: Option<usize>,
    /// `--target-cpu`
    pub target_cpu_percent: Option<f64>,
    /// `--target-mem`
    pub target_mem_percent: Option<f64>,
    /// `--min-interval`
    pub min_batch_interval: Option<Duration>,
    /// `--max-interval`
    pub max_batch_interval: Option<Duration>,
    /// `--log-level`
    pub log_level: Option<String>,
}

/// Reads the environment variables this agent recognizes, at merge time
/// (not at process start), so tests can inject a fake environment reader.
pub trait EnvSource {
    /// Looks up a single environment variable by name.
    fn get(&self, key: &str) -> Option<String>;
}

/// [`EnvSource`] backed by `std::env`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Config {
    /// Merges defaults, then environment variables, then `overrides`, and
    /// validates the result. Fails if no `api_key` is available from any
    /// source.
    pub fn load(overrides: Overrides, env: &impl EnvSource) -> Result<Config, Error> {
        let mut config = Config::default();

        if let Some(v) = env.get("TENDRL_APP_URL") {
            config.app_url = v;
        }
        if let Some(v) = env.get("TENDRL_SOCKET_PATH") {
            config.socket_path = v;
        }
        if let Some(v) = env.get("TENDRL_KEY") {
            config.api_key = v;
        }

        if let Some(v) = overrides.app_url {
            config.app_url = v;
        }
        if let Some(v) = overrides.socket_path {
            config.socket_path = v;
        }
        if let Some(v) = overrides.api_key {
            config.api_key = v;
        }
        if let Some(v) = overrides.flush_interval {
            config.flush_interval_default = v;
        }
        if let Some(v) = overrides.min_batch_size {
            config.min_batch_size = v;
        }
        if let Some(v) = overrides.max_batch_size {
            config.max_batch_size = v;
        }
        if let Some(v) = overrides.scale_factor {
            config.scale_factor = v;
        }
        if let Some(v) = overrides.max_queue_size {
            config.max_queue_size = v;
        }
        if let Some(v) = overrides.target_cpu_percent {
            config.target_cpu_percent = v;
        }
        if let Some(v) = overrides.target_mem_percent {
            config.target_mem_percent = v;
        }
        if let Some(v) = overrides.min_batch_interval {
            config.min_batch_interval = v;
        }
        if let Some(v) = overrides.max_batch_interval {
            config.max_batch_interval = v;
        }
        if let Some(v) = overrides.log_level {
            config.log_level = v;
        }

        if config.api_key.is_empty() {
            return Err(Error::Configuration(
                "no api_key provided via --api-key or TENDRL_KEY".into(),
            ));
        }

        Ok(config)
    }
}
