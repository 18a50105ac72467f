//! Command-line entry point for the host-local message-forwarding agent.
//!
//! Parses flags, initializes logging, merges them with the environment and
//! built-in defaults into a [`tendrl_agent::Config`], and runs the agent to
//! completion.
use clap::Parser;
use tendrl_agent::config::{Config, Overrides, ProcessEnv};
use tendrl_agent::Error;
use tracing_subscriber::EnvFilter;

/// Recognized command-line flags. Each is optional; unset flags fall
/// through to `TENDRL_*` environment variables and then to built-in
/// defaults (see [`tendrl_agent::config::Config::load`]).
#[derive(Parser, Debug)]
#[command(name = "tendrl-agent", about = "Host-local message-forwarding agent")]
struct Cli {
    /// Bearer credential sent on every upstream request. Falls back to
    /// `TENDRL_KEY` if unset; missing from both sources is a fatal error.
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL of the upstream ingest API. Falls back to `TENDRL_APP_URL`.
    #[arg(long)]
    app_url: Option<String>,

    /// Path of the local stream socket to bind. Falls back to
    /// `TENDRL_SOCKET_PATH`.
    #[arg(long)]
    socket_path: Option<String>,

    /// Default flush interval before the first batch-controller tick, e.g.
    /// `250ms`, `1s`.
    #[arg(long, value_parser = parse_duration_flag)]
    flush_interval: Option<std::time::Duration>,

    /// Lower bound on the computed batch size.
    #[arg(long)]
    min_batch_size: Option<usize>,

    /// Upper bound on the computed batch size.
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Reserved for future queue-driven scaling.
    #[arg(long)]
    scale_factor: Option<f64>,

    /// Capacity of the bounded message queue.
    #[arg(long)]
    max_queue: Option<usize>,

    /// Target CPU utilisation percentage used by the batch controller.
    #[arg(long)]
    target_cpu: Option<f64>,

    /// Target memory utilisation percentage used by the batch controller.
    #[arg(long)]
    target_mem: Option<f64>,

    /// Lower bound on the computed flush interval, e.g. `100ms`.
    #[arg(long, value_parser = parse_duration_flag)]
    min_interval: Option<std::time::Duration>,

    /// Upper bound on the computed flush interval, e.g. `1s`.
    #[arg(long, value_parser = parse_duration_flag)]
    max_interval: Option<std::time::Duration>,

    /// Default `tracing` verbosity when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_duration_flag(raw: &str) -> Result<std::time::Duration, String> {
    parse_duration::parse(raw).map_err(|e| e.to_string())
}

impl From<Cli> for Overrides {
    fn from(cli: Cli) -> Self {
        Overrides {
            api_key: cli.api_key,
            app_url: cli.app_url,
            socket_path: cli.socket_path,
            flush_interval: cli.flush_interval,
            min_batch_size: cli.min_batch_size,
            max_batch_size: cli.max_batch_size,
            scale_factor: cli.scale_factor,
            max_queue_size: cli.max_queue,
            target_cpu_percent: cli.target_cpu,
            target_mem_percent: cli.target_mem,
            min_batch_interval: cli.min_interval,
            max_batch_interval: cli.max_interval,
            log_level: cli.log_level,
        }
    }
}

/// Parses arguments, loads configuration, initializes logging, and runs the
/// agent until a shutdown signal is received.
pub async fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let overrides: Overrides = cli.into();
    let log_level = overrides.log_level.clone();

    let config = Config::load(overrides, &ProcessEnv)?;
    init_logging(log_level.as_deref().unwrap_or(&config.log_level));

    if let Err(e) = tendrl_agent::run(config).await {
        tracing::error!(error = %e, "agent exited with an error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_map_onto_config_overrides() {
        let cli = Cli {
            api_key: Some("secret".into()),
            app_url: None,
            socket_path: None,
            flush_interval: Some(std::time::Duration::from_millis(500)),
            min_batch_size: Some(5),
            max_batch_size: Some(50),
            scale_factor: None,
            max_queue: Some(100),
            target_cpu: None,
            target_mem: None,
            min_interval: None,
            max_interval: None,
            log_level: Some("debug".into()),
        };
        let overrides: Overrides = cli.into();
        assert_eq!(overrides.api_key.as_deref(), Some("secret"));
        assert_eq!(overrides.flush_interval, Some(std::time::Duration::from_millis(500)));
        assert_eq!(overrides.max_queue_size, Some(100));
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn parse_duration_flag_accepts_human_syntax() {
        assert_eq!(
            parse_duration_flag("250ms").unwrap(),
            std::time::Duration::from_millis(250)
        );
        assert_eq!(parse_duration_flag("1s").unwrap(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn parse_duration_flag_rejects_garbage() {
        assert!(parse_duration_flag("not-a-duration").is_err());
    }
}
