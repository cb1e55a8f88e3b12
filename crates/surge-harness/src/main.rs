//! # Surge CLI
//!
//! Command-line interface for running phased load tests against HTTP services.
//!
//! ## Usage
//!
//! ```bash
//! # Default run
//! surge --host 127.0.0.1 --port 8093
//!
//! # From a config file, overriding the peak phase
//! surge --config surge.toml --peak-batches 50 --peak-users 200
//!
//! # Write reports
//! surge --output report.json --metrics-output surge.prom
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use surge_harness::selector::parse_endpoint_spec;
use surge_harness::{ConsoleReporter, HarnessConfig, LoadRunner, Phase, Shutdown};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "surge")]
#[command(version)]
#[command(about = "Phased load and health validation harness for HTTP services", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SURGE_CONFIG")]
    config: Option<PathBuf>,

    /// Target host
    #[arg(long, env = "SURGE_HOST")]
    host: Option<String>,

    /// Target port
    #[arg(short, long, env = "SURGE_PORT")]
    port: Option<u16>,

    /// Endpoint path, optionally weighted as /path@weight (repeatable)
    #[arg(short, long = "endpoint", env = "SURGE_ENDPOINTS", value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Global request budget
    #[arg(short = 'n', long, env = "SURGE_MAX_REQUESTS")]
    max_requests: Option<u64>,

    /// Pass threshold in percent
    #[arg(short, long, env = "SURGE_THRESHOLD")]
    threshold: Option<f64>,

    /// Fail when p99 latency exceeds this many milliseconds
    #[arg(long, env = "SURGE_MAX_P99_MS")]
    max_p99_ms: Option<u64>,

    /// Seed for endpoint selection
    #[arg(long, env = "SURGE_SEED")]
    seed: Option<u64>,

    #[command(flatten)]
    ramp_up: RampUpArgs,

    #[command(flatten)]
    peak: PeakArgs,

    #[command(flatten)]
    sustained: SustainedArgs,

    /// Request timeout in milliseconds, applied to every phase
    #[arg(long, env = "SURGE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Write the JSON run report here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write Prometheus text metrics here
    #[arg(long)]
    metrics_output: Option<PathBuf>,

    /// Suppress per-batch progress lines
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

/// Overrides for one phase
#[derive(Debug, Default, Clone)]
struct PhaseArgs {
    batches: Option<u32>,
    users: Option<usize>,
    iterations: Option<u32>,
    delay_ms: Option<u64>,
}

impl PhaseArgs {
    fn apply(&self, phase: &mut Phase) {
        if let Some(v) = self.batches {
            phase.batches = v;
        }
        if let Some(v) = self.users {
            phase.users_per_batch = v;
        }
        if let Some(v) = self.iterations {
            phase.iterations_per_user = v;
        }
        if let Some(v) = self.delay_ms {
            phase.inter_batch_delay_ms = v;
        }
    }
}

#[derive(clap::Args)]
struct RampUpArgs {
    /// Ramp-up batch count
    #[arg(long)]
    ramp_up_batches: Option<u32>,
    /// Ramp-up users per batch
    #[arg(long)]
    ramp_up_users: Option<usize>,
    /// Ramp-up iterations per user
    #[arg(long)]
    ramp_up_iterations: Option<u32>,
    /// Ramp-up delay between batches (ms)
    #[arg(long)]
    ramp_up_delay_ms: Option<u64>,
}

#[derive(clap::Args)]
struct PeakArgs {
    /// Peak batch count
    #[arg(long)]
    peak_batches: Option<u32>,
    /// Peak users per batch
    #[arg(long)]
    peak_users: Option<usize>,
    /// Peak iterations per user
    #[arg(long)]
    peak_iterations: Option<u32>,
    /// Peak delay between batches (ms)
    #[arg(long)]
    peak_delay_ms: Option<u64>,
}

#[derive(clap::Args)]
struct SustainedArgs {
    /// Sustained batch count
    #[arg(long)]
    sustained_batches: Option<u32>,
    /// Sustained users per batch
    #[arg(long)]
    sustained_users: Option<usize>,
    /// Sustained iterations per user
    #[arg(long)]
    sustained_iterations: Option<u32>,
    /// Sustained delay between batches (ms)
    #[arg(long)]
    sustained_delay_ms: Option<u64>,
}

impl From<&RampUpArgs> for PhaseArgs {
    fn from(a: &RampUpArgs) -> Self {
        Self {
            batches: a.ramp_up_batches,
            users: a.ramp_up_users,
            iterations: a.ramp_up_iterations,
            delay_ms: a.ramp_up_delay_ms,
        }
    }
}

impl From<&PeakArgs> for PhaseArgs {
    fn from(a: &PeakArgs) -> Self {
        Self {
            batches: a.peak_batches,
            users: a.peak_users,
            iterations: a.peak_iterations,
            delay_ms: a.peak_delay_ms,
        }
    }
}

impl From<&SustainedArgs> for PhaseArgs {
    fn from(a: &SustainedArgs) -> Self {
        Self {
            batches: a.sustained_batches,
            users: a.sustained_users,
            iterations: a.sustained_iterations,
            delay_ms: a.sustained_delay_ms,
        }
    }
}

fn build_config(cli: &Cli) -> surge_harness::Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if !cli.endpoints.is_empty() {
        let mut paths = Vec::with_capacity(cli.endpoints.len());
        let mut weights = Vec::with_capacity(cli.endpoints.len());
        for spec in &cli.endpoints {
            let (path, weight) = parse_endpoint_spec(spec)?;
            paths.push(path);
            weights.push(weight);
        }
        config.weights = if weights.iter().any(Option::is_some) {
            Some(weights.into_iter().map(|w| w.unwrap_or(1)).collect())
        } else {
            None
        };
        config.endpoints = paths;
    }
    if cli.max_requests.is_some() {
        config.max_requests = cli.max_requests;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if cli.max_p99_ms.is_some() {
        config.max_p99_latency_ms = cli.max_p99_ms;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    PhaseArgs::from(&cli.ramp_up).apply(&mut config.phases.ramp_up);
    PhaseArgs::from(&cli.peak).apply(&mut config.phases.peak);
    PhaseArgs::from(&cli.sustained).apply(&mut config.phases.sustained);
    if let Some(timeout_ms) = cli.timeout_ms {
        config.phases.ramp_up.timeout_ms = timeout_ms;
        config.phases.peak.timeout_ms = timeout_ms;
        config.phases.sustained.timeout_ms = timeout_ms;
    }

    if cli.output.is_some() {
        config.output.json = cli.output.clone();
    }
    if cli.metrics_output.is_some() {
        config.output.prometheus = cli.metrics_output.clone();
    }
    config.output.quiet |= cli.quiet;
    config.logging.json |= cli.log_json;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    Ok(config)
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("surge: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    init_logging(&config.logging.level, config.logging.json);
    info!("Surge load harness v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let mut runner = match LoadRunner::new(config) {
        Ok(runner) => runner.with_shutdown(shutdown.clone()),
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    if !runner.config().output.quiet {
        runner = runner.with_reporter(Arc::new(ConsoleReporter));
    }
    let output = runner.config().output.clone();

    shutdown.listen_for_ctrl_c();

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    report.print_summary();

    if let Err(e) = write_outputs(&report, &output) {
        error!("Failed to write report: {:#}", e);
    }

    std::process::exit(report.verdict.exit_code());
}

fn write_outputs(
    report: &surge_harness::RunReport,
    output: &surge_harness::config::OutputConfig,
) -> anyhow::Result<()> {
    if let Some(path) = &output.json {
        report.write_json(path)?;
        info!("Results saved to {}", path.display());
    }
    if let Some(path) = &output.prometheus {
        report.write_prometheus(path)?;
        info!("Metrics saved to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_harness::error::ConfigError;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "surge",
            "--host",
            "svc.local",
            "--port",
            "8094",
            "--endpoint",
            "/health@3",
            "--endpoint",
            "/status",
            "--peak-batches",
            "0",
            "--timeout-ms",
            "250",
            "-n",
            "100",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.host, "svc.local");
        assert_eq!(config.port, 8094);
        assert_eq!(config.endpoints, vec!["/health", "/status"]);
        assert_eq!(config.weights, Some(vec![3, 1]));
        assert_eq!(config.phases.peak.batches, 0);
        assert_eq!(config.phases.sustained.timeout_ms, 250);
        assert_eq!(config.max_requests, Some(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_endpoint_spec_is_config_error() {
        let cli = Cli::parse_from(["surge", "--endpoint", "/health@lots"]);
        let err = build_config(&cli).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(matches!(
            err,
            surge_harness::HarnessError::Config(ConfigError::InvalidEndpointSpec(_))
        ));
    }
}
