use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use transcoder_core::{
    load_config, validate_config, ConfigSummary, DiscoveryJob, Reconciler, Services, TaskStatus,
    Worker,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "transcoder", version)]
#[command(about = "Converts uploaded media to widely supported formats and updates the pages embedding them")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "TRANSCODER_CONFIG", default_value = "transcoder.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Claim and convert the next eligible task (default)
    Process,
    /// Queue newly uploaded media files
    Discover,
    /// Recycle abandoned tasks and repair references of completed ones
    Reconcile,
    /// Print task counts by status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("transcoder {}", VERSION);
    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    let summary = ConfigSummary::from(&config);
    let summary_json = serde_json::to_string(&summary).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(summary_json.as_bytes()));
    info!("Configuration loaded ({})", &config_hash[..16]);

    let services = Services::open(config).context("Failed to open stores")?;

    match cli.command.unwrap_or(Command::Process) {
        Command::Process => process(services).await,
        Command::Discover => {
            let report = DiscoveryJob::new(services)
                .run()
                .await
                .context("Discovery failed")?;
            info!(report = %serde_json::to_string(&report)?, "Discovery report");
            Ok(())
        }
        Command::Reconcile => {
            let report = Reconciler::new(services)
                .run()
                .await
                .context("Reconciliation failed")?;
            info!(report = %serde_json::to_string(&report)?, "Reconciliation report");
            Ok(())
        }
        Command::Status => status(&services),
    }
}

async fn process(services: Services) -> Result<()> {
    match Worker::new(services).process_next().await {
        Ok(outcome) => {
            info!(outcome = %serde_json::to_string(&outcome)?, "Worker finished");
            Ok(())
        }
        Err(e) if e.is_task_scoped() => {
            // The task stays in progress and is recycled once stale.
            warn!("Task not finished: {}", e);
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Worker failed")),
    }
}

fn status(services: &Services) -> Result<()> {
    let mut counts = serde_json::Map::new();
    for status in TaskStatus::ALL {
        let count = services
            .tasks
            .count_by_status(status)
            .with_context(|| format!("Failed to count {} tasks", status))?;
        counts.insert(status.to_string(), count.into());
    }
    println!("{}", serde_json::Value::Object(counts));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_to_process() {
        let cli = Cli::try_parse_from(["transcoder", "--config", "/etc/t.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("/etc/t.toml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parses_subcommand_and_flags() {
        let cli = Cli::try_parse_from(["transcoder", "-v", "--log-json", "reconcile"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Reconcile)));
        assert!(cli.verbose);
        assert!(cli.log_json);
    }
}
