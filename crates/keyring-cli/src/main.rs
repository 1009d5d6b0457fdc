//! Keyring session binary.
//!
//! # Usage
//!
//! ```bash
//! # Built-in key set, front door and garage in range
//! keyring --nearby lock-front,lock-garage
//!
//! # Own key set, front door refuses the first command
//! keyring --keys keys.json --nearby lock-front --fail lock-front=unauthorized
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use keyring_cli::{SessionConfig, load_keys, parse_failure};
use keyring_core::CommandResultCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Nearby-lock keyring session
#[derive(Parser, Debug)]
#[command(name = "keyring")]
#[command(about = "Run a scripted keyring session against simulated locks")]
#[command(version)]
struct Args {
    /// Key set (JSON array of keys). Uses the built-in set if omitted
    #[arg(short, long)]
    keys: Option<PathBuf>,

    /// Signed-in user
    #[arg(short, long, default_value = "demo")]
    user: String,

    /// Lock ids in range, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "lock-front,lock-garage")]
    nearby: Vec<String>,

    /// Locks to trigger, comma separated. Triggers every nearby lock if omitted
    #[arg(short, long, value_delimiter = ',')]
    trigger: Vec<String>,

    /// Result of a lock's first command, as <lock-id>=<result-code>
    #[arg(long = "fail", value_parser = parse_failure)]
    failures: Vec<(String, CommandResultCode)>,

    /// Simulated BLE latency per command in milliseconds
    #[arg(long, default_value = "300")]
    latency_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let keys = load_keys(args.keys.as_deref())?;
    tracing::info!(keys = keys.len(), source = ?args.keys, "key set loaded");

    let config = SessionConfig {
        user: args.user,
        keys,
        nearby: args.nearby,
        failures: args.failures,
        latency: Duration::from_millis(args.latency_ms),
        triggers: args.trigger,
        ..SessionConfig::default()
    };

    let report = keyring_cli::run(config).await?;
    tracing::info!(
        commands = report.commands_sent,
        notifications = report.notifications.len(),
        "done"
    );

    Ok(())
}
