use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use infra_monitor::{
    config::{MonitorConfig, read_config_file},
    crypto::SecretBox,
    probes::DriverSet,
    scheduler::{Monitor, load_interval},
    storage::{MonitorStore, SqliteStore, ensure_healthy},
    util,
    webhook::WebhookNotifier,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to MONITOR_CONFIG, then built-in defaults)
    #[arg(short)]
    file: Option<String>,

    /// Run a single cycle, print its report as JSON and exit
    #[arg(long)]
    once: bool,

    /// Cycle interval in seconds, overriding the stored setting
    #[arg(long)]
    interval: Option<u64>,
}

fn init(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let filter = filter::Targets::new().with_targets(vec![("infra_monitor", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = match args.file.clone().or_else(util::get_config_path) {
        Some(path) => read_config_file(&path)?,
        None => MonitorConfig::default(),
    }
    .with_env_overrides();

    init(&config.log_level);
    trace!("started with args: {args:?}");

    let store = Arc::new(SqliteStore::new(&config.database).await?);
    let health = ensure_healthy(&*store).await?;
    info!("store ready: {}", health.message);
    let cipher = Arc::new(SecretBox::load_or_create(&config.key_file)?);
    let drivers = Arc::new(DriverSet::new(&config.timeouts));
    let notifier = Arc::new(WebhookNotifier::new(config.timeouts.webhook));

    let monitor = Monitor::new(&config, store.clone(), drivers, cipher, notifier);

    if args.once {
        let report = monitor.run_cycle_now().await?;
        println!("{}", serde_json::to_string(&report)?);
        store.close().await?;
        return Ok(());
    }

    let interval = match args.interval {
        Some(seconds) => Duration::from_secs(seconds),
        None => {
            load_interval(&*store, Duration::from_secs(config.check_interval)).await
        }
    };
    monitor.start(interval).await;

    tokio::signal::ctrl_c().await?;
    info!("received interrupt, shutting down");

    monitor.shutdown().await;
    if let Err(e) = store.close().await {
        warn!("failed to close store: {e}");
    }

    Ok(())
}
