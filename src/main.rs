use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod reconcile;
mod services;

use app::App;
use config::Config;
use db::Repository;
use feed::FeedFetcher;
use services::Mailer;

/// Monitor RSS/Atom feeds and store their articles in SQLite
#[derive(Parser, Debug)]
#[command(name = "feed-monitor", version, about)]
struct Cli {
    /// TOML configuration file
    config_file: PathBuf,

    /// Logging level
    #[arg(short, long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Minutes between polling cycles [1-100], overrides the config file
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=100))]
    interval: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.filter().into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let result = run(cli).await;
    if let Err(e) = &result {
        error!("{:?}", e);
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config_file)
        .with_context(|| format!("failed to load config {}", cli.config_file.display()))?;
    let interval = config.poll_interval(cli.interval)?;
    let mailer = Mailer::new(&config.email)?;

    info!("Database: {}", config.database.path.display());
    let repository = Repository::new(&config.database.path)
        .await
        .context("failed to open database")?;
    let fetcher = FeedFetcher::new(&config.fetch)?;
    let app = App::new(Arc::new(config), repository, fetcher);

    match app.run(interval).await {
        Ok(never) => match never {},
        Err(e) => {
            let report = anyhow::Error::new(e).context("feed polling stopped");
            mailer.notify_failure(&format!("{:?}", report)).await;
            Err(report)
        }
    }
}
