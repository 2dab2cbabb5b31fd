use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

mod config;
mod fetchers;
mod monitors;
mod notifiers;
mod utils;

use config::{ConfigOverrides, MonitorConfig, PublisherKind, Renderer};
use fetchers::{chrome::ChromeFetcher, static_page::StaticFetcher, PageFetcher};
use monitors::{RegionMonitor, StopReason};
use notifiers::{
    log_only::LogPublisher, server_chan::ServerChanPublisher, webhook::WebhookPublisher, Publisher,
};

/// Exit status when monitoring ended on an unexpected error
const EXIT_FATAL: u8 = 2;

/// A tool for monitoring changes to a single region of a web page
#[derive(Parser)]
#[command(name = "region_monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor a region of the page as rendered by headless Chrome
    Rendered {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// Monitor a region of the static HTML
    Static {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize environment variables and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // If a configuration file is provided, load settings from it
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading settings from config file: {:?}", path);
            MonitorConfig::load(path)?
        }
        None => MonitorConfig::default(),
    };

    match cli.command {
        Some(Commands::Rendered { overrides }) => {
            config.renderer = Renderer::Chrome;
            config.apply(overrides);
        }
        Some(Commands::Static { overrides }) => {
            config.renderer = Renderer::Static;
            config.apply(overrides);
        }
        None if cli.config.is_some() => {}
        None => {
            // If no subcommand is specified, display help information
            println!("Please specify a monitoring command to execute. Use --help to view help information.");
            return Ok(ExitCode::SUCCESS);
        }
    }
    config.validate()?;

    run_monitor(config).await
}

async fn run_monitor(config: MonitorConfig) -> Result<ExitCode> {
    let publisher = build_publisher(&config)?;
    let fetcher = build_fetcher(&config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the monitor");
            ctrl_c.cancel();
        }
    });

    info!(
        "Start monitoring {} ({:?} renderer, selector {})",
        config.url, config.renderer, config.selector
    );
    let report = RegionMonitor::new(config, fetcher, publisher, cancel)
        .run()
        .await?;

    match report.reason {
        StopReason::Fatal(_) => {
            error!("Monitoring stopped on an unexpected error");
            Ok(ExitCode::from(EXIT_FATAL))
        }
        StopReason::MaxChangesReached | StopReason::Cancelled => Ok(ExitCode::SUCCESS),
    }
}

fn build_publisher(config: &MonitorConfig) -> Result<Box<dyn Publisher>> {
    let publisher: Box<dyn Publisher> = match config.publisher {
        PublisherKind::ServerChan => Box::new(ServerChanPublisher::from_env()?),
        PublisherKind::Webhook => Box::new(WebhookPublisher::new(Duration::from_secs(30))?),
        PublisherKind::Log => Box::new(LogPublisher),
    };
    Ok(publisher)
}

fn build_fetcher(config: &MonitorConfig) -> Result<Box<dyn PageFetcher>> {
    let fetcher: Box<dyn PageFetcher> = match config.renderer {
        Renderer::Chrome => {
            // Keep the browser alive across the pause between two checks
            let idle_timeout = config.poll_interval() * 2 + config.fetch_timeout();
            Box::new(ChromeFetcher::launch(config.chrome_path.clone(), idle_timeout)?)
        }
        Renderer::Static => Box::new(StaticFetcher::new(&config.selector)?),
    };
    Ok(fetcher)
}
