use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use led_commander::{application::Application, cli::Cli, config::ConfigManager};

fn init_log(level: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "led-commanderd".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/led-commanderd.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    #[cfg(feature = "tokio-console")]
    console_subscriber::init();

    let config_manager = ConfigManager::load(cli.config.clone()).await?;
    cli.apply_overrides(&config_manager).await;
    info!(
        "led-commanderd {} starting, config: {}",
        env!("CARGO_PKG_VERSION"),
        config_manager.path().display()
    );

    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?
        .run()
        .await
}

// Daemonize before the runtime exists.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(cli.log_level())?;

    if cli.daemonize {
        into_daemon()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(run(cli)).inspect_err(|e| error!("{e:#}"))
}
