use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use photo_booth::camera::driver_from_config;
use photo_booth::config::{Configuration, TriggerConfig};
use photo_booth::platform::indicator::indicator_from_config;
use photo_booth::platform::printer::LpPrinter;
use photo_booth::platform::trigger::{ChannelTrigger, EvdevTrigger, Trigger};
use photo_booth::{Peripherals, PhotoBooth};

#[derive(Debug, Parser)]
#[command(name = "photo-booth", version, about = "Unattended photo booth controller")]
struct Args {
    /// YAML config files; later files override earlier ones
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: Vec<PathBuf>,
    /// Stop after one trigger-to-print cycle
    #[arg(long)]
    once: bool,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -v
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .compact()
        .init();

    let cfg = Configuration::from_yaml_files(&args.config)
        .context("failed to load configuration")?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("loaded configuration:\n{:#?}", cfg);

    let peripherals = Peripherals {
        camera: driver_from_config(&cfg.camera.driver),
        indicator: indicator_from_config(&cfg.indicator)?,
        printer: Box::new(LpPrinter::new()),
        trigger: trigger_from_config(&cfg.trigger)?,
    };
    let mut booth = PhotoBooth::new(&cfg, peripherals).context("invalid booth setup")?;
    tracing::info!(
        captures = booth.capture_count(),
        delay = %humantime::format_duration(cfg.camera.delay),
        "photo booth configured"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received; shutting down");
                cancel.cancel();
            }
        });
    }

    if args.once {
        match booth.run_once(cancel).await? {
            Some(cycle) => tracing::info!(?cycle, "cycle finished"),
            None => tracing::info!("stopped before a cycle completed"),
        }
    } else {
        booth.run(cancel).await?;
    }
    Ok(())
}

fn trigger_from_config(cfg: &TriggerConfig) -> Result<Box<dyn Trigger>> {
    match cfg {
        TriggerConfig::Evdev { device, key } => {
            Ok(Box::new(EvdevTrigger::open(device.as_deref(), key)?))
        }
        TriggerConfig::Stdin => {
            let (tx, trigger) = ChannelTrigger::channel(8);
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                tracing::info!("press enter to start a session");
                loop {
                    match lines.next_line().await {
                        Ok(Some(_)) => {
                            if tx.send(true).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            tracing::info!("stdin closed");
                            break;
                        }
                        Err(err) => {
                            tracing::warn!("stdin watcher failed: {err}");
                            break;
                        }
                    }
                }
            });
            Ok(Box::new(trigger))
        }
    }
}
