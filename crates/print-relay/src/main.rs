use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use photo_booth::config::{Configuration, RemoteConfig};
use photo_booth::platform::printer::{LpPrinter, PrintJob, Printer};

#[derive(Debug, Parser)]
#[command(
    name = "print-relay",
    about = "Prints photo booth montages fetched from the booth over ssh"
)]
struct Args {
    /// YAML config files; later files override earlier ones
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: Vec<PathBuf>,
    /// Run a single fetch-and-print round and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = Configuration::from_yaml_files(&args.config)
        .context("failed to load configuration")?
        .validated()
        .context("invalid configuration values")?;
    let Some(remote) = cfg.remote.clone() else {
        bail!("the print relay needs a `remote` configuration section");
    };

    let relay = Relay {
        remote,
        job: PrintJob::from(&cfg.printing),
        printer: Box::new(LpPrinter::new()),
    };
    relay.prepare().await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; shutting down");
                cancel.cancel();
            }
        });
    }

    info!("ready to print pictures");
    loop {
        if let Err(err) = relay.round().await {
            warn!("print round failed: {err:#}");
        }
        if args.once {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(relay.remote.delay) => {}
        }
    }
    Ok(())
}

struct Relay {
    remote: RemoteConfig,
    job: PrintJob,
    printer: Box<dyn Printer>,
}

impl Relay {
    async fn prepare(&self) -> Result<()> {
        for dir in [
            &self.remote.local_fetch_directory,
            &self.remote.local_printed_directory,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        info!("creating remote printed directory");
        run("ssh", self.remote_mkdir_args()).await
    }

    async fn round(&self) -> Result<()> {
        debug!("fetching processed files");
        run("rsync", self.rsync_args()).await?;
        let printed = self.print_fetched().await?;
        if !printed.is_empty() {
            info!(count = printed.len(), "moving remote files");
            run("ssh", self.remote_move_args(&printed)).await?;
        }
        Ok(())
    }

    /// Prints every fetched file and moves it to the printed directory.
    /// Returns the names of the handled files.
    async fn print_fetched(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.remote.local_fetch_directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut handled = Vec::with_capacity(files.len());
        for file in files {
            let Some(name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            info!(path = %file.display(), "printing");
            if let Err(err) = self.printer.print(&file, &self.job).await {
                warn!("failed to print {}: {err}", file.display());
            }
            move_file(&file, &self.remote.local_printed_directory.join(&name)).await?;
            handled.push(name);
        }
        Ok(handled)
    }

    fn rsync_args(&self) -> Vec<OsString> {
        let source = format!(
            "{}:{}/",
            self.remote.connection(),
            self.remote.remote_output_directory.display()
        );
        let target = format!("{}/", self.remote.local_fetch_directory.display());
        vec!["-av".into(), "--delete".into(), source.into(), target.into()]
    }

    fn remote_mkdir_args(&self) -> Vec<OsString> {
        vec![
            self.remote.connection().into(),
            "mkdir".into(),
            "-p".into(),
            self.remote.remote_printed_directory.clone().into(),
        ]
    }

    fn remote_move_args(&self, names: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![self.remote.connection().into(), "mv".into()];
        args.extend(
            names
                .iter()
                .map(|name| self.remote.remote_output_directory.join(name).into()),
        );
        args.push(self.remote.remote_printed_directory.clone().into());
        args
    }
}

async fn run(program: &str, args: Vec<OsString>) -> Result<()> {
    let status = Command::new(program)
        .args(&args)
        .status()
        .await
        .with_context(|| format!("failed to spawn {program}"))?;
    if !status.success() {
        bail!("{program} {:?} exited with {status}", args);
    }
    Ok(())
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    tokio::fs::remove_file(from)
        .await
        .with_context(|| format!("failed to remove {}", from.display()))
}
