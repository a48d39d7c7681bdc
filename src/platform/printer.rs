use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::PrintingConfig;
use crate::error::PrintError;

/// Options of one print submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub copies: u32,
    pub destination: Option<String>,
}

impl From<&PrintingConfig> for PrintJob {
    fn from(cfg: &PrintingConfig) -> Self {
        Self {
            copies: cfg.copies,
            destination: cfg.destination.clone(),
        }
    }
}

#[async_trait]
pub trait Printer: Send + Sync {
    async fn print(&self, path: &Path, job: &PrintJob) -> Result<(), PrintError>;
}

/// Submits files to the CUPS spooler through `lp`.
#[derive(Debug, Clone)]
pub struct LpPrinter {
    program: OsString,
}

impl Default for LpPrinter {
    fn default() -> Self {
        Self::with_program("lp")
    }
}

impl LpPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses another `lp`-compatible executable.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn arguments(path: &Path, job: &PrintJob) -> Vec<OsString> {
        let mut args = Vec::new();
        if job.copies > 1 {
            args.push("-n".into());
            args.push(job.copies.to_string().into());
        }
        if let Some(destination) = &job.destination {
            args.push("-d".into());
            args.push(destination.into());
        }
        args.push(path.into());
        args
    }
}

#[async_trait]
impl Printer for LpPrinter {
    async fn print(&self, path: &Path, job: &PrintJob) -> Result<(), PrintError> {
        if !cfg!(unix) {
            return Err(PrintError::Unsupported(std::env::consts::OS));
        }
        let status = Command::new(&self.program)
            .args(Self::arguments(path, job))
            .status()
            .await
            .map_err(|source| PrintError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;
        if !status.success() {
            return Err(PrintError::Status {
                path: path.to_path_buf(),
                code: status.code().unwrap_or(-1),
            });
        }
        info!(path = %path.display(), copies = job.copies, "print job submitted");
        Ok(())
    }
}
