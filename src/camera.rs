use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Local;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{CameraDriverConfig, CommandDriverConfig};
use crate::error::HardwareError;

/// A frame exposed by the camera but not yet transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Driver-provided file name; the transferred file keeps it.
    pub name: String,
    /// Where the driver keeps the frame until it is fetched.
    pub location: PathBuf,
}

/// Native camera capability. Implementations hold the device handle between
/// `open` and `close`.
#[async_trait]
pub trait CameraDriver: Send {
    async fn open(&mut self) -> Result<(), HardwareError>;
    async fn expose(&mut self) -> Result<Frame, HardwareError>;
    async fn fetch(&mut self, frame: &Frame, dest: &Path) -> Result<PathBuf, HardwareError>;
    async fn close(&mut self);
}

pub fn driver_from_config(cfg: &CameraDriverConfig) -> Box<dyn CameraDriver> {
    match cfg {
        CameraDriverConfig::Command(cmd) => Box::new(CommandCameraDriver::new(cmd.clone())),
        CameraDriverConfig::Simulated { source_directory } => {
            Box::new(SimulatedCameraDriver::new(source_directory.clone()))
        }
    }
}

/// Lifecycle of the single camera handle: acquire, expose and transfer
/// frames, release.
pub struct CameraSession {
    driver: Box<dyn CameraDriver>,
    output_directory: PathBuf,
    directory: Option<PathBuf>,
    acquired: bool,
}

impl CameraSession {
    pub fn new(driver: Box<dyn CameraDriver>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            output_directory: output_directory.into(),
            directory: None,
            acquired: false,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Directory receiving the transfers of the current acquisition.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub async fn acquire(&mut self) -> Result<(), HardwareError> {
        if self.acquired {
            return Ok(());
        }
        let directory = self.create_session_directory().await?;
        self.driver.open().await?;
        info!(directory = %directory.display(), "camera acquired");
        self.directory = Some(directory);
        self.acquired = true;
        Ok(())
    }

    pub async fn expose(&mut self) -> Result<Frame, HardwareError> {
        if !self.acquired {
            return Err(HardwareError::NotAcquired);
        }
        let frame = self.driver.expose().await?;
        debug!(frame = %frame.name, "exposed");
        Ok(frame)
    }

    pub async fn transfer(&mut self, frame: &Frame) -> Result<PathBuf, HardwareError> {
        let Some(directory) = self.directory.as_deref().filter(|_| self.acquired) else {
            return Err(HardwareError::NotAcquired);
        };
        let path = self.driver.fetch(frame, directory).await?;
        debug!(path = %path.display(), "transferred");
        Ok(path)
    }

    pub async fn release(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;
        self.driver.close().await;
        info!("camera released");
    }

    /// Creates a fresh directory named after the local time. Sessions started
    /// within the same second get a `-2`, `-3`, ... suffix.
    async fn create_session_directory(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.output_directory).await?;
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut candidate = self.output_directory.join(&stamp);
        let mut suffix = 1;
        loop {
            match fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    suffix += 1;
                    candidate = self.output_directory.join(format!("{stamp}-{suffix}"));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;
        let mut driver = std::mem::replace(&mut self.driver, Box::new(Released));
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("camera session dropped while acquired; closing the camera in the background");
                handle.spawn(async move { driver.close().await });
            }
            Err(_) => warn!("camera session dropped outside a runtime; camera left open"),
        }
    }
}

/// Stands in for the driver once a dropped session handed it off for closing.
struct Released;

#[async_trait]
impl CameraDriver for Released {
    async fn open(&mut self) -> Result<(), HardwareError> {
        Err(HardwareError::NotAcquired)
    }

    async fn expose(&mut self) -> Result<Frame, HardwareError> {
        Err(HardwareError::NotAcquired)
    }

    async fn fetch(&mut self, _frame: &Frame, _dest: &Path) -> Result<PathBuf, HardwareError> {
        Err(HardwareError::NotAcquired)
    }

    async fn close(&mut self) {}
}

/// Drives an external capture tool through shell commands. The newest file
/// the capture command leaves in the staging directory is the frame.
#[derive(Debug)]
pub struct CommandCameraDriver {
    cfg: CommandDriverConfig,
}

impl CommandCameraDriver {
    pub fn new(cfg: CommandDriverConfig) -> Self {
        Self { cfg }
    }

    fn expand(&self, command: &str) -> String {
        command.replace("{dir}", &self.cfg.staging_directory.to_string_lossy())
    }
}

#[async_trait]
impl CameraDriver for CommandCameraDriver {
    async fn open(&mut self) -> Result<(), HardwareError> {
        fs::create_dir_all(&self.cfg.staging_directory).await?;
        if let Some(command) = self.cfg.open_command.as_deref() {
            run_command(&self.expand(command))
                .await
                .map_err(HardwareError::Init)?;
        }
        Ok(())
    }

    async fn expose(&mut self) -> Result<Frame, HardwareError> {
        let staging = &self.cfg.staging_directory;
        let before = list_files(staging).await?;
        run_command(&self.expand(&self.cfg.capture_command))
            .await
            .map_err(HardwareError::Expose)?;

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for path in list_files(staging).await?.difference(&before) {
            let modified = fs::metadata(path).await?.modified()?;
            if newest.as_ref().is_none_or(|(seen, _)| modified > *seen) {
                newest = Some((modified, path.clone()));
            }
        }
        let (_, location) = newest.ok_or_else(|| {
            HardwareError::Expose(format!(
                "capture command left no new file in {}",
                staging.display()
            ))
        })?;
        let name = file_name(&location)?;
        Ok(Frame { name, location })
    }

    async fn fetch(&mut self, frame: &Frame, dest: &Path) -> Result<PathBuf, HardwareError> {
        let target = dest.join(&frame.name);
        if fs::rename(&frame.location, &target).await.is_err() {
            // staging may live on another filesystem
            fs::copy(&frame.location, &target)
                .await
                .map_err(|err| transfer_error(frame, err))?;
            fs::remove_file(&frame.location)
                .await
                .map_err(|err| transfer_error(frame, err))?;
        }
        Ok(target)
    }

    async fn close(&mut self) {
        if let Some(command) = self.cfg.close_command.as_deref() {
            if let Err(err) = run_command(&self.expand(command)).await {
                warn!("camera close command failed: {err}");
            }
        }
    }
}

/// Replays sample images from a directory as exposures.
#[derive(Debug)]
pub struct SimulatedCameraDriver {
    source_directory: PathBuf,
    samples: Vec<PathBuf>,
    exposures: usize,
}

impl SimulatedCameraDriver {
    pub fn new(source_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_directory: source_directory.into(),
            samples: Vec::new(),
            exposures: 0,
        }
    }
}

#[async_trait]
impl CameraDriver for SimulatedCameraDriver {
    async fn open(&mut self) -> Result<(), HardwareError> {
        let mut samples: Vec<PathBuf> = list_files(&self.source_directory)
            .await
            .map_err(|err| {
                HardwareError::Init(format!(
                    "cannot read {}: {err}",
                    self.source_directory.display()
                ))
            })?
            .into_iter()
            .filter(|path| image::ImageFormat::from_path(path).is_ok())
            .collect();
        samples.sort();
        if samples.is_empty() {
            return Err(HardwareError::Init(format!(
                "no sample images in {}",
                self.source_directory.display()
            )));
        }
        self.samples = samples;
        Ok(())
    }

    async fn expose(&mut self) -> Result<Frame, HardwareError> {
        if self.samples.is_empty() {
            return Err(HardwareError::NotAcquired);
        }
        let location = self.samples[self.exposures % self.samples.len()].clone();
        self.exposures += 1;
        let name = format!("{:04}_{}", self.exposures, file_name(&location)?);
        Ok(Frame { name, location })
    }

    async fn fetch(&mut self, frame: &Frame, dest: &Path) -> Result<PathBuf, HardwareError> {
        let target = dest.join(&frame.name);
        fs::copy(&frame.location, &target)
            .await
            .map_err(|err| transfer_error(frame, err))?;
        Ok(target)
    }

    async fn close(&mut self) {
        self.samples.clear();
    }
}

async fn run_command(command: &str) -> Result<(), String> {
    debug!(command, "running camera command");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|err| format!("failed to spawn '{command}': {err}"))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "'{command}' exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

async fn list_files(dir: &Path) -> io::Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.insert(entry.path());
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> Result<String, HardwareError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| HardwareError::Expose(format!("{} has no file name", path.display())))
}

fn transfer_error(frame: &Frame, err: io::Error) -> HardwareError {
    HardwareError::Transfer {
        name: frame.name.clone(),
        reason: err.to_string(),
    }
}
