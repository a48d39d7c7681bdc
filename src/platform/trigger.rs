use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use evdev::{Device, EventStream, EventSummary, KeyCode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source of trigger signals for the waiting state.
#[async_trait]
pub trait Trigger: Send {
    /// Next registered input: `true` when the trigger is asserted. `None`
    /// once the source is closed.
    async fn next_input(&mut self) -> Option<bool>;

    /// Drops inputs registered before this call, so only a fresh press
    /// counts once the booth is ready again.
    fn discard_pending(&mut self);
}

/// Trigger fed through a channel; used for stdin and tests.
#[derive(Debug)]
pub struct ChannelTrigger {
    rx: mpsc::Receiver<bool>,
}

impl ChannelTrigger {
    pub fn new(rx: mpsc::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<bool>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl Trigger for ChannelTrigger {
    async fn next_input(&mut self) -> Option<bool> {
        self.rx.recv().await
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded stale trigger inputs");
        }
    }
}

/// Push button exposed as an evdev key, e.g. through the `gpio-keys` overlay.
pub struct EvdevTrigger {
    stream: EventStream,
    key: KeyCode,
    armed_at: SystemTime,
}

impl EvdevTrigger {
    pub fn open(device: Option<&Path>, key: &str) -> Result<Self> {
        let key = KeyCode::from_str(key).map_err(|_| anyhow::anyhow!("unknown key code: {key}"))?;
        let (device, path) = match device {
            Some(path) => {
                let device = Device::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                ensure_key(&device, path, key)?;
                (device, path.to_path_buf())
            }
            None => scan_devices(Path::new("/dev/input"), key)?,
        };
        info!(device = %path.display(), ?key, "listening for trigger events");
        let stream = device
            .into_event_stream()
            .with_context(|| format!("failed to stream events from {}", path.display()))?;
        Ok(Self {
            stream,
            key,
            armed_at: SystemTime::UNIX_EPOCH,
        })
    }
}

#[async_trait]
impl Trigger for EvdevTrigger {
    async fn next_input(&mut self) -> Option<bool> {
        loop {
            let event = match self.stream.next_event().await {
                Ok(event) => event,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("input stream error: {err}");
                    return None;
                }
            };
            if let EventSummary::Key(_, code, value) = event.destructure() {
                if code != self.key {
                    continue;
                }
                if event.timestamp() < self.armed_at {
                    debug!("ignoring key event queued before the booth was ready");
                    continue;
                }
                match value {
                    1 => return Some(true),
                    0 => return Some(false),
                    // autorepeat
                    _ => {}
                }
            }
        }
    }

    // The kernel queues events while the booth is busy; they carry their
    // own timestamps, so anything older than now is stale.
    fn discard_pending(&mut self) {
        self.armed_at = SystemTime::now();
    }
}

fn scan_devices(dir: &Path, key: KeyCode) -> Result<(Device, PathBuf)> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let path = entry?.path();
        let is_event = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with("event"));
        if !is_event {
            continue;
        }
        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                warn!(device = %path.display(), "no permission to read device");
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", path.display()));
            }
        };
        match ensure_key(&device, &path, key) {
            Ok(()) => candidates.push((device, path)),
            Err(err) => debug!(device = %path.display(), "{}", err),
        }
    }
    candidates.sort_by(|a, b| a.1.cmp(&b.1));
    match candidates.into_iter().next() {
        Some(found) => Ok(found),
        None => bail!("no input devices advertising {key:?} found"),
    }
}

fn ensure_key(device: &Device, path: &Path, key: KeyCode) -> Result<()> {
    let Some(keys) = device.supported_keys() else {
        bail!("{} does not advertise any keys", path.display());
    };
    if !keys.contains(key) {
        bail!("{} does not support {key:?}", path.display());
    }
    Ok(())
}
