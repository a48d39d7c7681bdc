use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::IndicatorConfig;

/// On/off cadence of a blinking indicator. `count: None` blinks until the
/// next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub on: Duration,
    pub off: Duration,
    pub count: Option<u32>,
}

impl BlinkPattern {
    pub const IDLE: Self = Self {
        on: Duration::from_millis(1000),
        off: Duration::from_millis(1000),
        count: None,
    };

    pub const FAULT: Self = Self {
        on: Duration::from_millis(100),
        off: Duration::from_millis(100),
        count: Some(10),
    };

    /// Half-second blinks covering the self-timer.
    pub fn countdown(delay: Duration) -> Self {
        let seconds = delay.as_millis().div_ceil(1000).max(1);
        Self {
            on: Duration::from_millis(500),
            off: Duration::from_millis(500),
            count: Some(u32::try_from(seconds).unwrap_or(u32::MAX)),
        }
    }

    /// Time a finite pattern takes to play out.
    pub fn length(&self) -> Option<Duration> {
        self.count.map(|count| (self.on + self.off) * count)
    }
}

/// Feedback light. Commands return immediately; patterns play in the
/// background and each command replaces the previous one.
pub trait Indicator: Send {
    fn blink(&mut self, pattern: BlinkPattern);
    fn solid_on(&mut self);
    fn off(&mut self);
}

pub fn indicator_from_config(cfg: &IndicatorConfig) -> Result<Box<dyn Indicator>> {
    Ok(match cfg {
        IndicatorConfig::Log => Box::new(LogIndicator),
        IndicatorConfig::Sysfs { led } => Box::new(SysfsLed::new(led)?),
    })
}

/// Indicator for hosts without a light; records commands in the log.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn blink(&mut self, pattern: BlinkPattern) {
        info!(?pattern, "indicator blinking");
    }

    fn solid_on(&mut self) {
        info!("indicator on");
    }

    fn off(&mut self) {
        debug!("indicator off");
    }
}

/// LED exposed through the kernel LED class (`/sys/class/leds/<name>`).
#[derive(Debug)]
pub struct SysfsLed {
    brightness: PathBuf,
    max_brightness: String,
    pattern: Option<JoinHandle<()>>,
}

impl SysfsLed {
    pub fn new(led: &Path) -> Result<Self> {
        let brightness = led.join("brightness");
        let max_brightness = std::fs::read_to_string(led.join("max_brightness"))
            .map(|raw| raw.trim().to_string())
            .unwrap_or_else(|_| "1".to_string());
        write_brightness(&brightness, "0")
            .with_context(|| format!("LED at {} is not writable", led.display()))?;
        Ok(Self {
            brightness,
            max_brightness,
            pattern: None,
        })
    }

    fn stop_pattern(&mut self) {
        if let Some(handle) = self.pattern.take() {
            handle.abort();
        }
    }

    fn set(&mut self, value: &str) {
        self.stop_pattern();
        if let Err(err) = write_brightness(&self.brightness, value) {
            warn!("{err:#}");
        }
    }
}

impl Indicator for SysfsLed {
    fn blink(&mut self, pattern: BlinkPattern) {
        self.stop_pattern();
        let path = self.brightness.clone();
        let on = self.max_brightness.clone();
        self.pattern = Some(tokio::spawn(async move {
            let mut remaining = pattern.count;
            while remaining != Some(0) {
                if let Err(err) = write_brightness(&path, &on) {
                    warn!("{err:#}");
                    return;
                }
                tokio::time::sleep(pattern.on).await;
                if let Err(err) = write_brightness(&path, "0") {
                    warn!("{err:#}");
                    return;
                }
                tokio::time::sleep(pattern.off).await;
                remaining = remaining.map(|n| n - 1);
            }
        }));
    }

    fn solid_on(&mut self) {
        let on = self.max_brightness.clone();
        self.set(&on);
    }

    fn off(&mut self) {
        self.set("0");
    }
}

impl Drop for SysfsLed {
    fn drop(&mut self) {
        self.set("0");
    }
}

fn write_brightness(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value)
        .with_context(|| format!("failed to write '{}' to {}", value, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("brightness"), "1").unwrap();
        std::fs::write(dir.path().join("max_brightness"), "255\n").unwrap();
        dir
    }

    fn brightness(dir: &tempfile::TempDir) -> String {
        std::fs::read_to_string(dir.path().join("brightness")).unwrap()
    }

    #[test]
    fn countdown_covers_the_delay() {
        assert_eq!(BlinkPattern::countdown(Duration::from_secs(3)).count, Some(3));
        assert_eq!(BlinkPattern::countdown(Duration::from_millis(2500)).count, Some(3));
        assert_eq!(BlinkPattern::countdown(Duration::ZERO).count, Some(1));
        assert_eq!(BlinkPattern::FAULT.length(), Some(Duration::from_secs(2)));
        assert_eq!(BlinkPattern::IDLE.length(), None);
    }

    #[tokio::test]
    async fn sysfs_led_switches_brightness() {
        let dir = led_dir();
        let mut led = SysfsLed::new(dir.path()).unwrap();
        assert_eq!(brightness(&dir), "0");
        led.solid_on();
        assert_eq!(brightness(&dir), "255");
        led.off();
        assert_eq!(brightness(&dir), "0");
    }

    #[tokio::test(start_paused = true)]
    async fn finite_blink_ends_dark() {
        let dir = led_dir();
        let mut led = SysfsLed::new(dir.path()).unwrap();
        led.blink(BlinkPattern {
            on: Duration::from_millis(100),
            off: Duration::from_millis(100),
            count: Some(2),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(brightness(&dir), "255");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(brightness(&dir), "0");
        assert!(led.pattern.as_ref().is_some_and(JoinHandle::is_finished));
    }

    #[tokio::test(start_paused = true)]
    async fn solid_on_replaces_running_pattern() {
        let dir = led_dir();
        let mut led = SysfsLed::new(dir.path()).unwrap();
        led.blink(BlinkPattern::IDLE);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        led.solid_on();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(brightness(&dir), "255");
    }
}
