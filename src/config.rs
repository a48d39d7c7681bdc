use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigurationError;
use crate::processing::filters::FilterChain;
use crate::processing::montage::MontageTemplate;

/// Named parameters of a configured filter or template.
pub type Params = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    pub camera: CameraConfig,
    pub processing: ProcessingConfig,
    pub printing: PrintingConfig,
    pub indicator: IndicatorConfig,
    pub trigger: TriggerConfig,
    /// Settings for the print relay running on a separate print host.
    pub remote: Option<RemoteConfig>,
}

impl Configuration {
    /// Loads several YAML files where later files override earlier ones.
    /// Mappings are merged key by key; any other value replaces the previous
    /// one. Missing files are skipped.
    pub fn from_yaml_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        let mut loaded = 0usize;
        for path in paths {
            let path = path.as_ref();
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "config file not found; skipping");
                continue;
            }
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            merge_values(&mut merged, layer);
            loaded += 1;
        }
        if loaded == 0 {
            tracing::warn!("no configuration file found; using defaults");
        }
        Ok(serde_yaml::from_value(merged)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.printing.copies >= 1,
            "printing.copies must be at least 1"
        );
        if let Some(count) = self.camera.capture_count {
            ensure!(count > 0, "camera.capture-count must be greater than zero");
        }
        let template = MontageTemplate::from_config(&self.processing.template)
            .context("invalid processing.template")?;
        self.camera
            .effective_capture_count(&template)
            .context("invalid camera.capture-count")?;
        FilterChain::from_config(&self.processing.captures.filters)
            .context("invalid processing.captures.filters")?;
        if let Some(title) = &self.processing.title {
            FilterChain::from_config(&title.filters)
                .context("invalid processing.title.filters")?;
        }
        ensure!(
            !self.processing.output_extension.trim().is_empty(),
            "processing.output-extension must not be blank"
        );
        if let CameraDriverConfig::Command(cmd) = &self.camera.driver {
            ensure!(
                !cmd.capture_command.trim().is_empty(),
                "camera.driver.capture-command must not be blank"
            );
        }
        Ok(self)
    }
}

fn merge_values(target: &mut serde_yaml::Value, source: serde_yaml::Value) {
    match (target, source) {
        (serde_yaml::Value::Mapping(target), serde_yaml::Value::Mapping(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_mapping() => merge_values(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Deserializes named parameters into a typed parameter struct.
pub(crate) fn parse_params<T: DeserializeOwned>(
    owner: &str,
    params: &Params,
) -> Result<T, ConfigurationError> {
    let mapping = params
        .iter()
        .map(|(k, v)| (serde_yaml::Value::String(k.clone()), v.clone()))
        .collect::<serde_yaml::Mapping>();
    serde_yaml::from_value(serde_yaml::Value::Mapping(mapping)).map_err(|err| {
        ConfigurationError::InvalidParams {
            owner: owner.to_string(),
            reason: err.to_string(),
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CameraConfig {
    /// Self-timer before every exposure.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Number of exposures per session; derived from the template when absent.
    pub capture_count: Option<usize>,
    /// Each session stores its raw captures in a subdirectory of this path.
    pub output_directory: PathBuf,
    pub driver: CameraDriverConfig,
}

impl CameraConfig {
    const fn default_delay() -> Duration {
        Duration::from_secs(3)
    }

    fn default_output_directory() -> PathBuf {
        PathBuf::from("/tmp/photobooth/captures")
    }

    pub fn effective_capture_count(
        &self,
        template: &MontageTemplate,
    ) -> Result<usize, ConfigurationError> {
        let expected = template.capture_count();
        match self.capture_count {
            None => Ok(expected),
            Some(configured) if configured == expected => Ok(configured),
            Some(configured) => Err(ConfigurationError::CaptureCount {
                template: template.name().to_string(),
                expected,
                configured,
            }),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            delay: Self::default_delay(),
            capture_count: None,
            output_directory: Self::default_output_directory(),
            driver: CameraDriverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum CameraDriverConfig {
    Command(CommandDriverConfig),
    Simulated {
        /// Directory of sample images replayed as exposures.
        source_directory: PathBuf,
    },
}

impl Default for CameraDriverConfig {
    fn default() -> Self {
        Self::Command(CommandDriverConfig::default())
    }
}

/// Shell commands driving an external camera tool. `{dir}` expands to the
/// staging directory in every command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandDriverConfig {
    pub open_command: Option<String>,
    /// Must leave exactly one new file in the staging directory.
    pub capture_command: String,
    pub close_command: Option<String>,
    pub staging_directory: PathBuf,
}

impl Default for CommandDriverConfig {
    fn default() -> Self {
        Self {
            open_command: Some("gphoto2 --summary".to_string()),
            capture_command: "gphoto2 --capture-image-and-download --filename '{dir}/%f.%C'"
                .to_string(),
            close_command: None,
            staging_directory: PathBuf::from("/tmp/photobooth/staging"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            name: "strip-with-title".to_string(),
            params: Params::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProcessingConfig {
    pub template: TemplateConfig,
    pub captures: CaptureConfig,
    pub title: Option<TitleConfig>,
    pub output_directory: PathBuf,
    /// Extension of produced montages; selects the encoder.
    pub output_extension: String,
}

impl ProcessingConfig {
    fn default_output_directory() -> PathBuf {
        PathBuf::from("/tmp/photobooth/processed")
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            template: TemplateConfig::default(),
            captures: CaptureConfig::default(),
            title: None,
            output_directory: Self::default_output_directory(),
            output_extension: "jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CaptureConfig {
    /// Rotate captures whose orientation differs from the template's.
    pub correct_orientation: bool,
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TitleConfig {
    pub image_path: PathBuf,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PrintingConfig {
    pub enabled: bool,
    pub copies: u32,
    /// Printer queue name passed to `lp -d`.
    pub destination: Option<String>,
    #[serde(with = "humantime_serde")]
    pub post_print_delay: Duration,
}

impl Default for PrintingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            copies: 1,
            destination: None,
            post_print_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IndicatorConfig {
    #[default]
    Log,
    Sysfs {
        /// LED class directory, e.g. `/sys/class/leds/booth`.
        led: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TriggerConfig {
    /// Every line read from stdin counts as a press.
    #[default]
    Stdin,
    Evdev {
        /// Input device; auto-detected from `/dev/input` when omitted.
        #[serde(default)]
        device: Option<PathBuf>,
        #[serde(default = "default_trigger_key")]
        key: String,
    },
}

fn default_trigger_key() -> String {
    "KEY_ENTER".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteConfig {
    pub user: String,
    pub host: String,
    pub remote_output_directory: PathBuf,
    pub remote_printed_directory: PathBuf,
    pub local_fetch_directory: PathBuf,
    pub local_printed_directory: PathBuf,
    #[serde(with = "humantime_serde", default = "RemoteConfig::default_delay")]
    pub delay: Duration,
}

impl RemoteConfig {
    const fn default_delay() -> Duration {
        Duration::from_secs(10)
    }

    pub fn connection(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}
