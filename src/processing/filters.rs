use image::{Rgba, RgbaImage, imageops};
use palette::{FromColor, Hsv, Srgb};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{self, FilterConfig, Params};
use crate::error::ConfigurationError;

const FILTER_NAMES: &[&str] = &[
    "grayscale",
    "invert",
    "mirror",
    "level",
    "color-level",
    "auto-color-level",
];

/// A pure image transform with parameters fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Grayscale,
    Invert,
    Mirror,
    /// Stretches the HSV value channel between the `level` and `100 - level`
    /// percentiles.
    Level { level: f32 },
    ColorLevel(ChannelLevels),
    AutoColorLevel { threshold: u32 },
}

/// Linear floor/ceil mapping of one channel onto 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "[u8; 2]")]
pub struct ChannelLevel {
    floor: u8,
    ceil: u8,
}

impl ChannelLevel {
    pub const DEFAULT: Self = Self { floor: 0, ceil: 255 };

    pub fn new(floor: u8, ceil: u8) -> Result<Self, String> {
        if floor >= ceil {
            return Err(format!("level floor {floor} must be below ceil {ceil}"));
        }
        Ok(Self { floor, ceil })
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    fn lut(&self) -> [u8; 256] {
        let span = f32::from(self.ceil - self.floor);
        let floor = f32::from(self.floor);
        let mut table = [0u8; 256];
        for (value, slot) in table.iter_mut().enumerate() {
            let mapped = (value as f32 - floor) * 255.0 / span;
            *slot = mapped.clamp(0.0, 255.0).round() as u8;
        }
        table
    }
}

impl Default for ChannelLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<[u8; 2]> for ChannelLevel {
    type Error = String;

    fn try_from([floor, ceil]: [u8; 2]) -> Result<Self, Self::Error> {
        Self::new(floor, ceil)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelLevels {
    pub red: ChannelLevel,
    pub green: ChannelLevel,
    pub blue: ChannelLevel,
}

impl ChannelLevels {
    fn is_default(&self) -> bool {
        self.red.is_default() && self.green.is_default() && self.blue.is_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LevelParams {
    level: f32,
}

impl Default for LevelParams {
    fn default() -> Self {
        Self { level: 2.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AutoColorLevelParams {
    threshold: u32,
}

impl Default for AutoColorLevelParams {
    fn default() -> Self {
        Self { threshold: 5 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

impl Filter {
    /// Resolves a configured filter entry. Historical class-style names are
    /// accepted next to the kebab-case ones.
    pub fn from_config(entry: &FilterConfig) -> Result<Self, ConfigurationError> {
        let name = entry.name.as_str();
        let filter = match name {
            "grayscale" | "black-and-white" | "BlackAndWhite" | "Grayscale" => {
                parse_params::<NoParams>(name, &entry.params)?;
                Self::Grayscale
            }
            "invert" | "Invert" => {
                parse_params::<NoParams>(name, &entry.params)?;
                Self::Invert
            }
            "mirror" | "Mirror" => {
                parse_params::<NoParams>(name, &entry.params)?;
                Self::Mirror
            }
            "level" | "LevelImage" => {
                let params: LevelParams = parse_params(name, &entry.params)?;
                if !(0.0..50.0).contains(&params.level) {
                    return Err(invalid(name, "level must be within [0, 50)"));
                }
                Self::Level {
                    level: params.level,
                }
            }
            "color-level" | "ColorLevel" => Self::ColorLevel(parse_params(name, &entry.params)?),
            "auto-color-level" | "AutoColorLevel" => {
                let params: AutoColorLevelParams = parse_params(name, &entry.params)?;
                if params.threshold > 255 {
                    return Err(invalid(name, "threshold must be at most 255"));
                }
                Self::AutoColorLevel {
                    threshold: params.threshold,
                }
            }
            other => {
                return Err(ConfigurationError::UnknownFilter {
                    name: other.to_string(),
                    expected: FILTER_NAMES.join(", "),
                });
            }
        };
        Ok(filter)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Invert => "invert",
            Self::Mirror => "mirror",
            Self::Level { .. } => "level",
            Self::ColorLevel(_) => "color-level",
            Self::AutoColorLevel { .. } => "auto-color-level",
        }
    }

    pub fn apply(&self, image: RgbaImage) -> RgbaImage {
        if image.width() == 0 || image.height() == 0 {
            return image;
        }
        match self {
            Self::Grayscale => grayscale(image),
            Self::Invert => invert(image),
            Self::Mirror => imageops::flip_horizontal(&image),
            Self::Level { level } => level_value(image, *level),
            Self::ColorLevel(levels) => color_level(image, levels),
            Self::AutoColorLevel { threshold } => {
                let levels = auto_levels(&image, *threshold);
                color_level(image, &levels)
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(name: &str, params: &Params) -> Result<T, ConfigurationError> {
    config::parse_params(&format!("filter {name}"), params)
}

fn invalid(name: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidParams {
        owner: format!("filter {name}"),
        reason: reason.to_string(),
    }
}

/// Ordered filters; the empty chain is the identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn from_config(entries: &[FilterConfig]) -> Result<Self, ConfigurationError> {
        entries
            .iter()
            .map(Filter::from_config)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn apply(&self, image: RgbaImage) -> RgbaImage {
        self.filters
            .iter()
            .fold(image, |image, filter| filter.apply(image))
    }
}

// ITU-R 601-2 luma in 16.16 fixed point; the weights sum to 1 << 16.
fn luma(pixel: &Rgba<u8>) -> u8 {
    let [r, g, b, _] = pixel.0;
    ((u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16) as u8
}

fn grayscale(mut image: RgbaImage) -> RgbaImage {
    for pixel in image.pixels_mut() {
        let l = luma(pixel);
        pixel.0[..3].fill(l);
    }
    image
}

fn invert(mut image: RgbaImage) -> RgbaImage {
    for pixel in image.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = 255 - *channel;
        }
    }
    image
}

fn value_of(pixel: &Rgba<u8>) -> u8 {
    pixel.0[0].max(pixel.0[1]).max(pixel.0[2])
}

/// Percentile over a 256-bin histogram, interpolating linearly between the
/// two closest ranks.
fn percentile(histogram: &[u64; 256], total: u64, percent: f32) -> f32 {
    let rank = f64::from(percent) / 100.0 * (total.saturating_sub(1)) as f64;
    let lower = rank.floor() as u64;
    let upper = rank.ceil() as u64;
    let at = |k: u64| -> f64 {
        let mut seen = 0u64;
        for (value, count) in histogram.iter().enumerate() {
            seen += count;
            if seen > k {
                return value as f64;
            }
        }
        255.0
    };
    let low = at(lower);
    let high = at(upper);
    (low + (high - low) * (rank - lower as f64)) as f32
}

fn level_value(mut image: RgbaImage, level: f32) -> RgbaImage {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[usize::from(value_of(pixel))] += 1;
    }
    let total = u64::from(image.width()) * u64::from(image.height());
    let floor = percentile(&histogram, total, level);
    let ceil = percentile(&histogram, total, 100.0 - level);
    if ceil - floor <= f32::EPSILON {
        tracing::debug!(floor, ceil, "value range is degenerate; level skipped");
        return image;
    }
    let scale = 255.0 / (ceil - floor);
    let offset = floor * 255.0 / (floor - ceil);

    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let srgb = Srgb::new(r, g, b).into_format::<f32>();
        let mut hsv = Hsv::from_color(srgb);
        let value = (hsv.value * 255.0 * scale + offset).clamp(0.0, 255.0).round();
        hsv.value = value / 255.0;
        let mapped: Srgb<u8> = Srgb::from_color(hsv).into_format();
        pixel.0[0] = mapped.red;
        pixel.0[1] = mapped.green;
        pixel.0[2] = mapped.blue;
    }
    image
}

fn color_level(mut image: RgbaImage, levels: &ChannelLevels) -> RgbaImage {
    if levels.is_default() {
        return image;
    }
    let tables = [levels.red, levels.green, levels.blue].map(|level| {
        if level.is_default() {
            None
        } else {
            Some(level.lut())
        }
    });
    for pixel in image.pixels_mut() {
        for (channel, table) in pixel.0.iter_mut().zip(&tables) {
            if let Some(table) = table {
                *channel = table[usize::from(*channel)];
            }
        }
    }
    image
}

/// Derives per-channel levels from histogram bin counts: the floor is the
/// number of bins holding fewer than `threshold` pixels, the ceil the number
/// of bins holding more than `255 - threshold`.
fn auto_levels(image: &RgbaImage, threshold: u32) -> ChannelLevels {
    let mut histograms = [[0u64; 256]; 3];
    for pixel in image.pixels() {
        for (histogram, value) in histograms.iter_mut().zip(&pixel.0[..3]) {
            histogram[usize::from(*value)] += 1;
        }
    }
    let low = u64::from(threshold);
    let high = u64::from(255u32.saturating_sub(threshold));
    let [red, green, blue] = histograms.map(|histogram| {
        let floor = histogram.iter().filter(|count| **count < low).count();
        let ceil = histogram.iter().filter(|count| **count > high).count();
        ChannelLevel::new(floor.min(255) as u8, ceil.min(255) as u8).unwrap_or_default()
    });
    ChannelLevels { red, green, blue }
}
