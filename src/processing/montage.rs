use std::borrow::Cow;

use anyhow::Result;
use image::{Rgba, RgbaImage, imageops};
use serde::Deserialize;

use crate::config::{TemplateConfig, parse_params};
use crate::error::{ConfigurationError, TemplateMismatchError};
use crate::processing::color::Color;
use crate::processing::layout::{
    PictureFormat, PictureOrientation, ensure_size, min_common_size,
};

const TEMPLATE_NAMES: &[&str] = &["strip-with-title", "double-strip-with-title"];
const GUIDE_WIDTH: u32 = 2;

/// Spacing expressed as a percentage of the larger capture dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Margin {
    percent: u32,
}

impl Margin {
    pub const fn percent(percent: u32) -> Self {
        Self { percent }
    }

    pub fn pixels(&self, size: (u32, u32)) -> u32 {
        (u64::from(size.0.max(size.1)) * u64::from(self.percent) / 100) as u32
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::percent(2)
    }
}

impl TryFrom<String> for Margin {
    type Error = ConfigurationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.trim()
            .strip_suffix('%')
            .and_then(|value| value.trim().parse().ok())
            .map(Self::percent)
            .ok_or(ConfigurationError::Margin(raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct StripWithTitle {
    pub background_color: Color,
    pub margin: Margin,
}

impl Default for StripWithTitle {
    fn default() -> Self {
        Self {
            background_color: Color::WHITE,
            margin: Margin::default(),
        }
    }
}

/// Two identical strips stacked vertically with a cut guide between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DoubleStripWithTitle {
    pub background_color: Color,
    pub margin: Margin,
    pub guide_color: Color,
}

impl Default for DoubleStripWithTitle {
    fn default() -> Self {
        Self {
            background_color: Color::WHITE,
            margin: Margin::default(),
            guide_color: Color::WHITE,
        }
    }
}

/// Montage layouts, resolved once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MontageTemplate {
    Strip(StripWithTitle),
    DoubleStrip(DoubleStripWithTitle),
}

impl MontageTemplate {
    pub fn from_config(cfg: &TemplateConfig) -> Result<Self, ConfigurationError> {
        let name = cfg.name.as_str();
        let owner = format!("template {name}");
        match name {
            "strip-with-title" | "StripWithTitle" => {
                Ok(Self::Strip(parse_params(&owner, &cfg.params)?))
            }
            "double-strip-with-title" | "DoubleStripWithTitle" => {
                Ok(Self::DoubleStrip(parse_params(&owner, &cfg.params)?))
            }
            other => Err(ConfigurationError::UnknownTemplate {
                name: other.to_string(),
                expected: TEMPLATE_NAMES.join(", "),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Strip(_) => TEMPLATE_NAMES[0],
            Self::DoubleStrip(_) => TEMPLATE_NAMES[1],
        }
    }

    pub fn capture_count(&self) -> usize {
        3
    }

    /// Aspect ratio of the produced canvas.
    pub fn format(&self) -> PictureFormat {
        match self {
            Self::Strip(_) => PictureFormat::LANDSCAPE_15X5,
            Self::DoubleStrip(_) => PictureFormat::LANDSCAPE_15X10,
        }
    }

    pub fn capture_format(&self) -> PictureFormat {
        PictureFormat::PORTRAIT_3X4
    }

    pub fn orientation(&self) -> PictureOrientation {
        PictureOrientation::Portrait
    }

    pub fn process(&self, images: &[RgbaImage], title: Option<&RgbaImage>) -> Result<RgbaImage> {
        if images.len() != self.capture_count() {
            return Err(TemplateMismatchError {
                expected: self.capture_count(),
                actual: images.len(),
            }
            .into());
        }
        match self {
            Self::Strip(strip) => strip.compose(images, title, self.format()),
            Self::DoubleStrip(double) => {
                let strip = StripWithTitle {
                    background_color: double.background_color,
                    margin: double.margin,
                };
                let single = strip.compose(images, title, PictureFormat::LANDSCAPE_15X5)?;
                Ok(double.stack(&single))
            }
        }
    }
}

impl StripWithTitle {
    fn compose(
        &self,
        images: &[RgbaImage],
        title: Option<&RgbaImage>,
        format: PictureFormat,
    ) -> Result<RgbaImage> {
        let common = min_common_size(images.iter().map(RgbaImage::dimensions))
            .ok_or_else(|| anyhow::anyhow!("montage needs at least one capture"))?;
        let margin = self.margin.pixels(common);
        let height = common.1 + 2 * margin;
        let width = (u64::from(height) * u64::from(format.width) / u64::from(format.height)) as u32;
        let mut canvas = RgbaImage::from_pixel(width, height, self.background_color.to_rgba());

        let mut x = margin;
        for image in images {
            let image = if image.dimensions() == common {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(ensure_size(image.clone(), common, false)?)
            };
            imageops::replace(&mut canvas, image.as_ref(), i64::from(x), i64::from(margin));
            x += common.0 + margin;
        }

        if let Some(title) = title {
            let band = (
                width.saturating_sub(x + margin),
                height.saturating_sub(2 * margin),
            );
            if band.0 == 0 || band.1 == 0 {
                tracing::warn!(
                    width,
                    height,
                    offset = x,
                    "no room left for the title image; skipping it"
                );
            } else {
                let fitted = ensure_size(title.clone(), band, true)?;
                let y = (height - fitted.height()) / 2;
                imageops::replace(&mut canvas, &fitted, i64::from(x), i64::from(y));
            }
        }

        tracing::debug!(width, height, margin, "composed strip");
        Ok(canvas)
    }
}

impl DoubleStripWithTitle {
    fn stack(&self, strip: &RgbaImage) -> RgbaImage {
        let (width, height) = strip.dimensions();
        let mut canvas = RgbaImage::from_pixel(width, height * 2, self.background_color.to_rgba());
        imageops::replace(&mut canvas, strip, 0, 0);
        imageops::replace(&mut canvas, strip, 0, i64::from(height));
        draw_guide(&mut canvas, height, self.guide_color.to_rgba());
        canvas
    }
}

// Horizontal guide centered on row `y`.
fn draw_guide(canvas: &mut RgbaImage, y: u32, color: Rgba<u8>) {
    let top = y.saturating_sub(GUIDE_WIDTH / 2);
    let bottom = (top + GUIDE_WIDTH).min(canvas.height());
    for row in top..bottom {
        for x in 0..canvas.width() {
            canvas.put_pixel(x, row, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Color(rgb).to_rgba())
    }

    fn captures() -> Vec<RgbaImage> {
        vec![
            solid(300, 400, [255, 0, 0]),
            solid(300, 400, [0, 255, 0]),
            solid(300, 400, [0, 0, 255]),
        ]
    }

    #[test]
    fn rejects_wrong_capture_counts() {
        let template = MontageTemplate::Strip(StripWithTitle::default());
        let mut images = captures();
        images.pop();
        let err = template.process(&images, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TemplateMismatchError>(),
            Some(&TemplateMismatchError {
                expected: 3,
                actual: 2
            })
        );

        let mut images = captures();
        images.push(solid(300, 400, [0, 0, 0]));
        let err = template.process(&images, None).unwrap_err();
        assert!(err.downcast_ref::<TemplateMismatchError>().is_some());
    }

    #[test]
    fn title_fills_remaining_band_and_is_centered() {
        let template = MontageTemplate::Strip(StripWithTitle::default());
        let title = solid(100, 100, [0, 0, 0]);
        let montage = template.process(&captures(), Some(&title)).unwrap();
        assert_eq!(montage.dimensions(), (1248, 416));
        // band is 308x400 starting at x=932; a square title becomes 308x308
        let top = (416 - 308) / 2;
        assert_eq!(montage.get_pixel(932, top + 1).0[..3], [0, 0, 0]);
        assert_eq!(montage.get_pixel(1239, top + 307).0[..3], [0, 0, 0]);
        assert_eq!(montage.get_pixel(932, top - 1), &Color::WHITE.to_rgba());
        assert_eq!(montage.get_pixel(1240, 208), &Color::WHITE.to_rgba());
    }

    #[test]
    fn double_strip_stacks_two_strips_with_guide() {
        let template = MontageTemplate::DoubleStrip(DoubleStripWithTitle {
            guide_color: Color::BLACK,
            ..DoubleStripWithTitle::default()
        });
        let montage = template.process(&captures(), None).unwrap();
        assert_eq!(montage.dimensions(), (1248, 832));
        assert_eq!(montage.get_pixel(8, 8), &Rgba([255, 0, 0, 255]));
        assert_eq!(montage.get_pixel(8, 416 + 8), &Rgba([255, 0, 0, 255]));
        assert_eq!(montage.get_pixel(600, 415), &Rgba([0, 0, 0, 255]));
        assert_eq!(montage.get_pixel(600, 416), &Rgba([0, 0, 0, 255]));
        assert_eq!(montage.get_pixel(600, 417), &Color::WHITE.to_rgba());
    }

    #[test]
    fn margin_requires_percentage() {
        assert_eq!(Margin::try_from("4%".to_string()).unwrap(), Margin::percent(4));
        assert!(matches!(
            Margin::try_from("12px".to_string()),
            Err(ConfigurationError::Margin(_))
        ));
        assert_eq!(Margin::percent(2).pixels((300, 400)), 8);
    }

    #[test]
    fn resolves_templates_by_name() {
        let cfg: TemplateConfig = serde_yaml::from_str(
            "name: StripWithTitle\nparams:\n  background-color: black\n  margin: 4%\n",
        )
        .unwrap();
        let template = MontageTemplate::from_config(&cfg).unwrap();
        assert_eq!(
            template,
            MontageTemplate::Strip(StripWithTitle {
                background_color: Color::BLACK,
                margin: Margin::percent(4),
            })
        );

        let cfg: TemplateConfig = serde_yaml::from_str("name: collage").unwrap();
        assert!(matches!(
            MontageTemplate::from_config(&cfg),
            Err(ConfigurationError::UnknownTemplate { .. })
        ));
    }
}
