use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{RgbaImage, imageops};
use serde::Deserialize;
use serde::de::{self, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureOrientation {
    Portrait,
    Landscape,
}

impl PictureOrientation {
    pub fn of(width: u32, height: u32) -> Self {
        if width > height {
            Self::Landscape
        } else {
            Self::Portrait
        }
    }
}

/// An aspect ratio used as a crop or resize target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureFormat {
    pub width: u32,
    pub height: u32,
}

impl PictureFormat {
    pub const LANDSCAPE_15X5: Self = Self::new(15, 5);
    pub const LANDSCAPE_15X10: Self = Self::new(15, 10);
    pub const LANDSCAPE_4X3: Self = Self::new(4, 3);
    pub const LANDSCAPE_3X2: Self = Self::new(3, 2);
    pub const PORTRAIT_3X4: Self = Self::new(3, 4);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_tuple(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for PictureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for PictureFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (w, h) = raw
            .split_once(['x', ':'])
            .ok_or_else(|| format!("expected WxH or W:H, got '{raw}'"))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("bad width in '{raw}'"))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("bad height in '{raw}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("format '{raw}' must use positive integers"));
        }
        Ok(Self::new(width, height))
    }
}

impl<'de> Deserialize<'de> for PictureFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// A rectangle inside a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest size of ratio `format` that fits inside `size`.
///
/// When the target is wider than the source the width is kept and the height
/// derived from it, otherwise the height is kept. Values are truncated.
pub fn fit_size(size: (u32, u32), format: (u32, u32)) -> (u32, u32) {
    let (w, h) = (u64::from(size.0), u64::from(size.1));
    let (fw, fh) = (u64::from(format.0.max(1)), u64::from(format.1.max(1)));
    // fw / fh > w / h, cross-multiplied
    if fw * h > w * fh {
        (size.0, (w * fh / fw) as u32)
    } else {
        ((h * fw / fh) as u32, size.1)
    }
}

/// Centered crop of ratio `format` inside an image of `size`.
pub fn crop_rect(size: (u32, u32), format: PictureFormat) -> CropRect {
    let (width, height) = fit_size(size, format.as_tuple());
    CropRect {
        x: (size.0 - width) / 2,
        y: (size.1 - height) / 2,
        width,
        height,
    }
}

pub fn ensure_orientation(image: RgbaImage, orientation: PictureOrientation) -> RgbaImage {
    if PictureOrientation::of(image.width(), image.height()) == orientation {
        image
    } else {
        imageops::rotate90(&image)
    }
}

pub fn ensure_format(image: &RgbaImage, format: PictureFormat) -> RgbaImage {
    let rect = crop_rect(image.dimensions(), format);
    if (rect.width, rect.height) == image.dimensions() {
        return image.clone();
    }
    imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Component-wise minimum over a set of sizes, `None` for an empty set.
pub fn min_common_size<I>(sizes: I) -> Option<(u32, u32)>
where
    I: IntoIterator<Item = (u32, u32)>,
{
    sizes
        .into_iter()
        .reduce(|acc, (w, h)| (acc.0.min(w), acc.1.min(h)))
}

/// Final size for `ensure_size`. With `keep_proportions` the source ratio is
/// fitted inside `target` and clamped so it never exceeds the target box.
pub fn enforced_size(source: (u32, u32), target: (u32, u32), keep_proportions: bool) -> (u32, u32) {
    if !keep_proportions || source == target {
        return target;
    }
    let fitted = fit_size(target, source);
    (
        fitted.0.min(target.0).max(1),
        fitted.1.min(target.1).max(1),
    )
}

pub fn ensure_size(image: RgbaImage, target: (u32, u32), keep_proportions: bool) -> Result<RgbaImage> {
    let (w, h) = enforced_size(image.dimensions(), target, keep_proportions);
    if (w, h) == image.dimensions() {
        return Ok(image);
    }
    resize_rgba(&image, w, h)
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage> {
    anyhow::ensure!(
        target_w > 0 && target_h > 0,
        "cannot resize to an empty size {target_w}x{target_h}"
    );
    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options =
        fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("resize failed")?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("failed to construct resized RGBA image"))
}
