use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage, imageops};
use tracing::debug;

use crate::config::ProcessingConfig;
use crate::error::ConfigurationError;
use crate::processing::filters::FilterChain;
use crate::processing::layout::{ensure_format, ensure_orientation, ensure_size, min_common_size};
use crate::processing::montage::MontageTemplate;

#[derive(Debug, Clone)]
struct TitleSource {
    path: PathBuf,
    filters: FilterChain,
}

/// Turns one session's raw captures into a single montage file.
#[derive(Debug, Clone)]
pub struct CaptureProcessor {
    template: MontageTemplate,
    capture_filters: FilterChain,
    title: Option<TitleSource>,
    correct_orientation: bool,
}

impl CaptureProcessor {
    pub fn new(template: MontageTemplate, capture_filters: FilterChain) -> Self {
        Self {
            template,
            capture_filters,
            title: None,
            correct_orientation: false,
        }
    }

    pub fn with_title(mut self, path: impl Into<PathBuf>, filters: FilterChain) -> Self {
        self.title = Some(TitleSource {
            path: path.into(),
            filters,
        });
        self
    }

    pub fn correcting_orientation(mut self, enabled: bool) -> Self {
        self.correct_orientation = enabled;
        self
    }

    /// Resolves the template and every filter; unknown names are fatal.
    pub fn from_config(cfg: &ProcessingConfig) -> Result<Self, ConfigurationError> {
        let template = MontageTemplate::from_config(&cfg.template)?;
        let filters = FilterChain::from_config(&cfg.captures.filters)?;
        let mut processor =
            Self::new(template, filters).correcting_orientation(cfg.captures.correct_orientation);
        if let Some(title) = &cfg.title {
            let title_filters = FilterChain::from_config(&title.filters)?;
            processor = processor.with_title(&title.image_path, title_filters);
        }
        Ok(processor)
    }

    pub fn template(&self) -> &MontageTemplate {
        &self.template
    }

    pub fn process(&self, captures: &[PathBuf], output: &Path) -> Result<()> {
        let images = captures
            .iter()
            .map(|path| {
                decode_rgba8_apply_exif(path)
                    .with_context(|| format!("failed to load capture {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        let images = self.prepare_captures(images)?;
        let title = self.load_title()?;
        let montage = self.template.process(&images, title.as_ref())?;
        save_flattened(montage, output)?;
        debug!(output = %output.display(), captures = captures.len(), "montage saved");
        Ok(())
    }

    /// Orientation, crop, common size and filters, in that order.
    pub fn prepare_captures(&self, images: Vec<RgbaImage>) -> Result<Vec<RgbaImage>> {
        let orientation = self.template.orientation();
        let format = self.template.capture_format();
        let cropped: Vec<RgbaImage> = images
            .into_iter()
            .map(|image| {
                let image = if self.correct_orientation {
                    ensure_orientation(image, orientation)
                } else {
                    image
                };
                ensure_format(&image, format)
            })
            .collect();

        let Some(common) = min_common_size(cropped.iter().map(RgbaImage::dimensions)) else {
            return Ok(cropped);
        };
        cropped
            .into_iter()
            .map(|image| {
                let sized = ensure_size(image, common, false)?;
                Ok(self.capture_filters.apply(sized))
            })
            .collect()
    }

    fn load_title(&self) -> Result<Option<RgbaImage>> {
        let Some(title) = &self.title else {
            return Ok(None);
        };
        let image = image::open(&title.path)
            .with_context(|| format!("failed to load title image {}", title.path.display()))?
            .to_rgba8();
        Ok(Some(title.filters.apply(image)))
    }
}

fn save_flattened(montage: RgbaImage, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    DynamicImage::ImageRgba8(montage)
        .to_rgb8()
        .save(output)
        .with_context(|| format!("failed to save montage to {}", output.display()))
}

// Decodes an image to RGBA8 and applies EXIF orientation if available.
fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let img = img.to_rgba8();

    let oriented = match read_orientation(path).unwrap_or(1) {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    };
    Ok(oriented)
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {} for {}", o, path.display());
    Some(o)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::filters::Filter;
    use crate::processing::montage::StripWithTitle;
    use image::Rgba;

    fn processor(filters: Vec<Filter>) -> CaptureProcessor {
        CaptureProcessor::new(
            MontageTemplate::Strip(StripWithTitle::default()),
            FilterChain::new(filters),
        )
    }

    #[test]
    fn prepare_crops_and_equalizes_sizes() {
        let images = vec![
            RgbaImage::new(400, 400),
            RgbaImage::new(301, 400),
            RgbaImage::new(300, 402),
        ];
        let prepared = processor(Vec::new()).prepare_captures(images).unwrap();
        assert!(prepared.iter().all(|image| image.dimensions() == (300, 400)));
    }

    #[test]
    fn prepare_rotates_only_when_enabled() {
        let images = vec![RgbaImage::new(800, 600)];
        let kept = processor(Vec::new()).prepare_captures(images.clone()).unwrap();
        assert_eq!(kept[0].dimensions(), (450, 600));

        let rotated = processor(Vec::new())
            .correcting_orientation(true)
            .prepare_captures(images)
            .unwrap();
        assert_eq!(rotated[0].dimensions(), (600, 800));
    }

    #[test]
    fn prepare_applies_capture_filters_to_each_image() {
        let images = vec![RgbaImage::from_pixel(30, 40, Rgba([0, 0, 0, 255])); 3];
        let prepared = processor(vec![Filter::Invert]).prepare_captures(images).unwrap();
        assert!(
            prepared
                .iter()
                .all(|image| image.get_pixel(0, 0) == &Rgba([255, 255, 255, 255]))
        );
    }

    #[test]
    fn process_writes_montage_with_title() {
        let dir = tempfile::tempdir().unwrap();
        let mut captures = Vec::new();
        for (idx, rgb) in [[255, 0, 0], [0, 255, 0], [0, 0, 255]].into_iter().enumerate() {
            let path = dir.path().join(format!("capture-{idx}.png"));
            image::RgbImage::from_pixel(300, 400, image::Rgb(rgb))
                .save(&path)
                .unwrap();
            captures.push(path);
        }
        let title_path = dir.path().join("title.png");
        image::RgbImage::from_pixel(50, 50, image::Rgb([0, 0, 0]))
            .save(&title_path)
            .unwrap();

        let output = dir.path().join("out/montage.png");
        processor(Vec::new())
            .with_title(&title_path, FilterChain::new(vec![Filter::Invert]))
            .process(&captures, &output)
            .unwrap();

        let montage = image::open(&output).unwrap().to_rgb8();
        assert_eq!(montage.dimensions(), (1248, 416));
        assert_eq!(montage.get_pixel(8, 8), &image::Rgb([255, 0, 0]));
        assert_eq!(montage.get_pixel(316, 8), &image::Rgb([0, 255, 0]));
        assert_eq!(montage.get_pixel(624, 8), &image::Rgb([0, 0, 255]));
        // inverted black title is white, indistinguishable from the background
        assert_eq!(montage.get_pixel(1000, 208), &image::Rgb([255, 255, 255]));
    }

    /// 48x24 JPEG with a red square in the top-left corner, optionally
    /// carrying an EXIF orientation tag.
    fn jpeg_with_orientation(dir: &Path, orientation: Option<u16>) -> PathBuf {
        let mut img = image::RgbImage::new(48, 24);
        for y in 0..16 {
            for x in 0..16 {
                img.put_pixel(x, y, image::Rgb([255, 0, 0]));
            }
        }
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        if let Some(orientation) = orientation {
            // APP1 segment holding a big-endian TIFF with a single IFD0 entry
            let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
            app1.extend_from_slice(b"Exif\0\0MM\0\x2A\0\0\0\x08");
            app1.extend_from_slice(&[0x00, 0x01, 0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
            app1.extend_from_slice(&orientation.to_be_bytes());
            app1.extend_from_slice(&[0; 6]);
            jpeg.splice(2..2, app1);
        }
        let path = dir.join(format!("oriented-{}.jpg", orientation.unwrap_or(0)));
        fs::write(&path, jpeg).unwrap();
        path
    }

    fn is_red(pixel: &Rgba<u8>) -> bool {
        pixel[0] > 200 && pixel[1] < 60 && pixel[2] < 60
    }

    #[test]
    fn decode_rotates_by_exif_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let path = jpeg_with_orientation(dir.path(), Some(6));
        assert_eq!(read_orientation(&path), Some(6));

        let image = decode_rgba8_apply_exif(&path).unwrap();
        assert_eq!(image.dimensions(), (24, 48));
        // rotated clockwise: the corner square moves to the top right
        assert!(is_red(image.get_pixel(16, 8)), "{:?}", image.get_pixel(16, 8));
        assert!(!is_red(image.get_pixel(4, 40)));
    }

    #[test]
    fn decode_without_exif_keeps_pixels_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = jpeg_with_orientation(dir.path(), None);
        assert_eq!(read_orientation(&path), None);

        let image = decode_rgba8_apply_exif(&path).unwrap();
        assert_eq!(image.dimensions(), (48, 24));
        assert!(is_red(image.get_pixel(8, 8)), "{:?}", image.get_pixel(8, 8));
        assert!(!is_red(image.get_pixel(40, 20)));
    }

    #[test]
    fn process_fails_on_missing_capture() {
        let dir = tempfile::tempdir().unwrap();
        let missing = vec![dir.path().join("nope.jpg"); 3];
        let err = processor(Vec::new())
            .process(&missing, &dir.path().join("out.jpg"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("nope.jpg"));
    }
}
