use std::str::FromStr;

use image::Rgba;
use serde::Deserialize;

use crate::error::ConfigurationError;

const NAMED: &[(&str, [u8; 3])] = &[
    ("white", [255, 255, 255]),
    ("black", [0, 0, 0]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("pink", [255, 192, 203]),
];

/// An opaque RGB color, configured as a name, `#rrggbb` or `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ColorRepr")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const WHITE: Self = Self([255, 255, 255]);
    pub const BLACK: Self = Self([0, 0, 0]);

    pub fn to_rgba(self) -> Rgba<u8> {
        let [r, g, b] = self.0;
        Rgba([r, g, b, 255])
    }
}

impl FromStr for Color {
    type Err = ConfigurationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if let Some(hex) = trimmed.strip_prefix('#') {
            return parse_hex(hex).ok_or_else(|| ConfigurationError::Color(raw.to_string()));
        }
        let lowered = trimmed.to_ascii_lowercase();
        NAMED
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, rgb)| Self(*rgb))
            .ok_or_else(|| ConfigurationError::Color(raw.to_string()))
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |idx: usize| u8::from_str_radix(&hex[idx..idx + 2], 16).ok();
    Some(Color([channel(0)?, channel(2)?, channel(4)?]))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Rgb([u8; 3]),
    Named(String),
}

impl TryFrom<ColorRepr> for Color {
    type Error = ConfigurationError;

    fn try_from(repr: ColorRepr) -> Result<Self, Self::Error> {
        match repr {
            ColorRepr::Rgb(rgb) => Ok(Self(rgb)),
            ColorRepr::Named(name) => name.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_hex_and_arrays() {
        assert_eq!("White".parse::<Color>().unwrap(), Color::WHITE);
        assert_eq!("#ff8000".parse::<Color>().unwrap(), Color([255, 128, 0]));
        let from_yaml: Color = serde_yaml::from_str("[1, 2, 3]").unwrap();
        assert_eq!(from_yaml, Color([1, 2, 3]));
        let from_yaml: Color = serde_yaml::from_str("black").unwrap();
        assert_eq!(from_yaml, Color::BLACK);
    }

    #[test]
    fn rejects_unknown_colors() {
        assert!("mauve-ish".parse::<Color>().is_err());
        assert!("#12345".parse::<Color>().is_err());
        assert!(serde_yaml::from_str::<Color>("chartreuse").is_err());
    }
}
