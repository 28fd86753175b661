//! Overlay descriptions.
//!
//! An overlay is authored in display space: points, y-down, origin at the
//! top-left of the display. The render crate turns these descriptions into
//! positioned render layers.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::geometry::{AffineTransform, Point, Size};

/// Discriminant of an [`Overlay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    ImageSequence,
    Text,
    Drawing,
}

/// Placement shared by image-sequence and text overlays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayGeometry {
    /// Center of the overlay in display points.
    pub center: Point,
    /// Size in display points.
    pub size: Size,
    /// Transform authored in display space.
    #[serde(default)]
    pub transform: Option<AffineTransform>,
}

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const CLEAR: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// `0xRRGGBB@alpha`, the color syntax ffmpeg filters accept.
    pub fn to_ffmpeg(&self) -> String {
        format!(
            "0x{:02X}{:02X}{:02X}@{:.3}",
            self.r,
            self.g,
            self.b,
            self.a as f64 / 255.0
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::CLEAR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlignment {
    Left,
    #[default]
    Center,
    Right,
    Justified,
}

/// Text with a single font and color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyledText {
    pub text: String,
    #[serde(default)]
    pub font_family: Option<String>,
    /// Font size in points.
    pub font_size: f64,
    #[serde(default = "default_text_color")]
    pub color: Color,
}

fn default_text_color() -> Color {
    Color::WHITE
}

impl StyledText {
    pub fn new(text: impl Into<String>, font_size: f64) -> Self {
        Self {
            text: text.into(),
            font_family: None,
            font_size,
            color: Color::WHITE,
        }
    }

    /// Same text with every font size multiplied by `factor`.
    pub fn with_scaled_fonts(&self, factor: f64) -> StyledText {
        StyledText {
            font_size: self.font_size * factor,
            ..self.clone()
        }
    }
}

/// An animated sticker cycling through its frames.
#[derive(Debug, Clone)]
pub struct ImageSequenceOverlay {
    pub geometry: OverlayGeometry,
    pub images: Vec<RgbaImage>,
    /// Length of one pass through all images, in seconds.
    pub duration_secs: f64,
}

#[derive(Debug, Clone)]
pub struct TextOverlay {
    pub geometry: OverlayGeometry,
    pub text: StyledText,
    pub corner_radius: f64,
    pub background: Color,
    pub alignment: TextAlignment,
}

/// A freehand drawing, pre-rasterized. Anchored at the display origin.
#[derive(Debug, Clone)]
pub struct DrawingOverlay {
    pub size: Size,
    pub transform: Option<AffineTransform>,
    pub contents: RgbaImage,
}

/// A visual layer composited onto video frames during export.
#[derive(Debug, Clone)]
pub enum Overlay {
    ImageSequence(ImageSequenceOverlay),
    Text(TextOverlay),
    Drawing(DrawingOverlay),
}

/// Reasons an overlay description is unusable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay size {width}x{height} must be finite and non-negative")]
    InvalidSize { width: f64, height: f64 },

    #[error("image sequence overlay has no images")]
    NoImages,

    #[error("image sequence duration {0} must be positive")]
    InvalidDuration(f64),
}

impl From<OverlayError> for montage_common::MontageError {
    fn from(err: OverlayError) -> Self {
        montage_common::MontageError::input_parameters(err.to_string())
    }
}

impl Overlay {
    pub fn kind(&self) -> OverlayKind {
        match self {
            Overlay::ImageSequence(_) => OverlayKind::ImageSequence,
            Overlay::Text(_) => OverlayKind::Text,
            Overlay::Drawing(_) => OverlayKind::Drawing,
        }
    }

    /// Size in display points.
    pub fn size(&self) -> Size {
        match self {
            Overlay::ImageSequence(o) => o.geometry.size,
            Overlay::Text(o) => o.geometry.size,
            Overlay::Drawing(o) => o.size,
        }
    }

    pub fn transform(&self) -> Option<AffineTransform> {
        match self {
            Overlay::ImageSequence(o) => o.geometry.transform,
            Overlay::Text(o) => o.geometry.transform,
            Overlay::Drawing(o) => o.transform,
        }
    }

    /// The point the overlay is positioned by: its center, or the display
    /// origin for drawings.
    pub fn anchor(&self) -> Point {
        match self {
            Overlay::ImageSequence(o) => o.geometry.center,
            Overlay::Text(o) => o.geometry.center,
            Overlay::Drawing(_) => Point::ZERO,
        }
    }

    /// Whether the anchor is the overlay's center rather than its origin.
    pub fn is_centered(&self) -> bool {
        !matches!(self, Overlay::Drawing(_))
    }

    pub fn validate(&self) -> Result<(), OverlayError> {
        let size = self.size();
        if !size.is_valid() {
            return Err(OverlayError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        if let Overlay::ImageSequence(o) = self {
            if o.images.is_empty() {
                return Err(OverlayError::NoImages);
            }
            if !(o.duration_secs.is_finite() && o.duration_secs > 0.0) {
                return Err(OverlayError::InvalidDuration(o.duration_secs));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: f64, height: f64) -> OverlayGeometry {
        OverlayGeometry {
            center: Point::new(100.0, 200.0),
            size: Size::new(width, height),
            transform: None,
        }
    }

    #[test]
    fn test_drawing_anchors_at_origin() {
        let drawing = Overlay::Drawing(DrawingOverlay {
            size: Size::new(375.0, 812.0),
            transform: None,
            contents: RgbaImage::new(4, 4),
        });
        assert_eq!(drawing.kind(), OverlayKind::Drawing);
        assert_eq!(drawing.anchor(), Point::ZERO);
        assert!(!drawing.is_centered());
    }

    #[test]
    fn test_validate_rejects_negative_size() {
        let text = Overlay::Text(TextOverlay {
            geometry: geometry(-1.0, 10.0),
            text: StyledText::new("hi", 17.0),
            corner_radius: 4.0,
            background: Color::BLACK,
            alignment: TextAlignment::Center,
        });
        assert!(matches!(
            text.validate(),
            Err(OverlayError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_validate_image_sequence() {
        let mut overlay = ImageSequenceOverlay {
            geometry: geometry(50.0, 50.0),
            images: vec![],
            duration_secs: 1.0,
        };
        assert_eq!(
            Overlay::ImageSequence(overlay.clone()).validate(),
            Err(OverlayError::NoImages)
        );
        overlay.images.push(RgbaImage::new(2, 2));
        overlay.duration_secs = 0.0;
        assert_eq!(
            Overlay::ImageSequence(overlay.clone()).validate(),
            Err(OverlayError::InvalidDuration(0.0))
        );
        overlay.duration_secs = 0.5;
        assert!(Overlay::ImageSequence(overlay).validate().is_ok());
    }

    #[test]
    fn test_scaled_fonts() {
        let text = StyledText::new("caption", 17.0).with_scaled_fonts(3.0);
        assert_eq!(text.font_size, 51.0);
        assert_eq!(text.text, "caption");
    }

    #[test]
    fn test_color_to_ffmpeg() {
        assert_eq!(Color::rgba(255, 0, 16, 255).to_ffmpeg(), "0xFF0010@1.000");
        assert_eq!(Color::CLEAR.to_ffmpeg(), "0x000000@0.000");
    }

    #[test]
    fn test_styled_text_deserializes_with_defaults() {
        let text: StyledText = serde_json::from_str(r#"{"text":"hi","font_size":12}"#).unwrap();
        assert_eq!(text.color, Color::WHITE);
        assert!(text.font_family.is_none());
    }
}
