//! Burn overlays described in a JSON file into a video.
//!
//! The file holds a list of overlays. Image paths are resolved relative to
//! the file's directory:
//!
//! ```json
//! [
//!   { "type": "text", "center": {"x": 187.5, "y": 120}, "size": {"width": 200, "height": 44},
//!     "text": {"text": "Hello", "font_size": 24}, "corner_radius": 8,
//!     "background": {"r": 0, "g": 0, "b": 0, "a": 160} },
//!   { "type": "image_sequence", "center": {"x": 100, "y": 600}, "size": {"width": 80, "height": 80},
//!     "images": ["a.png", "b.png"], "duration_secs": 1.0 },
//!   { "type": "drawing", "size": {"width": 375, "height": 812}, "image": "sketch.png" }
//! ]
//! ```

use std::path::{Path, PathBuf};

use montage_common::AppConfig;
use montage_model::{
    AffineTransform, Color, DrawingOverlay, ImageSequenceOverlay, Overlay, OverlayGeometry, Size,
    StyledText, TextAlignment, TextOverlay,
};
use montage_render::Montage;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OverlayEntry {
    ImageSequence {
        #[serde(flatten)]
        geometry: OverlayGeometry,
        images: Vec<PathBuf>,
        duration_secs: f64,
    },
    Text {
        #[serde(flatten)]
        geometry: OverlayGeometry,
        text: StyledText,
        #[serde(default)]
        corner_radius: f64,
        #[serde(default)]
        background: Color,
        #[serde(default)]
        alignment: TextAlignment,
    },
    Drawing {
        size: Size,
        #[serde(default)]
        transform: Option<AffineTransform>,
        image: PathBuf,
    },
}

fn load_image(base: &Path, path: &Path) -> anyhow::Result<image::RgbaImage> {
    let resolved = base.join(path);
    let image = image::open(&resolved)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", resolved.display()))?;
    Ok(image.to_rgba8())
}

fn resolve(entry: OverlayEntry, base: &Path) -> anyhow::Result<Overlay> {
    Ok(match entry {
        OverlayEntry::ImageSequence {
            geometry,
            images,
            duration_secs,
        } => Overlay::ImageSequence(ImageSequenceOverlay {
            geometry,
            images: images
                .iter()
                .map(|path| load_image(base, path))
                .collect::<anyhow::Result<_>>()?,
            duration_secs,
        }),
        OverlayEntry::Text {
            geometry,
            text,
            corner_radius,
            background,
            alignment,
        } => Overlay::Text(TextOverlay {
            geometry,
            text,
            corner_radius,
            background,
            alignment,
        }),
        OverlayEntry::Drawing {
            size,
            transform,
            image,
        } => Overlay::Drawing(DrawingOverlay {
            size,
            transform,
            contents: load_image(base, &image)?,
        }),
    })
}

/// Parse an overlay file into overlays, loading referenced images.
pub(crate) fn load_overlays(overlay_file: &Path) -> anyhow::Result<Vec<Overlay>> {
    let content = std::fs::read_to_string(overlay_file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", overlay_file.display()))?;
    let entries: Vec<OverlayEntry> = serde_json::from_str(&content)?;
    let base = overlay_file.parent().unwrap_or_else(|| Path::new("."));
    entries.into_iter().map(|e| resolve(e, base)).collect()
}

pub async fn run(config: &AppConfig, file: PathBuf, overlay_file: PathBuf) -> anyhow::Result<()> {
    let overlays = load_overlays(&overlay_file)?;
    let montage = Montage::from_config(config);
    let asset = montage.open(&file)?;
    println!(
        "Adding {} overlays to {}",
        overlays.len(),
        file.display()
    );
    let output = montage.add_overlays(&overlays, &asset).await?;
    super::media::report(&output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_overlays_resolves_images_next_to_overlay_file() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::new(4, 4)
            .save(dir.path().join("dot.png"))
            .unwrap();
        let overlay_file = dir.path().join("overlays.json");
        std::fs::write(
            &overlay_file,
            r#"[
                {"type": "text", "center": {"x": 10, "y": 20}, "size": {"width": 50, "height": 10},
                 "text": {"text": "hi", "font_size": 12}},
                {"type": "image_sequence", "center": {"x": 0, "y": 0}, "size": {"width": 4, "height": 4},
                 "images": ["dot.png", "dot.png"], "duration_secs": 0.5},
                {"type": "drawing", "size": {"width": 4, "height": 4}, "image": "dot.png"}
            ]"#,
        )
        .unwrap();

        let overlays = load_overlays(&overlay_file).unwrap();
        assert_eq!(overlays.len(), 3);
        match &overlays[0] {
            Overlay::Text(text) => {
                assert_eq!(text.text.text, "hi");
                assert_eq!(text.alignment, TextAlignment::Center);
                assert_eq!(text.background, Color::CLEAR);
            }
            other => panic!("expected text, got {other:?}"),
        }
        match &overlays[1] {
            Overlay::ImageSequence(seq) => assert_eq!(seq.images.len(), 2),
            other => panic!("expected image sequence, got {other:?}"),
        }
        assert!(matches!(overlays[2], Overlay::Drawing(_)));
    }

    #[test]
    fn test_missing_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let overlay_file = dir.path().join("overlays.json");
        std::fs::write(
            &overlay_file,
            r#"[{"type": "drawing", "size": {"width": 4, "height": 4}, "image": "nope.png"}]"#,
        )
        .unwrap();

        let err = load_overlays(&overlay_file).unwrap_err();
        assert!(err.to_string().contains("nope.png"));
    }
}
