//! Overlay layer engine.
//!
//! Turns overlay descriptions into positioned render layers. Layer frames
//! live in a y-up space whose height is the display height in pixels: an
//! overlay authored at the top of the display gets a large `y`. The
//! exporter flips back to y-down when it places layers onto frames.

use image::RgbaImage;
use montage_common::{MediaKind, MontageError, MontageResult};
use montage_model::{
    AffineTransform, Color, Composition, DisplayGeometry, MediaTime, Overlay, OverlayKind, Rect,
    Size, StyledText, TextAlignment, TimeRange,
};

/// Frame duration of overlay compositions unless overridden.
pub const DEFAULT_FRAME_DURATION: MediaTime = MediaTime::new(1, 30);

/// How often a keyframe animation repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
}

/// Where an animation's clock starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginTime {
    /// Time zero of the render timeline, regardless of when the layer appears.
    AtZero,
}

/// Frames cycled evenly over `duration_secs`.
#[derive(Debug, Clone)]
pub struct KeyframeAnimation {
    pub frames: Vec<RgbaImage>,
    pub duration_secs: f64,
    pub repeat: Repeat,
    pub begin: BeginTime,
}

impl KeyframeAnimation {
    /// Frames shown per second of playback.
    pub fn frame_rate(&self) -> f64 {
        if self.duration_secs <= 0.0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.duration_secs
    }
}

/// What a render layer draws inside its frame.
#[derive(Debug, Clone)]
pub enum LayerContent {
    Animated(KeyframeAnimation),
    Text {
        /// Font sizes already scaled to pixels.
        text: StyledText,
        corner_radius: f64,
        background: Color,
        alignment: TextAlignment,
    },
    Raster {
        image: RgbaImage,
        clips_to_bounds: bool,
    },
}

/// A positioned visual layer.
#[derive(Debug, Clone)]
pub struct RenderLayer {
    pub kind: OverlayKind,
    /// Frame in y-up layer space, in pixels.
    pub frame: Rect,
    /// Mirrored overlay transform, applied about the frame's center.
    pub transform: Option<AffineTransform>,
    pub content: LayerContent,
}

/// Transform applied to the underlying video track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerInstruction {
    pub time_range: TimeRange,
    pub transform: AffineTransform,
}

/// Layer tree and video transform attached to an export.
#[derive(Debug, Clone)]
pub struct VideoComposition {
    pub render_size: Size,
    pub frame_duration: MediaTime,
    /// Natural size of the video track; size of the base layer.
    pub base_size: Size,
    /// Height of the space layer frames are expressed in.
    pub layer_space_height: f64,
    pub instruction: LayerInstruction,
    /// Back to front.
    pub layers: Vec<RenderLayer>,
}

impl VideoComposition {
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_duration = MediaTime::new(1, fps.max(1));
        self
    }

    /// Top-left corner of a layer frame in the y-down output space.
    pub fn top_left(&self, layer: &RenderLayer) -> (f64, f64) {
        let frame = layer.frame;
        (
            frame.min_x(),
            self.layer_space_height - frame.min_y() - frame.size.height,
        )
    }
}

/// Compute where an overlay lands over a video track of `natural_size`.
pub fn layout_overlay(
    overlay: &Overlay,
    natural_size: Size,
    geometry: &DisplayGeometry,
) -> MontageResult<RenderLayer> {
    overlay.validate()?;

    let scale = match overlay.kind() {
        OverlayKind::Drawing => 1.0,
        _ => geometry.density,
    };
    let proportion_difference = geometry.height_pixels() - natural_size.width;
    let size = overlay.size().scaled(scale);
    let anchor = overlay.anchor();
    let (left, top) = if overlay.is_centered() {
        (
            anchor.x * scale - size.width / 2.0,
            anchor.y * scale - size.height / 2.0,
        )
    } else {
        (anchor.x * scale, anchor.y * scale)
    };

    let frame = Rect::new(
        left,
        natural_size.width - top - size.height + proportion_difference,
        size.width,
        size.height,
    );

    let content = match overlay {
        Overlay::ImageSequence(o) => LayerContent::Animated(KeyframeAnimation {
            frames: o.images.clone(),
            duration_secs: o.duration_secs,
            repeat: Repeat::Forever,
            begin: BeginTime::AtZero,
        }),
        Overlay::Text(o) => LayerContent::Text {
            text: o.text.with_scaled_fonts(geometry.density),
            corner_radius: o.corner_radius,
            background: o.background,
            alignment: o.alignment,
        },
        Overlay::Drawing(o) => LayerContent::Raster {
            image: o.contents.clone(),
            clips_to_bounds: true,
        },
    };

    Ok(RenderLayer {
        kind: overlay.kind(),
        frame,
        transform: overlay.transform().map(|t| t.mirrored()),
        content,
    })
}

/// Orient and scale a track of `natural_size` so it fills `render_size`.
pub fn fill_transform(
    preferred: AffineTransform,
    natural_size: Size,
    render_size: Size,
) -> MontageResult<AffineTransform> {
    let transformed = preferred.apply_to_rect(Rect::from_size(natural_size));
    if transformed.size.is_empty() {
        return Err(MontageError::composition_track(
            "video track has no visible frame size",
        ));
    }
    let scale = AffineTransform::scale(
        render_size.width / transformed.size.width,
        render_size.height / transformed.size.height,
    );
    Ok(preferred.concat(&scale))
}

/// Assemble the layer tree for `overlays` over the composition's video track.
pub fn build_video_composition(
    composition: &Composition,
    overlays: &[Overlay],
    geometry: &DisplayGeometry,
) -> MontageResult<VideoComposition> {
    let track = composition.track(MediaKind::Video).ok_or_else(|| {
        MontageError::composition_track("overlays need a video track to draw on")
    })?;

    let layers = overlays
        .iter()
        .map(|o| layout_overlay(o, track.natural_size, geometry))
        .collect::<MontageResult<Vec<_>>>()?;

    let time_range = TimeRange::from_zero(composition.duration())
        .ok_or_else(|| MontageError::composition_track("composition has negative duration"))?;
    let instruction = LayerInstruction {
        time_range,
        transform: fill_transform(
            track.preferred_transform,
            track.natural_size,
            geometry.render_size,
        )?,
    };

    tracing::debug!(
        layers = layers.len(),
        base_width = track.natural_size.width,
        base_height = track.natural_size.height,
        "Built video composition"
    );

    Ok(VideoComposition {
        render_size: geometry.render_size,
        frame_duration: DEFAULT_FRAME_DURATION,
        base_size: track.natural_size,
        layer_space_height: geometry.height_pixels(),
        instruction,
        layers,
    })
}
