//! ffmpeg export backend.
//!
//! Compositions become one ffmpeg invocation: every segment is its own
//! trimmed input, gaps are padded, segments are concatenated per kind, and
//! overlay layers are rendered to PNG inputs composited on top.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use montage_common::{ExportDefaults, MediaKind, MontageError, MontageResult};
use montage_model::{AffineTransform, Color, CompositionTrack, MediaAsset, Size, TextAlignment};

use crate::export::{
    ExportBackend, ExportJob, ExportProgress, ExportSession, ExportSource, ExportStage,
    ExportStatus, ProgressCallback,
};
use crate::overlay::{LayerContent, RenderLayer, VideoComposition};
use crate::probe::AssetProber;

/// Frame rate used when a video export carries no video composition.
const DEFAULT_FPS: f64 = 30.0;

/// Sample rate audio segments are normalized to before concatenation.
const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Horizontal inset of left- and right-aligned overlay text, in pixels.
const TEXT_INSET: f64 = 12.0;

/// Encoder parameters shared by every export.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub crf: u8,
    pub audio_bitrate_kbps: u32,
    pub font_file: Option<PathBuf>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self::from(&ExportDefaults::default())
    }
}

impl From<&ExportDefaults> for EncoderSettings {
    fn from(config: &ExportDefaults) -> Self {
        Self {
            crf: config.crf,
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            font_file: config.font_file.clone(),
        }
    }
}

/// [`ExportBackend`] that shells out to ffmpeg.
pub struct FfmpegBackend {
    binary: String,
    prober: Arc<dyn AssetProber>,
    settings: EncoderSettings,
}

impl FfmpegBackend {
    pub fn new(
        binary: impl Into<String>,
        prober: Arc<dyn AssetProber>,
        settings: EncoderSettings,
    ) -> Self {
        Self {
            binary: binary.into(),
            prober,
            settings,
        }
    }

    /// Whether the ffmpeg binary can be executed.
    pub fn is_available(&self) -> bool {
        is_executable(&self.binary)
    }
}

pub(crate) fn is_executable(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

impl ExportBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn create_session(&self, job: ExportJob) -> Option<Box<dyn ExportSession>> {
        let request = &job.request;
        if !request.source.has_media(request.kind) {
            tracing::warn!(kind = %request.kind, "Source has no media of the requested kind");
            return None;
        }
        if request.kind == MediaKind::Audio && request.video_composition.is_some() {
            tracing::warn!("Video composition given for an audio export");
            return None;
        }
        if !self.is_available() {
            tracing::warn!(binary = %self.binary, "ffmpeg is not available");
            return None;
        }
        Some(Box::new(FfmpegSession {
            job,
            binary: self.binary.clone(),
            prober: self.prober.clone(),
            settings: self.settings.clone(),
        }))
    }
}

struct FfmpegSession {
    job: ExportJob,
    binary: String,
    prober: Arc<dyn AssetProber>,
    settings: EncoderSettings,
}

#[async_trait]
impl ExportSession for FfmpegSession {
    async fn run(self: Box<Self>, progress: Option<ProgressCallback>) -> ExportStatus {
        let FfmpegSession {
            job,
            binary,
            prober,
            settings,
        } = *self;
        tokio::task::spawn_blocking(move || {
            execute(&binary, &job, &settings, prober.as_ref(), progress)
        })
        .await
        .unwrap_or_else(|e| ExportStatus::Failed(format!("Export task failed: {e}")))
    }
}

fn execute(
    binary: &str,
    job: &ExportJob,
    settings: &EncoderSettings,
    prober: &dyn AssetProber,
    progress: Option<ProgressCallback>,
) -> ExportStatus {
    if let Some(cb) = &progress {
        cb(ExportProgress {
            progress: 0.0,
            frames_rendered: 0,
            total_frames: 0,
            eta_secs: 0.0,
            stage: ExportStage::Preparing,
        });
    }

    let prepared = tempfile::tempdir()
        .map_err(MontageError::from)
        .and_then(|dir| {
            let layers = match &job.request.video_composition {
                Some(vc) => materialize_layers(vc, dir.path())?,
                None => Vec::new(),
            };
            let plan = build_plan(job, &layers, settings)?;
            Ok((dir, plan))
        });
    // The directory must outlive the ffmpeg run.
    let (_layer_dir, plan) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => return ExportStatus::Failed(e.to_string()),
    };

    let cancel = job.request.cancel.as_deref();
    match run_ffmpeg(binary, &plan, progress.as_ref(), cancel) {
        Ok(()) => {}
        Err(FfmpegFailure::Cancelled) => {
            return ExportStatus::Cancelled("The operation was cancelled".to_string())
        }
        Err(FfmpegFailure::Failed(message)) => {
            if let Some(cb) = &progress {
                cb(ExportProgress {
                    progress: 0.0,
                    frames_rendered: 0,
                    total_frames: plan.total_frames,
                    eta_secs: 0.0,
                    stage: ExportStage::Failed,
                });
            }
            return ExportStatus::Failed(message);
        }
    }

    match prober.probe(&job.output_path) {
        Ok(asset) => ExportStatus::Completed(asset),
        Err(e) => {
            tracing::warn!(
                output = %job.output_path.display(),
                error = %e,
                "Could not probe export output, reporting expected duration"
            );
            ExportStatus::Completed(MediaAsset::new(
                job.output_path.clone(),
                job.expected_duration(),
                Vec::new(),
            ))
        }
    }
}

/// An overlay layer's ffmpeg input, already written to disk.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerInput {
    /// A single image repeated for the whole export.
    Still { path: PathBuf },
    /// A numbered PNG sequence looped forever.
    Sequence { pattern: PathBuf, frame_rate: f64 },
}

/// Text drawn onto a layer's background.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDraw {
    pub textfile: PathBuf,
    pub font_size: f64,
    pub font_family: Option<String>,
    pub color: Color,
    pub alignment: TextAlignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedLayer {
    pub input: LayerInput,
    pub text: Option<TextDraw>,
}

/// Write every layer's pixels (and text) into `dir`.
pub fn materialize_layers(vc: &VideoComposition, dir: &Path) -> MontageResult<Vec<PreparedLayer>> {
    vc.layers
        .iter()
        .enumerate()
        .map(|(i, layer)| materialize_layer(i, layer, dir))
        .collect()
}

fn materialize_layer(
    index: usize,
    layer: &RenderLayer,
    dir: &Path,
) -> MontageResult<PreparedLayer> {
    match &layer.content {
        LayerContent::Animated(animation) => {
            for (n, frame) in animation.frames.iter().enumerate() {
                save_png(frame, &dir.join(format!("layer{index}_{n:05}.png")))?;
            }
            Ok(PreparedLayer {
                input: LayerInput::Sequence {
                    pattern: dir.join(format!("layer{index}_%05d.png")),
                    frame_rate: animation.frame_rate(),
                },
                text: None,
            })
        }
        LayerContent::Raster { image, .. } => {
            let path = dir.join(format!("layer{index}.png"));
            save_png(image, &path)?;
            Ok(PreparedLayer {
                input: LayerInput::Still { path },
                text: None,
            })
        }
        LayerContent::Text {
            text,
            corner_radius,
            background,
            alignment,
        } => {
            let (width, height) = pixel_size(layer.frame.size);
            let path = dir.join(format!("layer{index}.png"));
            save_png(
                &rounded_rect_image(width, height, *corner_radius, *background),
                &path,
            )?;
            let textfile = dir.join(format!("layer{index}.txt"));
            std::fs::write(&textfile, &text.text)?;
            Ok(PreparedLayer {
                input: LayerInput::Still { path },
                text: Some(TextDraw {
                    textfile,
                    font_size: text.font_size,
                    font_family: text.font_family.clone(),
                    color: text.color,
                    alignment: *alignment,
                }),
            })
        }
    }
}

fn save_png(image: &RgbaImage, path: &Path) -> MontageResult<()> {
    image
        .save(path)
        .map_err(|e| MontageError::data(format!("Failed to write {}: {e}", path.display())))
}

/// A `width`×`height` image filled with `color` inside a rounded rectangle.
pub fn rounded_rect_image(width: u32, height: u32, radius: f64, color: Color) -> RgbaImage {
    let (w, h) = (width as f64, height as f64);
    let r = radius.clamp(0.0, w.min(h) / 2.0);
    let fill = Rgba([color.r, color.g, color.b, color.a]);
    RgbaImage::from_fn(width, height, |x, y| {
        let px = x as f64 + 0.5;
        let py = y as f64 + 0.5;
        let dx = (r - px).max(px - (w - r)).max(0.0);
        let dy = (r - py).max(py - (h - r)).max(0.0);
        if dx * dx + dy * dy <= r * r {
            fill
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Arguments and bookkeeping for one ffmpeg run.
#[derive(Debug, Clone)]
pub struct FfmpegPlan {
    pub args: Vec<String>,
    pub expected_duration_secs: f64,
    pub total_frames: u64,
}

#[derive(Default)]
struct Graph {
    inputs: Vec<String>,
    filters: Vec<String>,
    count: usize,
}

impl Graph {
    fn add_input(&mut self, options: Vec<String>, path: &Path) -> usize {
        self.inputs.extend(options);
        self.inputs.push("-i".to_string());
        self.inputs.push(path.display().to_string());
        self.count += 1;
        self.count - 1
    }
}

/// Build the ffmpeg command line for `job`.
pub fn build_plan(
    job: &ExportJob,
    layers: &[PreparedLayer],
    settings: &EncoderSettings,
) -> MontageResult<FfmpegPlan> {
    let request = &job.request;
    let vc = request.video_composition.as_ref();
    let fps = vc
        .map(|vc| 1.0 / vc.frame_duration.seconds())
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(DEFAULT_FPS);
    let want_video = request.kind == MediaKind::Video;

    let mut graph = Graph::default();
    let mut output_options = Vec::new();
    let mut video_map = None;
    let mut audio_map = None;

    match &request.source {
        ExportSource::Asset(asset) => {
            let mut options = Vec::new();
            if let Some(range) = request.trim_range() {
                options.extend([
                    "-ss".to_string(),
                    format!("{:.3}", range.start.seconds()),
                    "-to".to_string(),
                    format!("{:.3}", range.end().seconds()),
                ]);
            }
            let input = graph.add_input(options, &asset.path);
            if want_video {
                video_map = Some(match vc {
                    Some(vc) => {
                        graph.filters.push(format!(
                            "[{input}:v:0]{}[vbase]",
                            scale_filter(vc.render_size)
                        ));
                        "[vbase]".to_string()
                    }
                    None => format!("{input}:v:0"),
                });
                audio_map = Some(format!("{input}:a:0?"));
            } else {
                audio_map = Some(format!("{input}:a:0"));
            }
        }
        ExportSource::Composition(composition) => {
            if want_video {
                let track = composition
                    .track(MediaKind::Video)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| MontageError::composition_track("no video segments to export"))?;
                let size = match vc {
                    Some(vc) => vc.render_size,
                    None => track
                        .preferred_transform
                        .apply_to_rect(montage_model::Rect::from_size(track.natural_size))
                        .size,
                };
                video_map = Some(video_chain(&mut graph, track, size, fps));
            }
            if let Some(track) = composition.track(MediaKind::Audio).filter(|t| !t.is_empty()) {
                audio_map = Some(audio_chain(&mut graph, track));
            }
            if let Some(range) = request.trim_range() {
                output_options.extend([
                    "-ss".to_string(),
                    format!("{:.3}", range.start.seconds()),
                    "-t".to_string(),
                    format!("{:.3}", range.duration.seconds()),
                ]);
            }
        }
    }

    if let (Some(vc), Some(base)) = (vc, video_map.as_ref()) {
        if want_video && !vc.layers.is_empty() {
            video_map = Some(overlay_chain(&mut graph, vc, layers, base.clone(), settings)?);
        }
    }

    let expected_duration_secs = job.expected_duration().seconds().max(0.0);
    let total_frames = if want_video {
        (expected_duration_secs * fps).round() as u64
    } else {
        0
    };

    let mut args: Vec<String> = [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.append(&mut graph.inputs);
    if !graph.filters.is_empty() {
        args.push("-filter_complex".to_string());
        args.push(graph.filters.join(";"));
    }
    if let Some(map) = video_map.filter(|_| want_video) {
        args.push("-map".to_string());
        args.push(map);
    }
    if let Some(map) = audio_map {
        args.push("-map".to_string());
        args.push(map);
    }
    args.append(&mut output_options);

    if want_video {
        if vc.is_some() {
            args.push("-r".to_string());
            args.push(format_rate(fps));
        }
        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "slow".to_string(),
            "-crf".to_string(),
            settings.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);
    } else {
        args.push("-vn".to_string());
    }
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", settings.audio_bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        job.output_path.display().to_string(),
    ]);

    tracing::debug!(
        inputs = graph.count,
        filters = graph.filters.len(),
        expected_duration_secs,
        total_frames,
        "Export plan built"
    );

    Ok(FfmpegPlan {
        args,
        expected_duration_secs,
        total_frames,
    })
}

fn video_chain(graph: &mut Graph, track: &CompositionTrack, size: Size, fps: f64) -> String {
    let orient = orientation_filter(&track.preferred_transform);
    let mut labels = Vec::new();
    let mut cursor = montage_model::MediaTime::ZERO;
    for (j, segment) in track.segments.iter().enumerate() {
        let input = graph.add_input(
            segment_options(segment, true),
            &segment.source_path,
        );
        let gap = (segment.target_start - cursor).seconds();
        let mut chain = format!("[{input}:{}]setpts=PTS-STARTPTS", segment.source_track);
        if let Some(orient) = orient {
            chain.push(',');
            chain.push_str(orient);
        }
        chain.push(',');
        chain.push_str(&scale_filter(size));
        chain.push_str(&format!(",fps={}", format_rate(fps)));
        if gap > 0.0 {
            chain.push_str(&format!(",tpad=start_duration={gap:.6}"));
        }
        chain.push_str(&format!("[v{j}]"));
        graph.filters.push(chain);
        labels.push(format!("[v{j}]"));
        cursor = segment.target_range().end();
    }
    concat(graph, &labels, "vcat", true)
}

fn audio_chain(graph: &mut Graph, track: &CompositionTrack) -> String {
    let mut labels = Vec::new();
    let mut cursor = montage_model::MediaTime::ZERO;
    for (j, segment) in track.segments.iter().enumerate() {
        let input = graph.add_input(segment_options(segment, false), &segment.source_path);
        let gap_ms = ((segment.target_start - cursor).seconds() * 1000.0).round() as i64;
        let mut chain = format!(
            "[{input}:{}]asetpts=PTS-STARTPTS,aformat=sample_rates={AUDIO_SAMPLE_RATE}:channel_layouts=stereo",
            segment.source_track
        );
        if gap_ms > 0 {
            chain.push_str(&format!(",adelay={gap_ms}:all=1"));
        }
        chain.push_str(&format!("[a{j}]"));
        graph.filters.push(chain);
        labels.push(format!("[a{j}]"));
        cursor = segment.target_range().end();
    }
    concat(graph, &labels, "acat", false)
}

fn segment_options(segment: &montage_model::TrackSegment, video: bool) -> Vec<String> {
    let mut options = vec![
        "-ss".to_string(),
        format!("{:.6}", segment.source_range.start.seconds()),
        "-t".to_string(),
        format!("{:.6}", segment.source_range.duration.seconds()),
    ];
    if video {
        options.push("-noautorotate".to_string());
    }
    options
}

fn concat(graph: &mut Graph, labels: &[String], out: &str, video: bool) -> String {
    if let [single] = labels {
        return single.clone();
    }
    let (v, a) = if video { (1, 0) } else { (0, 1) };
    graph.filters.push(format!(
        "{}concat=n={}:v={v}:a={a}[{out}]",
        labels.concat(),
        labels.len()
    ));
    format!("[{out}]")
}

fn overlay_chain(
    graph: &mut Graph,
    vc: &VideoComposition,
    layers: &[PreparedLayer],
    base: String,
    settings: &EncoderSettings,
) -> MontageResult<String> {
    if layers.len() != vc.layers.len() {
        return Err(MontageError::data(format!(
            "{} layer inputs prepared for {} layers",
            layers.len(),
            vc.layers.len()
        )));
    }

    let mut current = base;
    for (i, (layer, prepared)) in vc.layers.iter().zip(layers).enumerate() {
        let input = match &prepared.input {
            LayerInput::Still { path } => {
                graph.add_input(vec!["-loop".to_string(), "1".to_string()], path)
            }
            LayerInput::Sequence {
                pattern,
                frame_rate,
            } => graph.add_input(
                vec![
                    "-stream_loop".to_string(),
                    "-1".to_string(),
                    "-framerate".to_string(),
                    format_rate(*frame_rate),
                ],
                pattern,
            ),
        };

        let (width, height) = pixel_size(layer.frame.size);
        let mut chain = format!("[{input}:v]format=rgba,scale={width}:{height}");
        if let Some(text) = &prepared.text {
            chain.push(',');
            chain.push_str(&drawtext_filter(text, settings.font_file.as_deref()));
        }

        let placement = place_layer(vc, layer);
        if let Some((w, h, radians)) = placement.transform {
            chain.push_str(&format!(",scale={w}:{h}"));
            if radians != 0.0 {
                chain.push_str(&format!(
                    ",rotate={radians:.6}:ow={}:oh={}:c=none",
                    placement.width, placement.height
                ));
            }
        }
        chain.push_str(&format!("[l{i}]"));
        graph.filters.push(chain);

        let out = format!("[o{i}]");
        graph.filters.push(format!(
            "{current}[l{i}]overlay=x={}:y={}:shortest=1{out}",
            placement.x, placement.y
        ));
        current = out;
    }
    Ok(current)
}

/// Where a layer lands in the y-down output frame, after its transform.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    x: i64,
    y: i64,
    width: u32,
    height: u32,
    /// Scaled size and clockwise rotation, when the layer has a transform.
    transform: Option<(u32, u32, f64)>,
}

fn place_layer(vc: &VideoComposition, layer: &RenderLayer) -> Placement {
    let (left, top) = vc.top_left(layer);
    let size = layer.frame.size;
    let center_x = left + size.width / 2.0;
    let center_y = top + size.height / 2.0;

    match layer.transform.filter(|t| !t.is_identity()) {
        None => {
            let (width, height) = pixel_size(size);
            Placement {
                x: left.round() as i64,
                y: top.round() as i64,
                width,
                height,
                transform: None,
            }
        }
        Some(t) => {
            let (sx, sy) = t.scale_factors();
            let scaled = Size::new(size.width * sx, size.height * sy);
            // Layer space is y-up; the mirrored rotation reads clockwise once flipped.
            let radians = -t.rotation_degrees().to_radians();
            let bounds = rotated_bounds(scaled, radians);
            let (sw, sh) = pixel_size(scaled);
            let (bw, bh) = pixel_size(bounds);
            Placement {
                x: (center_x + t.tx - bounds.width / 2.0).round() as i64,
                y: (center_y - t.ty - bounds.height / 2.0).round() as i64,
                width: bw,
                height: bh,
                transform: Some((sw, sh, radians)),
            }
        }
    }
}

fn rotated_bounds(size: Size, radians: f64) -> Size {
    let (sin, cos) = radians.sin_cos();
    Size::new(
        (size.width * cos).abs() + (size.height * sin).abs(),
        (size.width * sin).abs() + (size.height * cos).abs(),
    )
}

fn drawtext_filter(text: &TextDraw, font_file: Option<&Path>) -> String {
    let x = match text.alignment {
        TextAlignment::Center => "(w-text_w)/2".to_string(),
        TextAlignment::Right => format!("w-text_w-{TEXT_INSET}"),
        TextAlignment::Left | TextAlignment::Justified => format!("{TEXT_INSET}"),
    };
    let mut filter = format!(
        "drawtext=textfile={}:expansion=none:fontsize={:.0}:fontcolor={}:x={x}:y=(h-text_h)/2",
        quote_filter_value(&text.textfile.display().to_string()),
        text.font_size,
        text.color.to_ffmpeg(),
    );
    if let Some(file) = font_file {
        filter.push_str(&format!(
            ":fontfile={}",
            quote_filter_value(&file.display().to_string())
        ));
    } else if let Some(family) = &text.font_family {
        filter.push_str(&format!(":font={}", quote_filter_value(family)));
    }
    filter
}

/// Quote a filter option value so `:`, `,` and `;` pass through literally.
fn quote_filter_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "'\\''"))
}

/// Rotation and flips that display frames stored with `transform` upright.
fn orientation_filter(transform: &AffineTransform) -> Option<&'static str> {
    let degrees = transform.rotation_degrees().round() as i64;
    match degrees.rem_euclid(360) {
        90 => Some("transpose=1"),
        180 => Some("hflip,vflip"),
        270 => Some("transpose=2"),
        _ => None,
    }
}

pub(crate) fn scale_filter(size: Size) -> String {
    let (w, h) = even_size(size);
    format!("scale={w}:{h},setsar=1")
}

fn pixel_size(size: Size) -> (u32, u32) {
    (
        size.width.round().max(1.0) as u32,
        size.height.round().max(1.0) as u32,
    )
}

/// H.264 with 4:2:0 chroma needs even dimensions.
pub(crate) fn even_size(size: Size) -> (u32, u32) {
    let even = |v: f64| ((v.round().max(2.0) as u32) / 2) * 2;
    (even(size.width), even(size.height))
}

pub(crate) fn format_rate(rate: f64) -> String {
    if (rate - rate.round()).abs() < 1e-9 {
        format!("{}", rate.round() as i64)
    } else {
        format!("{rate:.6}")
    }
}

/// Why an ffmpeg run did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FfmpegFailure {
    Cancelled,
    Failed(String),
}

/// Run ffmpeg with `plan`, reporting `-progress` output as it arrives.
pub(crate) fn run_ffmpeg(
    binary: &str,
    plan: &FfmpegPlan,
    progress: Option<&ProgressCallback>,
    cancel: Option<&AtomicBool>,
) -> Result<(), FfmpegFailure> {
    tracing::debug!(args = ?plan.args, "Running ffmpeg");
    let mut cmd = Command::new(binary);
    cmd.args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = std::time::Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| FfmpegFailure::Failed(format!("Failed to start {binary}: {e}")))?;

    tracing::info!(
        pid = child.id(),
        args_len = plan.args.len(),
        total_frames = plan.total_frames,
        "ffmpeg process started"
    );

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| FfmpegFailure::Failed("Failed to capture ffmpeg stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| FfmpegFailure::Failed("Failed to capture ffmpeg stderr".to_string()))?;

    // ffmpeg blocks once the stderr pipe fills up.
    let stderr_task = std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    });

    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut latest_progress = ProgressState::default();
    let mut last_progress_secs = 0.0f64;
    let mut last_progress_wall = std::time::Instant::now();
    loop {
        if cancel.map_or(false, |flag| flag.load(Ordering::SeqCst)) {
            tracing::info!("Cancelling ffmpeg");
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr_task.join();
            return Err(FfmpegFailure::Cancelled);
        }

        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|e| FfmpegFailure::Failed(format!("Failed reading ffmpeg progress: {e}")))?;
        if bytes == 0 {
            break;
        }

        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        latest_progress.update(key, value);
        if key == "progress" {
            if latest_progress.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = latest_progress.out_time_secs;
                last_progress_wall = std::time::Instant::now();
            }
            if let Some(cb) = progress {
                cb(progress_report(
                    &latest_progress,
                    plan.total_frames,
                    plan.expected_duration_secs,
                    start.elapsed().as_secs_f64(),
                ));
            }
            if last_progress_wall.elapsed().as_secs() >= 10 {
                tracing::warn!(
                    out_time_secs = latest_progress.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for 10s"
                );
                last_progress_wall = std::time::Instant::now();
            }
        }
    }

    let status = child
        .wait()
        .map_err(|e| FfmpegFailure::Failed(format!("Failed to wait on ffmpeg: {e}")))?;
    let stderr_output = stderr_task
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    if !status.success() {
        return Err(FfmpegFailure::Failed(format!(
            "ffmpeg failed (status {}): {}",
            status,
            stderr_output.trim()
        )));
    }

    tracing::info!(
        elapsed_secs = start.elapsed().as_secs_f64(),
        "ffmpeg finished"
    );
    if let Some(cb) = progress {
        cb(ExportProgress {
            progress: 1.0,
            frames_rendered: plan.total_frames,
            total_frames: plan.total_frames,
            eta_secs: 0.0,
            stage: ExportStage::Complete,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(
    state: &ProgressState,
    total_frames: u64,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> ExportProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let frames_rendered = (progress * total_frames as f64).round() as u64;
    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    ExportProgress {
        progress: if state.complete { 1.0 } else { progress },
        frames_rendered,
        total_frames,
        eta_secs,
        stage: if state.complete {
            ExportStage::Finalizing
        } else {
            ExportStage::Rendering
        },
    }
}
