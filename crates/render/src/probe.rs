//! Source asset inspection via ffprobe.

use std::path::Path;
use std::process::Command;

use montage_common::{MediaKind, MontageError, MontageResult};
use montage_model::{AffineTransform, AssetTrack, MediaAsset, MediaTime, Size, TimeRange};
use serde::Deserialize;

/// Timescale probed durations are expressed in.
pub const PROBE_TIMESCALE: u32 = 600;

/// Opens file-backed assets and reports their duration and tracks.
pub trait AssetProber: Send + Sync {
    fn probe(&self, path: &Path) -> MontageResult<MediaAsset>;
}

/// [`AssetProber`] backed by the `ffprobe` executable.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: String,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl AssetProber for FfprobeProber {
    fn probe(&self, path: &Path) -> MontageResult<MediaAsset> {
        if !path.exists() {
            return Err(MontageError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .map_err(|e| MontageError::asset(format!("Failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(MontageError::asset(format!(
                "{} failed for {}: {}",
                self.binary,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let asset = parse_probe_output(path, &raw)?;
        tracing::debug!(
            path = %path.display(),
            duration_secs = asset.duration.seconds(),
            tracks = asset.tracks.len(),
            "Probed asset"
        );
        Ok(asset)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    start_time: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(path: &Path, raw: &str) -> MontageResult<MediaAsset> {
    let probe: ProbeOutput = serde_json::from_str(raw)?;

    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_secs);

    let mut tracks = Vec::new();
    for stream in &probe.streams {
        let kind = match stream.codec_type.as_deref() {
            Some("video") => MediaKind::Video,
            Some("audio") => MediaKind::Audio,
            _ => continue,
        };
        // Still images attached as cover art are reported as video streams
        // without a duration; they are not playable tracks.
        let Some(duration) = stream
            .duration
            .as_deref()
            .and_then(parse_secs)
            .or(format_duration)
        else {
            continue;
        };
        let start = stream
            .start_time
            .as_deref()
            .and_then(parse_secs)
            .unwrap_or(0.0)
            .max(0.0);

        let natural_size = match kind {
            MediaKind::Video => Size::new(
                stream.width.unwrap_or(0) as f64,
                stream.height.unwrap_or(0) as f64,
            ),
            MediaKind::Audio => Size::ZERO,
        };
        let rotation = stream
            .side_data_list
            .iter()
            .find_map(|s| s.rotation)
            .or_else(|| stream.tags.get("rotate").and_then(|r| r.parse::<f64>().ok()).map(|r| -r))
            .unwrap_or(0.0);

        let time_range = TimeRange::new(
            MediaTime::from_seconds(start, PROBE_TIMESCALE),
            MediaTime::from_seconds(duration, PROBE_TIMESCALE),
        )
        .ok_or_else(|| MontageError::asset(format!("negative duration in {}", path.display())))?;

        tracks.push(AssetTrack {
            index: stream.index,
            kind,
            time_range,
            natural_size,
            preferred_transform: orientation_transform(rotation, natural_size),
            codec: stream.codec_name.clone(),
        });
    }

    let duration = format_duration
        .map(|d| MediaTime::from_seconds(d, PROBE_TIMESCALE))
        .or_else(|| tracks.iter().map(|t| t.time_range.end()).max())
        .ok_or_else(|| MontageError::asset(format!("{} has no duration", path.display())))?;

    Ok(MediaAsset::new(path, duration, tracks))
}

/// Preferred transform for a stream whose display matrix rotates it by
/// `rotation` degrees counter-clockwise (ffprobe convention). The result
/// maps the stored frame onto the display frame in a y-down space, with the
/// rotated frame translated back into the positive quadrant.
pub fn orientation_transform(rotation: f64, natural: Size) -> AffineTransform {
    let clockwise = (-rotation).rem_euclid(360.0).round() as i64;
    match clockwise {
        90 => AffineTransform::new(0.0, 1.0, -1.0, 0.0, natural.height, 0.0),
        180 => AffineTransform::new(-1.0, 0.0, 0.0, -1.0, natural.width, natural.height),
        270 => AffineTransform::new(0.0, -1.0, 1.0, 0.0, 0.0, natural.width),
        _ => AffineTransform::IDENTITY,
    }
}

fn parse_secs(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_model::{Point, Rect};

    const PORTRAIT_PHONE_CLIP: &str = r#"{
        "streams": [
            {
                "index": 0, "codec_type": "video", "codec_name": "h264",
                "width": 1920, "height": 1080, "start_time": "0.000000", "duration": "10.000000",
                "side_data_list": [ { "side_data_type": "Display Matrix", "rotation": -90 } ]
            },
            {
                "index": 1, "codec_type": "audio", "codec_name": "aac",
                "start_time": "0.000000", "duration": "9.980000"
            },
            { "index": 2, "codec_type": "data" }
        ],
        "format": { "duration": "10.000000" }
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let asset = parse_probe_output(Path::new("clip.mov"), PORTRAIT_PHONE_CLIP).unwrap();
        assert_eq!(asset.duration, MediaTime::new(10, 1));
        assert_eq!(asset.tracks.len(), 2);

        let video = asset.first_track(MediaKind::Video).unwrap();
        assert_eq!(video.natural_size, Size::new(1920.0, 1080.0));
        assert_eq!(video.codec.as_deref(), Some("h264"));
        assert!((video.preferred_transform.rotation_degrees() - 90.0).abs() < 1e-9);

        let audio = asset.first_track(MediaKind::Audio).unwrap();
        assert_eq!(audio.index, 1);
        assert_eq!(audio.time_range.duration, MediaTime::new(5988, 600));
    }

    #[test]
    fn test_orientation_transform_stays_in_positive_quadrant() {
        let natural = Size::new(1920.0, 1080.0);
        for rotation in [0.0, -90.0, 90.0, 180.0] {
            let t = orientation_transform(rotation, natural);
            let rect = t.apply_to_rect(Rect::from_size(natural));
            assert!(rect.origin.x.abs() < 1e-9, "rotation {rotation}");
            assert!(rect.origin.y.abs() < 1e-9, "rotation {rotation}");
        }
        let portrait = orientation_transform(-90.0, natural);
        let corner = portrait.apply_to_point(Point::new(0.0, 0.0));
        assert_eq!(corner, Point::new(1080.0, 0.0));
    }

    #[test]
    fn test_legacy_rotate_tag() {
        let raw = r#"{
            "streams": [ { "index": 0, "codec_type": "video", "width": 640, "height": 480,
                           "duration": "1.0", "tags": { "rotate": "90" } } ],
            "format": { "duration": "1.0" }
        }"#;
        let asset = parse_probe_output(Path::new("old.mp4"), raw).unwrap();
        let video = asset.first_track(MediaKind::Video).unwrap();
        assert!((video.preferred_transform.rotation_degrees() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_duration_is_an_asset_error() {
        let err = parse_probe_output(Path::new("x"), r#"{"streams": []}"#).unwrap_err();
        assert_eq!(err.kind_name(), "asset");
    }
}
