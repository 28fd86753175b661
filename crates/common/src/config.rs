//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where generated outputs are written.
    pub caches_dir: PathBuf,

    /// Display geometry used to place overlays.
    pub display: DisplayConfig,

    /// Image-sequence generation settings.
    pub generation: GenerationDefaults,

    /// Export encoder settings.
    pub export: ExportDefaults,

    /// Live capture settings.
    pub capture: CaptureDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Geometry of the display overlays were authored on.
///
/// Overlay positions are expressed in display points. The density converts
/// them to pixels, and the display height is compared against the video
/// track's natural width to correct for rotated captures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Pixels per point.
    pub density: f64,

    /// Display height in points.
    pub height_points: f64,

    /// Output render width in pixels.
    pub render_width: u32,

    /// Output render height in pixels.
    pub render_height: u32,
}

/// Image-sequence generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    /// Declared frame rate for fixed-rate generation.
    pub fps: u32,

    /// Timescale used for presentation times.
    pub timescale: u32,

    /// Number of frames the encoder may hold before it stops reporting readiness.
    pub writer_queue_depth: usize,
}

/// Export encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// ffmpeg executable.
    pub ffmpeg_binary: String,

    /// ffprobe executable.
    pub ffprobe_binary: String,

    /// Frame rate of overlay compositions.
    pub overlay_frame_rate: u32,

    /// x264 constant rate factor; lower is higher quality.
    pub crf: u8,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Font file used for text overlays, when fontconfig lookup is not wanted.
    pub font_file: Option<PathBuf>,
}

/// Live capture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDefaults {
    /// Stop recording automatically after this many seconds.
    pub max_duration_secs: Option<f64>,

    /// Camera frame rate.
    pub fps: u32,

    /// Camera frame width.
    pub width: u32,

    /// Camera frame height.
    pub height: u32,

    /// Microphone sample rate.
    pub sample_rate: u32,

    /// Microphone channel count.
    pub channels: u16,

    /// Device node of the front camera.
    pub video_device_front: String,

    /// Device node of the back camera.
    pub video_device_back: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "montage_render=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            caches_dir: default_caches_dir(),
            display: DisplayConfig::default(),
            generation: GenerationDefaults::default(),
            export: ExportDefaults::default(),
            capture: CaptureDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        // A 3x portrait phone display: 375x812 points, 1125x2436 pixels.
        Self {
            density: 3.0,
            height_points: 812.0,
            render_width: 1125,
            render_height: 2436,
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            timescale: 600,
            writer_queue_depth: 8,
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
            overlay_frame_rate: 30,
            crf: 17,
            audio_bitrate_kbps: 192,
            font_file: None,
        }
    }
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            max_duration_secs: None,
            fps: 30,
            width: 1280,
            height: 720,
            sample_rate: 48000,
            channels: 1,
            video_device_front: "/dev/video0".to_string(),
            video_device_back: "/dev/video2".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("montage").join("config.json")
}

/// Default directory for generated outputs.
fn default_caches_dir() -> PathBuf {
    let base = std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".cache"));
    base.join("montage")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "display": { "density": 2.0 } }"#).unwrap();
        assert_eq!(config.display.density, 2.0);
        assert_eq!(config.display.height_points, 812.0);
        assert_eq!(config.generation.fps, 30);
        assert_eq!(config.generation.timescale, 600);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.capture.max_duration_secs = Some(15.0);
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.capture.max_duration_secs, Some(15.0));
    }

    #[test]
    fn test_unparseable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.logging.level, "info");
    }
}
