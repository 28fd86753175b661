//! Export requests, backends, and the exporter front door.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use montage_common::{FileManager, MediaKind, MontageError, MontageResult};
use montage_model::{Composition, MediaAsset, MediaTime, TimeRange};

use crate::overlay::VideoComposition;

/// Timescale trim bounds are expressed in.
pub const TRIM_TIMESCALE: u32 = 1000;

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Export progress report.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

/// What an export encodes.
#[derive(Debug, Clone)]
pub enum ExportSource {
    /// A file-backed asset, re-encoded as a whole.
    Asset(MediaAsset),
    /// A composition built by the compositor.
    Composition(Composition),
}

impl ExportSource {
    pub fn duration(&self) -> MediaTime {
        match self {
            ExportSource::Asset(asset) => asset.duration,
            ExportSource::Composition(composition) => composition.duration(),
        }
    }

    /// Whether the source carries any media of `kind`.
    pub fn has_media(&self, kind: MediaKind) -> bool {
        match self {
            ExportSource::Asset(asset) => asset.first_track(kind).is_some(),
            ExportSource::Composition(composition) => composition
                .track(kind)
                .map_or(false, |track| !track.is_empty()),
        }
    }
}

/// Parameters of one export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub source: ExportSource,
    pub kind: MediaKind,
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
    pub video_composition: Option<VideoComposition>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExportRequest {
    pub fn new(source: ExportSource, kind: MediaKind) -> Self {
        Self {
            source,
            kind,
            start_secs: None,
            end_secs: None,
            video_composition: None,
            cancel: None,
        }
    }

    pub fn with_trim(mut self, start_secs: Option<f64>, end_secs: Option<f64>) -> Self {
        self.start_secs = start_secs;
        self.end_secs = end_secs;
        self
    }

    pub fn with_video_composition(mut self, video_composition: VideoComposition) -> Self {
        self.video_composition = Some(video_composition);
        self
    }

    /// Flag that cancels the export when set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The trim range, present only when both bounds are given.
    pub fn trim_range(&self) -> Option<TimeRange> {
        let (start, end) = self.start_secs.zip(self.end_secs)?;
        TimeRange::from_start_end(
            MediaTime::from_seconds(start, TRIM_TIMESCALE),
            MediaTime::from_seconds(end, TRIM_TIMESCALE),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    fn validate(&self) -> MontageResult<()> {
        if let (Some(start), Some(end)) = (self.start_secs, self.end_secs) {
            if !(start.is_finite() && end.is_finite()) || start < 0.0 || end < start {
                return Err(MontageError::input_parameters(format!(
                    "invalid trim range {start}..{end}"
                )));
            }
        }
        Ok(())
    }
}

/// An export request bound to its output path.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub request: ExportRequest,
    pub output_path: PathBuf,
}

impl ExportJob {
    /// Duration the output should have: the trim length, or the whole source.
    pub fn expected_duration(&self) -> MediaTime {
        match self.request.trim_range() {
            Some(range) => {
                let available = self.request.source.duration() - range.start;
                range.duration.min(available.max(MediaTime::ZERO))
            }
            None => self.request.source.duration(),
        }
    }
}

/// How an export session ended.
#[derive(Debug, Clone)]
pub enum ExportStatus {
    Completed(MediaAsset),
    Failed(String),
    Cancelled(String),
}

/// One configured encode, run exactly once.
#[async_trait]
pub trait ExportSession: Send {
    async fn run(self: Box<Self>, progress: Option<ProgressCallback>) -> ExportStatus;
}

/// Builds export sessions.
pub trait ExportBackend: Send + Sync {
    fn name(&self) -> &str;

    /// A session for `job`, or `None` when no encoder can be constructed.
    fn create_session(&self, job: ExportJob) -> Option<Box<dyn ExportSession>>;
}

/// Encodes sources to fresh files under the file manager's control.
#[derive(Clone)]
pub struct Exporter {
    backend: Arc<dyn ExportBackend>,
    files: Arc<dyn FileManager>,
}

impl Exporter {
    pub fn new(backend: Arc<dyn ExportBackend>, files: Arc<dyn FileManager>) -> Self {
        Self { backend, files }
    }

    pub fn files(&self) -> &Arc<dyn FileManager> {
        &self.files
    }

    pub async fn export(&self, request: ExportRequest) -> MontageResult<MediaAsset> {
        self.export_with_progress(request, None).await
    }

    pub async fn export_with_progress(
        &self,
        request: ExportRequest,
        progress: Option<ProgressCallback>,
    ) -> MontageResult<MediaAsset> {
        request.validate()?;

        let output_path = self
            .files
            .unique_url(request.kind)
            .ok_or_else(|| MontageError::data("no output path available"))?;

        tracing::info!(
            output = %output_path.display(),
            kind = %request.kind,
            backend = self.backend.name(),
            trimmed = request.trim_range().is_some(),
            overlays = request.video_composition.as_ref().map_or(0, |vc| vc.layers.len()),
            "Starting export"
        );

        let job = ExportJob {
            request,
            output_path: output_path.clone(),
        };
        let session = self.backend.create_session(job).ok_or_else(|| {
            MontageError::export_session(format!(
                "{} backend cannot encode this source",
                self.backend.name()
            ))
        })?;

        match session.run(progress).await {
            ExportStatus::Completed(asset) => {
                tracing::info!(
                    output = %asset.path.display(),
                    duration_secs = asset.duration.seconds(),
                    "Export complete"
                );
                Ok(asset)
            }
            ExportStatus::Failed(message) | ExportStatus::Cancelled(message) => {
                tracing::error!(
                    output = %output_path.display(),
                    %message,
                    "Export did not complete"
                );
                if output_path.exists() {
                    if let Err(e) = self.files.remove_asset(&output_path) {
                        tracing::warn!(error = %e, "Failed to remove partial export");
                    }
                }
                Err(MontageError::custom(message))
            }
        }
    }
}
