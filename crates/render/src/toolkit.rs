//! `Montage`: one entry point per offline feature.
//!
//! Each method assembles parameters and delegates to the compositor,
//! generator and exporter. [`Montage::spawn`] runs any of them in the
//! background and delivers the result to a completion exactly once.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use montage_common::{
    AppConfig, CachesFileManager, FileManager, GenerationDefaults, MediaKind, MontageError,
    MontageResult,
};
use montage_model::{DisplayGeometry, MediaAsset, MediaTime, Overlay};
use tokio::task::JoinHandle;

use crate::compositor::{compose_overlays, merge_assets, merge_pair};
use crate::export::{ExportRequest, ExportSource, Exporter};
use crate::ffmpeg::{EncoderSettings, FfmpegBackend};
use crate::generate::{
    generate_video, FfmpegFrameWriterFactory, FrameQueue, FrameWriterFactory, GeneratedVideo,
};
use crate::probe::{AssetProber, FfprobeProber};

/// Media composition toolkit.
#[derive(Clone)]
pub struct Montage {
    exporter: Exporter,
    prober: Arc<dyn AssetProber>,
    frames: Arc<dyn FrameWriterFactory>,
    geometry: DisplayGeometry,
    generation: GenerationDefaults,
    overlay_frame_rate: u32,
}

impl Montage {
    pub fn new(
        exporter: Exporter,
        prober: Arc<dyn AssetProber>,
        frames: Arc<dyn FrameWriterFactory>,
        geometry: DisplayGeometry,
    ) -> Self {
        Self {
            exporter,
            prober,
            frames,
            geometry,
            generation: GenerationDefaults::default(),
            overlay_frame_rate: 30,
        }
    }

    /// ffmpeg-backed toolkit writing under the configured caches directory.
    pub fn from_config(config: &AppConfig) -> Self {
        let geometry = DisplayGeometry::from(&config.display);
        let settings = EncoderSettings::from(&config.export);
        let files: Arc<dyn FileManager> = Arc::new(CachesFileManager::new(&config.caches_dir));
        let prober: Arc<dyn AssetProber> =
            Arc::new(FfprobeProber::new(&config.export.ffprobe_binary));
        let backend = Arc::new(FfmpegBackend::new(
            &config.export.ffmpeg_binary,
            prober.clone(),
            settings.clone(),
        ));
        let frames = Arc::new(FfmpegFrameWriterFactory {
            binary: config.export.ffmpeg_binary.clone(),
            render_size: geometry.render_size,
            fps: config.generation.fps,
            queue_depth: config.generation.writer_queue_depth,
            settings,
        });

        Self::new(Exporter::new(backend, files), prober, frames, geometry)
            .with_generation(config.generation.clone())
            .with_overlay_frame_rate(config.export.overlay_frame_rate)
    }

    pub fn with_generation(mut self, generation: GenerationDefaults) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_overlay_frame_rate(mut self, fps: u32) -> Self {
        self.overlay_frame_rate = fps.max(1);
        self
    }

    pub fn geometry(&self) -> &DisplayGeometry {
        &self.geometry
    }

    pub fn files(&self) -> &Arc<dyn FileManager> {
        self.exporter.files()
    }

    /// Inspect a file-backed asset.
    pub fn open(&self, path: &Path) -> MontageResult<MediaAsset> {
        self.prober.probe(path)
    }

    /// Concatenate `assets` in order and export the result as `kind`.
    pub async fn merge(&self, assets: &[MediaAsset], kind: MediaKind) -> MontageResult<MediaAsset> {
        let composition = merge_assets(assets)?.into_composition()?;
        self.exporter
            .export(ExportRequest::new(ExportSource::Composition(composition), kind))
            .await
    }

    /// Combine the picture of `video` with the sound of `audio`.
    pub async fn merge_pair(
        &self,
        video: &MediaAsset,
        audio: &MediaAsset,
    ) -> MontageResult<MediaAsset> {
        let composition = merge_pair(video, audio)?;
        self.exporter
            .export(ExportRequest::new(
                ExportSource::Composition(composition),
                MediaKind::Video,
            ))
            .await
    }

    /// Export the part of `asset` between `start` and `end` seconds.
    pub async fn crop(
        &self,
        asset: &MediaAsset,
        kind: MediaKind,
        start: f64,
        end: f64,
    ) -> MontageResult<MediaAsset> {
        if !(start.is_finite() && end.is_finite()) || start < 0.0 || end <= start {
            return Err(MontageError::input_parameters(format!(
                "crop range {start}..{end} is empty or invalid"
            )));
        }
        self.exporter
            .export(
                ExportRequest::new(ExportSource::Asset(asset.clone()), kind)
                    .with_trim(Some(start), Some(end)),
            )
            .await
    }

    /// Burn `overlays` into `asset`, back to front in list order.
    pub async fn add_overlays(
        &self,
        overlays: &[Overlay],
        asset: &MediaAsset,
    ) -> MontageResult<MediaAsset> {
        let (composition, video_composition) = compose_overlays(asset, overlays, &self.geometry)?;
        self.exporter
            .export(
                ExportRequest::new(ExportSource::Composition(composition), MediaKind::Video)
                    .with_video_composition(
                        video_composition.with_frame_rate(self.overlay_frame_rate),
                    ),
            )
            .await
    }

    /// Video showing `images` one per frame at the configured frame rate.
    pub async fn generate_video(&self, images: Vec<RgbaImage>) -> MontageResult<MediaAsset> {
        let queue = FrameQueue::fixed_rate(images, self.generation.fps, self.generation.timescale)?;
        let generated = generate_video(queue, self.frames.as_ref(), self.files().as_ref()).await?;
        Ok(self.describe(generated))
    }

    /// Video showing `image` for `duration`.
    pub async fn generate_video_with_duration(
        &self,
        image: RgbaImage,
        duration: MediaTime,
    ) -> MontageResult<MediaAsset> {
        let queue = FrameQueue::hold(image, duration, self.generation.timescale)?;
        let generated = generate_video(queue, self.frames.as_ref(), self.files().as_ref()).await?;
        Ok(self.describe(generated))
    }

    fn describe(&self, generated: GeneratedVideo) -> MediaAsset {
        self.prober.probe(&generated.path).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Using generated timeline for asset duration");
            MediaAsset::new(generated.path, generated.duration, Vec::new())
        })
    }

    /// Run `operation` on a tokio worker and hand its result to `completion`.
    ///
    /// `completion` runs exactly once, also when the operation panics.
    pub fn spawn<T, F, C>(operation: F, completion: C) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: Future<Output = MontageResult<T>> + Send + 'static,
        C: FnOnce(MontageResult<T>) + Send + 'static,
    {
        tokio::spawn(async move {
            let result = match tokio::spawn(operation).await {
                Ok(result) => result,
                Err(e) => Err(MontageError::custom(format!("Operation aborted: {e}"))),
            };
            if let Err(e) = &result {
                tracing::debug!(kind = e.kind_name(), error = %e, "Operation failed");
            }
            completion(result);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::testing::{FakeBackend, FakeOutcome, MemoryFiles};
    use crate::export::{ExportBackend, ExportJob, ExportSession, ExportStatus, ProgressCallback};
    use crate::ffmpeg::{build_plan, FfmpegPlan};
    use crate::generate::testing::RecordingFactory;
    use montage_model::{
        AffineTransform, AssetTrack, ImageSequenceOverlay, OverlayGeometry, Point, Size, TimeRange,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoProbe;

    impl AssetProber for NoProbe {
        fn probe(&self, path: &Path) -> MontageResult<MediaAsset> {
            Err(MontageError::asset(format!("cannot open {}", path.display())))
        }
    }

    struct Harness {
        montage: Montage,
        files: Arc<MemoryFiles>,
        backend: Arc<FakeBackend>,
        frames: Arc<RecordingFactory>,
    }

    fn harness(outcome: FakeOutcome) -> Harness {
        let files = Arc::new(MemoryFiles::default());
        let backend = Arc::new(FakeBackend::new(outcome));
        let frames = Arc::new(RecordingFactory::default());
        let montage = Montage::new(
            Exporter::new(backend.clone(), files.clone()),
            Arc::new(NoProbe),
            frames.clone(),
            DisplayGeometry::default(),
        );
        Harness {
            montage,
            files,
            backend,
            frames,
        }
    }

    fn clip(name: &str, secs: i64) -> MediaAsset {
        let range = TimeRange::from_zero(MediaTime::new(secs, 1)).unwrap();
        MediaAsset::new(
            name,
            MediaTime::new(secs, 1),
            vec![
                AssetTrack {
                    index: 0,
                    kind: MediaKind::Video,
                    time_range: range,
                    natural_size: Size::new(1920.0, 1080.0),
                    preferred_transform: AffineTransform::IDENTITY,
                    codec: None,
                },
                AssetTrack {
                    index: 1,
                    kind: MediaKind::Audio,
                    time_range: range,
                    natural_size: Size::ZERO,
                    preferred_transform: AffineTransform::IDENTITY,
                    codec: None,
                },
            ],
        )
    }

    /// Builds the real ffmpeg plan for each job. Its sessions report the
    /// window the plan's seek arguments select, as ffmpeg would encode it.
    #[derive(Default)]
    struct PlanningBackend {
        plans: Mutex<Vec<FfmpegPlan>>,
    }

    impl ExportBackend for PlanningBackend {
        fn name(&self) -> &str {
            "planning"
        }

        fn create_session(&self, job: ExportJob) -> Option<Box<dyn ExportSession>> {
            let plan = build_plan(&job, &[], &EncoderSettings::default()).ok()?;
            self.plans.lock().unwrap().push(plan.clone());
            Some(Box::new(PlannedSession {
                plan,
                output: job.output_path,
            }))
        }
    }

    struct PlannedSession {
        plan: FfmpegPlan,
        output: PathBuf,
    }

    #[async_trait::async_trait]
    impl ExportSession for PlannedSession {
        async fn run(self: Box<Self>, _progress: Option<ProgressCallback>) -> ExportStatus {
            match selected_window(&self.plan.args) {
                Some(duration) => {
                    ExportStatus::Completed(MediaAsset::new(self.output, duration, Vec::new()))
                }
                None => ExportStatus::Failed("plan selects no window".to_string()),
            }
        }
    }

    fn seconds_after(args: &[String], flag: &str) -> Option<f64> {
        let i = args.iter().position(|a| a == flag)?;
        args.get(i + 1)?.parse().ok()
    }

    fn selected_window(args: &[String]) -> Option<MediaTime> {
        let start = seconds_after(args, "-ss")?;
        let end = seconds_after(args, "-to")
            .or_else(|| seconds_after(args, "-t").map(|length| start + length))?;
        Some(MediaTime::from_seconds(end - start, 1000))
    }

    #[tokio::test]
    async fn test_crop_two_to_five_is_three_seconds() {
        let backend = Arc::new(PlanningBackend::default());
        let montage = Montage::new(
            Exporter::new(backend.clone(), Arc::new(MemoryFiles::default())),
            Arc::new(NoProbe),
            Arc::new(RecordingFactory::default()),
            DisplayGeometry::default(),
        );

        let asset = montage
            .crop(&clip("in.mov", 10), MediaKind::Video, 2.0, 5.0)
            .await
            .unwrap();
        assert_eq!(asset.duration, MediaTime::new(3, 1));

        let plans = backend.plans.lock().unwrap();
        let args = &plans[0].args;
        let seek = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(seek < input, "trim must seek the input: {args:?}");
        assert_eq!(args[seek + 1], "2.000");
        assert_eq!(seconds_after(args, "-to"), Some(5.0));
        assert_eq!(args[input + 1], "in.mov");
        assert!((plans[0].expected_duration_secs - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_crop_rejects_empty_range() {
        let h = harness(FakeOutcome::Succeed);
        let err = h
            .montage
            .crop(&clip("in.mov", 10), MediaKind::Video, 5.0, 5.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "input_parameters");
        assert!(h.files.issued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_empty_does_no_io() {
        let h = harness(FakeOutcome::Succeed);
        let err = h.montage.merge(&[], MediaKind::Video).await.unwrap_err();
        assert_eq!(err.kind_name(), "input_parameters");
        assert!(h.files.issued.lock().unwrap().is_empty());
        assert!(h.backend.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_exports_concatenation() {
        let h = harness(FakeOutcome::Succeed);
        let asset = h
            .montage
            .merge(&[clip("a.mov", 2), clip("b.mov", 3)], MediaKind::Video)
            .await
            .unwrap();
        assert_eq!(asset.duration, MediaTime::new(5, 1));
        let jobs = h.backend.jobs.lock().unwrap();
        assert!(matches!(jobs[0].request.source, ExportSource::Composition(_)));
    }

    #[tokio::test]
    async fn test_merge_with_failures_is_not_exported() {
        let h = harness(FakeOutcome::Succeed);
        let mut broken = clip("broken.mov", 2);
        broken.tracks[0].time_range =
            TimeRange::new(MediaTime::new(30, 1), MediaTime::new(1, 1)).unwrap();

        let err = h
            .montage
            .merge(&[broken, clip("b.mov", 3)], MediaKind::Video)
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "composition_track");
        assert!(h.backend.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_failure_is_custom() {
        let h = harness(FakeOutcome::Fail("disk full".to_string()));
        let err = h
            .montage
            .merge_pair(&clip("v.mov", 4), &clip("a.mov", 2))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn test_add_overlays_attaches_layers() {
        let h = harness(FakeOutcome::Succeed);
        let montage = h.montage.clone().with_overlay_frame_rate(60);
        let overlay = Overlay::ImageSequence(ImageSequenceOverlay {
            geometry: OverlayGeometry {
                center: Point::new(100.0, 100.0),
                size: Size::new(40.0, 40.0),
                transform: None,
            },
            images: vec![RgbaImage::new(2, 2)],
            duration_secs: 1.0,
        });
        montage
            .add_overlays(&[overlay.clone(), overlay], &clip("in.mov", 3))
            .await
            .unwrap();

        let jobs = h.backend.jobs.lock().unwrap();
        let vc = jobs[0].request.video_composition.as_ref().unwrap();
        assert_eq!(vc.layers.len(), 2);
        assert_eq!(vc.frame_duration, MediaTime::new(1, 60));
        assert_eq!(jobs[0].request.kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn test_generate_video_rejects_empty_list() {
        let h = harness(FakeOutcome::Succeed);
        let err = h.montage.generate_video(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind_name(), "input_parameters");
        assert!(h.files.issued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_with_duration() {
        let h = harness(FakeOutcome::Succeed);
        let asset = h
            .montage
            .generate_video_with_duration(RgbaImage::new(4, 4), MediaTime::new(2, 1))
            .await
            .unwrap();
        assert_eq!(asset.duration, MediaTime::new(2, 1));
        assert_eq!(
            *h.frames.appended.lock().unwrap(),
            vec![MediaTime::ZERO, MediaTime::new(1, 1)]
        );
    }

    #[tokio::test]
    async fn test_spawn_completes_once() {
        let h = harness(FakeOutcome::Succeed);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let montage = h.montage.clone();
        Montage::spawn(
            async move { montage.crop(&clip("in.mov", 10), MediaKind::Audio, 1.0, 2.0).await },
            move |result| {
                seen.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(result.map(|asset| asset.duration));
            },
        )
        .await
        .unwrap();

        assert_eq!(rx.await.unwrap().unwrap(), MediaTime::new(1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_reports_panics() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        Montage::spawn(
            async {
                if true {
                    panic!("boom");
                }
                Ok(())
            },
            move |result: MontageResult<()>| {
                let _ = tx.send(result);
            },
        );
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind_name(), "custom");
    }
}
