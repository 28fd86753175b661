//! Recording session state machine.
//!
//! A [`CaptureSession`] moves through
//! `Idle → Configuring → Running → Recording → Stopping → Running`.
//! All session state is mutated by a single owner: devices only push events
//! into a channel, and [`run_session`] feeds them to
//! [`CaptureSession::handle_event`] one at a time.
//!
//! Every device build gets its own media channel. Buffers still queued when
//! the device is torn down are discarded with the channel, and buffers queued
//! while the session was only `Running` are discarded when recording starts.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use montage_common::{CaptureDefaults, FileManager, MediaKind, MontageError, MontageResult};
use montage_model::{AffineTransform, AssetTrack, MediaAsset, MediaTime, Size, TimeRange};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::{
    default_preview, CaptureDevice, CaptureOutputs, DeviceFactory, PreviewSurface,
};
use crate::event::{
    CameraPosition, CaptureEvent, CaptureSource, FlashMode, Mirroring, SampleOutcome,
    SessionNotification,
};
use crate::writer::{SampleWriter, WriterFactory, WriterSettings};

/// Timescale used for durations read from configuration.
const CONFIG_TIMESCALE: u32 = 600;

/// Configuration for a capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Stop automatically once this much media has been recorded.
    pub max_duration: Option<MediaTime>,

    pub writer: WriterSettings,

    /// Media buffers held between the device and the session.
    pub media_queue_depth: usize,

    pub metadata_queue_depth: usize,
}

impl From<&CaptureDefaults> for CaptureConfig {
    fn from(defaults: &CaptureDefaults) -> Self {
        Self {
            max_duration: defaults
                .max_duration_secs
                .filter(|secs| *secs > 0.0)
                .map(|secs| MediaTime::from_seconds(secs, CONFIG_TIMESCALE)),
            writer: WriterSettings::from(defaults),
            media_queue_depth: 64,
            metadata_queue_depth: 16,
        }
    }
}

/// State of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    /// No devices or writer.
    Idle,
    /// Devices and writer are being (re)built.
    Configuring,
    /// Devices are delivering; buffers are not recorded.
    Running,
    /// Buffers are appended to the writer.
    Recording,
    /// The writer is being finalized.
    Stopping,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub appended: u64,
    pub dropped: u64,
}

/// Per-recording buffer counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub video: KindStats,
    pub audio: KindStats,
}

impl CaptureStats {
    fn kind_mut(&mut self, kind: MediaKind) -> &mut KindStats {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }

    pub fn appended(&self) -> u64 {
        self.video.appended + self.audio.appended
    }

    pub fn dropped(&self) -> u64 {
        self.video.dropped + self.audio.dropped
    }

    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.appended() + self.dropped();
        if total == 0 {
            return 0.0;
        }
        self.dropped() as f64 / total as f64 * 100.0
    }
}

/// A camera and microphone session that records takes into movie files.
pub struct CaptureSession {
    config: CaptureConfig,
    devices: Arc<dyn DeviceFactory>,
    writers: Arc<dyn WriterFactory>,
    files: Arc<dyn FileManager>,
    preview: Arc<dyn PreviewSurface>,
    notifier: Option<mpsc::UnboundedSender<SessionNotification>>,

    state: CaptureState,
    position: CameraPosition,
    flash_mode: FlashMode,
    is_recording: bool,
    origin: Option<MediaTime>,
    latest: Option<MediaTime>,
    end: Option<MediaTime>,
    started_at: Option<DateTime<Utc>>,
    stats: CaptureStats,

    device: Option<Box<dyn CaptureDevice>>,
    writer: Option<Box<dyn SampleWriter>>,
    metadata_task: Option<JoinHandle<()>>,
    media_rx: Option<mpsc::Receiver<CaptureEvent>>,
}

impl CaptureSession {
    pub fn new(
        config: CaptureConfig,
        devices: Arc<dyn DeviceFactory>,
        writers: Arc<dyn WriterFactory>,
        files: Arc<dyn FileManager>,
    ) -> Self {
        Self {
            config,
            devices,
            writers,
            files,
            preview: default_preview(),
            notifier: None,
            state: CaptureState::Idle,
            position: CameraPosition::Unspecified,
            flash_mode: FlashMode::Off,
            is_recording: false,
            origin: None,
            latest: None,
            end: None,
            started_at: None,
            stats: CaptureStats::default(),
            device: None,
            writer: None,
            metadata_task: None,
            media_rx: None,
        }
    }

    pub fn with_preview(mut self, preview: Arc<dyn PreviewSurface>) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_notifications(
        mut self,
        notifier: mpsc::UnboundedSender<SessionNotification>,
    ) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Next event from the current device.
    ///
    /// Returns `None` when no device is installed or the device has closed
    /// its media channel.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        match self.media_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn position(&self) -> CameraPosition {
        self.position
    }

    pub fn flash_mode(&self) -> FlashMode {
        self.flash_mode
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Timestamp of the first buffer of the current recording.
    pub fn session_origin(&self) -> Option<MediaTime> {
        self.origin
    }

    pub fn last_timestamp(&self) -> Option<MediaTime> {
        self.latest
    }

    pub fn recording_started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Tear down whatever is running and build devices, writer, and preview
    /// for `position`. Ends in `Running`.
    ///
    /// Must be called within a tokio runtime.
    pub async fn setup_capture_session(&mut self, position: CameraPosition) -> MontageResult<()> {
        if matches!(self.state, CaptureState::Recording | CaptureState::Stopping) {
            return Err(MontageError::capture(
                "cannot reconfigure a session while recording",
            ));
        }
        self.rebuild(position)
    }

    fn rebuild(&mut self, position: CameraPosition) -> MontageResult<()> {
        self.state = CaptureState::Configuring;
        self.teardown();

        let mirroring = Mirroring::for_position(position);
        if let Err(e) = self.build(position, mirroring) {
            self.teardown();
            self.state = CaptureState::Idle;
            tracing::error!(error = %e, ?position, "Capture session setup failed");
            return Err(e);
        }

        self.position = position;
        self.state = CaptureState::Running;
        tracing::info!(?position, mirrored = mirroring.video_mirrored, "Capture session running");
        self.notify(SessionNotification::Ready { position });
        Ok(())
    }

    fn build(&mut self, position: CameraPosition, mirroring: Mirroring) -> MontageResult<()> {
        let path = self
            .files
            .unique_url(MediaKind::Video)
            .ok_or_else(|| MontageError::data("no output path available for recording"))?;
        let writer = self.writers.create_writer(&path, &self.config.writer)?;
        let mut device = self.devices.open(position, mirroring)?;

        let (media_tx, media_rx) = mpsc::channel(self.config.media_queue_depth.max(1));
        let (metadata_tx, mut metadata_rx) =
            mpsc::channel(self.config.metadata_queue_depth.max(1));
        self.metadata_task = Some(tokio::spawn(async move {
            while let Some(event) = metadata_rx.recv().await {
                detect_faces(&event);
            }
        }));

        device.start(CaptureOutputs {
            media: media_tx,
            metadata: metadata_tx,
        })?;
        self.preview.attach(position, mirroring);

        tracing::debug!(output = %path.display(), "Writer installed");
        self.device = Some(device);
        self.writer = Some(writer);
        self.media_rx = Some(media_rx);
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop() {
                tracing::warn!(error = %e, "Failed to stop capture device");
            }
        }
        if let Some(task) = self.metadata_task.take() {
            task.abort();
        }
        self.media_rx = None;
        self.writer = None;
        self.preview.detach();
    }

    /// Begin recording. Only video recording is supported; photo and
    /// undefined requests are accepted and ignored.
    pub fn start_capture(&mut self, source: CaptureSource) -> MontageResult<()> {
        if source != CaptureSource::Video {
            tracing::debug!(?source, "Ignoring non-video capture request");
            return Ok(());
        }
        if self.state != CaptureState::Running {
            return Err(MontageError::capture(format!(
                "cannot start recording in state {:?}",
                self.state
            )));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MontageError::capture("no writer installed"))?;
        writer.start_writing()?;

        let discarded = self.discard_pending();
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded buffers queued before recording");
        }
        self.is_recording = true;
        self.origin = None;
        self.latest = None;
        self.end = None;
        self.stats = CaptureStats::default();
        let started = Utc::now();
        self.started_at = Some(started);
        self.state = CaptureState::Recording;

        tracing::info!(started_at = %started.to_rfc3339(), "Recording started");
        self.notify(SessionNotification::RecordingStarted);
        Ok(())
    }

    /// Empty the media channel, returning how many samples were thrown away.
    fn discard_pending(&mut self) -> usize {
        let Some(rx) = self.media_rx.as_mut() else {
            return 0;
        };
        let mut discarded = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, CaptureEvent::Sample(_)) {
                discarded += 1;
            }
        }
        discarded
    }

    /// Process one event from the media channel.
    pub fn handle_event(&mut self, event: CaptureEvent) -> MontageResult<SampleOutcome> {
        let sample = match event {
            CaptureEvent::Sample(sample) => sample,
            CaptureEvent::Metadata(_) => return Ok(SampleOutcome::Ignored),
        };
        if !self.is_recording {
            return Ok(SampleOutcome::Ignored);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(SampleOutcome::Ignored);
        };

        let kind = sample.kind();
        if self.origin.is_some_and(|origin| sample.pts < origin) {
            tracing::trace!(?kind, pts = %sample.pts, "Buffer precedes session origin");
            return Ok(SampleOutcome::Ignored);
        }
        if self.origin.is_none() {
            tracing::debug!(origin = %sample.pts, ?kind, "Session origin latched");
            self.origin = Some(sample.pts);
            writer.start_session(sample.pts);
        }
        self.latest = Some(sample.pts);

        if !writer.is_ready(kind) {
            self.stats.kind_mut(kind).dropped += 1;
            tracing::trace!(?kind, pts = %sample.pts, "Writer busy, buffer dropped");
            return Ok(SampleOutcome::Dropped);
        }

        let end = sample.end();
        if let Err(e) = writer.append(sample) {
            self.stats.kind_mut(kind).dropped += 1;
            return Err(e);
        }
        self.stats.kind_mut(kind).appended += 1;
        self.end = Some(self.end.map_or(end, |current| current.max(end)));

        if self.limit_reached() {
            return Ok(SampleOutcome::LimitReached);
        }
        Ok(SampleOutcome::Appended)
    }

    fn limit_reached(&self) -> bool {
        match (self.config.max_duration, self.origin, self.latest) {
            (Some(max), Some(origin), Some(latest)) => latest - origin >= max,
            _ => false,
        }
    }

    /// Stop recording, finalize the output, and rebuild the session.
    pub async fn stop_capture(&mut self) -> MontageResult<MediaAsset> {
        if self.state != CaptureState::Recording {
            return Err(MontageError::capture(format!(
                "cannot stop recording in state {:?}",
                self.state
            )));
        }
        tracing::info!("Stopping recording");
        self.state = CaptureState::Stopping;
        self.is_recording = false;

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop() {
                tracing::warn!(error = %e, "Failed to stop capture device");
            }
        }

        let result = match self.writer.take() {
            Some(mut writer) => {
                if self.origin.is_none() {
                    tracing::warn!("No buffers received; finalizing an empty recording");
                    writer.start_session(MediaTime::ZERO);
                }
                writer.mark_as_finished();
                writer
                    .finish_writing()
                    .await
                    .map(|path| self.recorded_asset(path))
            }
            None => Err(MontageError::capture("no writer installed")),
        };

        let stats = self.stats;
        tracing::info!(
            video_appended = stats.video.appended,
            video_dropped = stats.video.dropped,
            audio_appended = stats.audio.appended,
            audio_dropped = stats.audio.dropped,
            drop_rate = stats.drop_rate(),
            "Recording stopped"
        );

        let position = self.position;
        if let Err(e) = self.rebuild(position) {
            tracing::error!(error = %e, "Session could not be rebuilt after recording");
        }

        match &result {
            Ok(asset) => self.notify(SessionNotification::Finished(asset.clone())),
            Err(e) => self.notify(SessionNotification::Failed(e.to_string())),
        }
        result
    }

    fn recorded_asset(&self, path: PathBuf) -> MediaAsset {
        let duration = match (self.origin, self.end) {
            (Some(origin), Some(end)) if end > origin => end - origin,
            _ => MediaTime::ZERO,
        };
        let video = self.config.writer.video;
        let mut tracks = Vec::new();
        if let Some(range) = TimeRange::from_zero(duration) {
            for (kind, stats, natural_size, codec) in [
                (
                    MediaKind::Video,
                    self.stats.video,
                    Size::new(video.width as f64, video.height as f64),
                    "h264",
                ),
                (MediaKind::Audio, self.stats.audio, Size::ZERO, "aac"),
            ] {
                if stats.appended > 0 {
                    tracks.push(AssetTrack {
                        index: tracks.len(),
                        kind,
                        time_range: range,
                        natural_size,
                        preferred_transform: AffineTransform::IDENTITY,
                        codec: Some(codec.to_string()),
                    });
                }
            }
        }
        MediaAsset::new(path, duration, tracks)
    }

    /// Swap cameras outside of a recording.
    pub fn change_camera(&mut self, position: CameraPosition) -> MontageResult<()> {
        if matches!(self.state, CaptureState::Recording | CaptureState::Stopping) {
            return Err(MontageError::capture("cannot change camera while recording"));
        }
        let mirroring = Mirroring::for_position(position);
        if let Some(device) = self.device.as_mut() {
            device.switch_camera(position, mirroring)?;
            self.preview.attach(position, mirroring);
        }
        tracing::info!(?position, "Camera changed");
        self.position = position;
        Ok(())
    }

    /// Flash only affects photo settings, which are not captured.
    pub fn change_flash(&mut self, mode: FlashMode) {
        self.flash_mode = mode;
    }

    fn notify(&self, notification: SessionNotification) {
        if let Some(notifier) = &self.notifier {
            let _ = notifier.send(notification);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Face and landmark detection on metadata buffers. Not implemented.
fn detect_faces(event: &CaptureEvent) {
    if let CaptureEvent::Metadata(frame) = event {
        tracing::trace!(objects = frame.object_count, "Metadata frame ignored");
    }
}

/// Drive a recording: feed events to the session until `stop` resolves or
/// the maximum duration is reached, then stop and return the recording.
///
/// Returns `None` when nothing was being recorded.
pub async fn run_session<F>(
    session: &mut CaptureSession,
    stop: F,
) -> MontageResult<Option<MediaAsset>>
where
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            event = session.next_event() => {
                let Some(event) = event else { break };
                match session.handle_event(event) {
                    Ok(SampleOutcome::LimitReached) => {
                        tracing::info!("Maximum recording duration reached");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to append buffer"),
                }
            }
        }
    }

    if session.is_recording() {
        session.stop_capture().await.map(Some)
    } else {
        Ok(None)
    }
}
