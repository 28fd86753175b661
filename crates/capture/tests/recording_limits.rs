use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use montage_capture::{
    run_session, CameraPosition, CaptureConfig, CaptureDevice, CaptureEvent, CaptureOutputs,
    CaptureSession, CaptureSource, CaptureState, DeviceFactory, MetadataFrame, Mirroring,
    SampleBuffer, SampleWriter, VideoFrame, WriterFactory, WriterSettings,
};
use montage_common::{CaptureDefaults, FileManager, MediaKind, MontageResult};
use montage_model::MediaTime;

/// Device whose outputs are handed to the test, which pushes buffers into
/// them whenever it likes.
struct LiveDevice {
    feeds: Arc<Feeds>,
}

impl CaptureDevice for LiveDevice {
    fn start(&mut self, outputs: CaptureOutputs) -> MontageResult<()> {
        self.feeds.0.lock().unwrap().push(outputs);
        Ok(())
    }

    fn stop(&mut self) -> MontageResult<()> {
        Ok(())
    }

    fn switch_camera(&mut self, _: CameraPosition, _: Mirroring) -> MontageResult<()> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }
}

/// Outputs of every device started so far, most recent last.
#[derive(Default)]
struct Feeds(Mutex<Vec<CaptureOutputs>>);

impl Feeds {
    /// Outputs of the device that started last. Dropping them closes its
    /// media channel.
    fn latest(&self) -> CaptureOutputs {
        self.0.lock().unwrap().pop().expect("a device was started")
    }
}

struct LiveDevices(Arc<Feeds>);

impl DeviceFactory for LiveDevices {
    fn open(&self, _: CameraPosition, _: Mirroring) -> MontageResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(LiveDevice {
            feeds: self.0.clone(),
        }))
    }
}

struct MemoryWriter {
    path: PathBuf,
    appended: Arc<Mutex<Vec<MediaTime>>>,
}

#[async_trait::async_trait]
impl SampleWriter for MemoryWriter {
    fn start_writing(&mut self) -> MontageResult<()> {
        Ok(())
    }

    fn start_session(&mut self, _at: MediaTime) {}

    fn is_ready(&self, _kind: MediaKind) -> bool {
        true
    }

    fn append(&mut self, sample: SampleBuffer) -> MontageResult<()> {
        self.appended.lock().unwrap().push(sample.pts);
        Ok(())
    }

    fn mark_as_finished(&mut self) {}

    async fn finish_writing(self: Box<Self>) -> MontageResult<PathBuf> {
        Ok(self.path)
    }
}

struct MemoryWriters(Arc<Mutex<Vec<MediaTime>>>);

impl WriterFactory for MemoryWriters {
    fn create_writer(
        &self,
        output_path: &Path,
        _settings: &WriterSettings,
    ) -> MontageResult<Box<dyn SampleWriter>> {
        Ok(Box::new(MemoryWriter {
            path: output_path.to_path_buf(),
            appended: self.0.clone(),
        }))
    }
}

struct FixedPath;

impl FileManager for FixedPath {
    fn unique_url(&self, kind: MediaKind) -> Option<PathBuf> {
        Some(PathBuf::from(format!("recording.{}", kind.extension())))
    }

    fn remove_asset(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

fn frame(secs: i64) -> CaptureEvent {
    CaptureEvent::Sample(SampleBuffer::video(
        MediaTime::new(secs, 1),
        MediaTime::new(1, 30),
        VideoFrame {
            width: 1,
            height: 1,
            data: vec![0; 4],
        },
    ))
}

struct Harness {
    session: CaptureSession,
    feeds: Arc<Feeds>,
    appended: Arc<Mutex<Vec<MediaTime>>>,
}

impl Harness {
    fn appended(&self) -> Vec<MediaTime> {
        self.appended.lock().unwrap().clone()
    }
}

async fn running_session(max_duration_secs: Option<f64>) -> Harness {
    let defaults = CaptureDefaults {
        max_duration_secs,
        ..CaptureDefaults::default()
    };
    let feeds = Arc::new(Feeds::default());
    let appended = Arc::new(Mutex::new(Vec::new()));
    let mut session = CaptureSession::new(
        CaptureConfig::from(&defaults),
        Arc::new(LiveDevices(feeds.clone())),
        Arc::new(MemoryWriters(appended.clone())),
        Arc::new(FixedPath),
    );
    session
        .setup_capture_session(CameraPosition::Back)
        .await
        .unwrap();
    Harness {
        session,
        feeds,
        appended,
    }
}

#[tokio::test]
async fn recording_stops_once_max_duration_is_reached() {
    let mut h = running_session(Some(5.0)).await;
    h.session.start_capture(CaptureSource::Video).unwrap();

    let outputs = h.feeds.latest();
    for t in 0..=10 {
        outputs.media.try_send(frame(t)).unwrap();
    }

    let asset = run_session(&mut h.session, std::future::pending())
        .await
        .unwrap()
        .expect("a recording was produced");

    let appended = h.appended();
    assert_eq!(appended.len(), 6);
    assert_eq!(appended.last(), Some(&MediaTime::new(5, 1)));

    let secs = asset.duration.seconds();
    assert!((5.0..=6.0).contains(&secs), "duration was {secs}");
    assert_eq!(asset.path, PathBuf::from("recording.mov"));
    assert_eq!(h.session.state(), CaptureState::Running);
}

#[tokio::test]
async fn buffers_delivered_before_start_are_not_recorded() {
    let mut h = running_session(None).await;
    let outputs = h.feeds.latest();
    outputs.media.try_send(frame(100)).unwrap();

    h.session.start_capture(CaptureSource::Video).unwrap();
    outputs.media.try_send(frame(0)).unwrap();
    outputs.media.try_send(frame(1)).unwrap();
    drop(outputs);

    let asset = run_session(&mut h.session, std::future::pending())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.appended(), vec![MediaTime::new(0, 1), MediaTime::new(1, 1)]);
    assert_eq!(asset.duration, MediaTime::new(31, 30));
}

#[tokio::test]
async fn second_take_starts_from_its_own_buffers() {
    let mut h = running_session(Some(5.0)).await;
    h.session.start_capture(CaptureSource::Video).unwrap();
    let first = h.feeds.latest();
    for t in 0..=10 {
        first.media.try_send(frame(t)).unwrap();
    }
    run_session(&mut h.session, std::future::pending())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.appended().len(), 6);

    h.session.start_capture(CaptureSource::Video).unwrap();
    let second = h.feeds.latest();
    second.media.try_send(frame(20)).unwrap();
    second.media.try_send(frame(21)).unwrap();
    drop(second);

    let asset = run_session(&mut h.session, std::future::pending())
        .await
        .unwrap()
        .unwrap();

    let appended = h.appended();
    assert_eq!(appended.len(), 8);
    assert_eq!(
        appended[6..],
        [MediaTime::new(20, 1), MediaTime::new(21, 1)]
    );
    assert_eq!(asset.duration, MediaTime::new(31, 30));
    drop(first);
}

#[tokio::test]
async fn metadata_never_reaches_the_writer() {
    let mut h = running_session(None).await;
    h.session.start_capture(CaptureSource::Video).unwrap();

    let outputs = h.feeds.latest();
    outputs
        .metadata
        .try_send(CaptureEvent::Metadata(MetadataFrame {
            pts: MediaTime::ZERO,
            object_count: 3,
        }))
        .unwrap();
    outputs.media.try_send(frame(0)).unwrap();
    outputs.media.try_send(frame(1)).unwrap();
    drop(outputs);

    let asset = run_session(&mut h.session, std::future::pending())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.appended().len(), 2);
    assert_eq!(asset.tracks.len(), 1);
}

#[tokio::test]
async fn stopping_with_no_buffers_finalizes_cleanly() {
    let mut h = running_session(Some(5.0)).await;
    h.session.start_capture(CaptureSource::Video).unwrap();
    assert!(h.session.session_origin().is_none());

    let asset = run_session(&mut h.session, std::future::ready(()))
        .await
        .unwrap()
        .unwrap();

    assert!(h.appended().is_empty());
    assert!(asset.duration.is_zero());
    assert_eq!(h.session.state(), CaptureState::Running);
}

#[tokio::test]
async fn driver_returns_nothing_when_not_recording() {
    let mut h = running_session(None).await;
    h.feeds.latest().media.try_send(frame(0)).unwrap();

    let result = run_session(&mut h.session, std::future::ready(()))
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(h.appended().is_empty());
}
