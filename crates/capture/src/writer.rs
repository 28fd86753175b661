//! Sample writers: real-time encoders fed by a capture session.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use montage_common::{CaptureDefaults, MediaKind, MontageError, MontageResult};
use montage_model::MediaTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{AudioChunk, SampleBuffer, SamplePayload, VideoFrame};

/// Frames the video encoder may buffer before reporting not-ready.
const VIDEO_QUEUE_DEPTH: usize = 4;

/// Audio chunks the WAV writer may buffer before reporting not-ready.
const AUDIO_QUEUE_DEPTH: usize = 16;

/// Gaps in the audio timeline shorter than this are treated as jitter.
const AUDIO_GAP_TOLERANCE_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInputSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInputSettings {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Inputs a writer is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSettings {
    pub video: VideoInputSettings,
    pub audio: AudioInputSettings,
    /// Inputs are fed live; the encoder favours latency over compression.
    pub real_time: bool,
}

impl From<&CaptureDefaults> for WriterSettings {
    fn from(defaults: &CaptureDefaults) -> Self {
        Self {
            video: VideoInputSettings {
                width: defaults.width,
                height: defaults.height,
                fps: defaults.fps.max(1),
            },
            audio: AudioInputSettings {
                sample_rate: defaults.sample_rate,
                channels: defaults.channels.max(1),
            },
            real_time: true,
        }
    }
}

/// A file-backed encoder with one video and one audio input.
#[async_trait]
pub trait SampleWriter: Send {
    fn start_writing(&mut self) -> MontageResult<()>;

    /// Anchor the output timeline: a buffer stamped `at` lands at time zero.
    fn start_session(&mut self, at: MediaTime);

    /// Whether the input for `kind` can take another buffer right now.
    fn is_ready(&self, kind: MediaKind) -> bool;

    fn append(&mut self, sample: SampleBuffer) -> MontageResult<()>;

    /// No more buffers will be appended.
    fn mark_as_finished(&mut self);

    /// Flush and close the output file.
    async fn finish_writing(self: Box<Self>) -> MontageResult<PathBuf>;
}

pub trait WriterFactory: Send + Sync {
    fn create_writer(
        &self,
        output_path: &Path,
        settings: &WriterSettings,
    ) -> MontageResult<Box<dyn SampleWriter>>;
}

/// Assigns camera frames to fixed-rate output slots.
///
/// A frame arriving after a gap is preceded by copies of the previous frame
/// so the encoded stream keeps wall-clock timing. A frame landing in a slot
/// that is already filled is skipped.
#[derive(Debug, Clone)]
pub(crate) struct FrameSlots {
    fps: u32,
    next: u64,
}

impl FrameSlots {
    pub(crate) fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            next: 0,
        }
    }

    /// Copies of the previous frame to write before this one, or `None` to skip it.
    pub(crate) fn place(&mut self, offset: MediaTime) -> Option<u64> {
        let slot = offset.convert_scale(self.fps).value.max(0) as u64;
        if slot < self.next {
            return None;
        }
        let repeats = slot - self.next;
        self.next = slot + 1;
        Some(repeats)
    }

    pub(crate) fn written(&self) -> u64 {
        self.next
    }
}

/// WAV track that pads timeline gaps with silence.
pub(crate) struct AudioTrack {
    path: PathBuf,
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    settings: AudioInputSettings,
    written_frames: u64,
}

impl AudioTrack {
    pub(crate) fn create(path: &Path, settings: AudioInputSettings) -> MontageResult<Self> {
        let spec = hound::WavSpec {
            channels: settings.channels,
            sample_rate: settings.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| MontageError::data(format!("cannot create audio track: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            settings,
            written_frames: 0,
        })
    }

    pub(crate) fn write(&mut self, offset: MediaTime, chunk: &AudioChunk) -> MontageResult<()> {
        check_audio_format(self.settings, chunk)?;

        let expected = offset.convert_scale(self.settings.sample_rate).value.max(0) as u64;
        let tolerance = self.settings.sample_rate as u64 * AUDIO_GAP_TOLERANCE_MS / 1000;
        if expected > self.written_frames + tolerance {
            let gap = expected - self.written_frames;
            tracing::debug!(gap_frames = gap, "Padding audio gap with silence");
            for _ in 0..gap * self.settings.channels as u64 {
                self.write_sample(0)?;
            }
            self.written_frames = expected;
        }

        for &sample in &chunk.samples {
            self.write_sample(sample)?;
        }
        self.written_frames += chunk.frames() as u64;
        Ok(())
    }

    fn write_sample(&mut self, sample: i16) -> MontageResult<()> {
        self.writer
            .write_sample(sample)
            .map_err(|e| MontageError::data(format!("audio write failed: {e}")))
    }

    /// Close the file. Returns `None` when nothing was written.
    pub(crate) fn finalize(self) -> MontageResult<Option<PathBuf>> {
        let written = self.written_frames;
        self.writer
            .finalize()
            .map_err(|e| MontageError::data(format!("cannot finalize audio track: {e}")))?;
        Ok((written > 0).then_some(self.path))
    }
}

fn check_audio_format(settings: AudioInputSettings, chunk: &AudioChunk) -> MontageResult<()> {
    if chunk.sample_rate != settings.sample_rate || chunk.channels != settings.channels {
        return Err(MontageError::data(format!(
            "audio chunk is {} Hz x{}, writer expects {} Hz x{}",
            chunk.sample_rate, chunk.channels, settings.sample_rate, settings.channels
        )));
    }
    Ok(())
}

struct VideoJob {
    offset: MediaTime,
    frame: VideoFrame,
}

struct AudioJob {
    offset: MediaTime,
    chunk: AudioChunk,
}

/// Write queued audio chunks to `track` on a blocking worker. Resolves to
/// the WAV path, or `None` when no audio arrived.
fn spawn_audio_writer(
    track: AudioTrack,
    mut receiver: mpsc::Receiver<AudioJob>,
) -> JoinHandle<MontageResult<Option<PathBuf>>> {
    tokio::task::spawn_blocking(move || {
        let mut track = track;
        let mut write_error = None;
        while let Some(job) = receiver.blocking_recv() {
            if let Err(e) = track.write(job.offset, &job.chunk) {
                tracing::warn!(error = %e, "Audio writer stopped");
                write_error = Some(e);
                break;
            }
        }
        drop(receiver);
        let written = track.finalize();
        match write_error {
            Some(e) => Err(e),
            None => written,
        }
    })
}

/// Records to `.mov` with ffmpeg.
///
/// Camera frames are piped as raw RGBA into an H.264 encoder running at the
/// configured frame rate. Microphone audio goes to a WAV file. Both run on
/// blocking workers behind bounded queues; a full queue makes the input
/// report not-ready. The two are muxed into the output when writing
/// finishes.
pub struct FfmpegSampleWriter {
    binary: String,
    settings: WriterSettings,
    output_path: PathBuf,
    staging: tempfile::TempDir,
    origin: Option<MediaTime>,
    video: Option<mpsc::Sender<VideoJob>>,
    video_worker: Option<JoinHandle<MontageResult<u64>>>,
    audio: Option<mpsc::Sender<AudioJob>>,
    audio_worker: Option<JoinHandle<MontageResult<Option<PathBuf>>>>,
    finished: bool,
}

impl FfmpegSampleWriter {
    pub fn new(
        output_path: &Path,
        binary: impl Into<String>,
        settings: WriterSettings,
    ) -> MontageResult<Self> {
        Ok(Self {
            binary: binary.into(),
            settings,
            output_path: output_path.to_path_buf(),
            staging: tempfile::tempdir()?,
            origin: None,
            video: None,
            video_worker: None,
            audio: None,
            audio_worker: None,
            finished: false,
        })
    }

    fn staged_video(&self) -> PathBuf {
        self.staging.path().join("video.mp4")
    }

    fn staged_audio(&self) -> PathBuf {
        self.staging.path().join("audio.wav")
    }

    fn start_audio(&mut self) -> MontageResult<()> {
        let track = AudioTrack::create(&self.staged_audio(), self.settings.audio)?;
        let (sender, receiver) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        self.audio_worker = Some(spawn_audio_writer(track, receiver));
        self.audio = Some(sender);
        Ok(())
    }

    fn offset_of(&self, pts: MediaTime) -> MediaTime {
        match self.origin {
            Some(origin) if pts > origin => pts - origin,
            _ => MediaTime::ZERO,
        }
    }
}

/// Arguments for the live H.264 encoder reading raw frames from stdin.
pub(crate) fn encoder_args(settings: &WriterSettings, output: &Path) -> Vec<String> {
    let video = settings.video;
    let preset = if settings.real_time {
        "ultrafast"
    } else {
        "medium"
    };
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", video.width, video.height),
        "-r".into(),
        video.fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        preset.into(),
    ];
    if settings.real_time {
        args.extend(["-tune".into(), "zerolatency".into()]);
    }
    args.extend([
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-f".into(),
        "mp4".into(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Arguments muxing the staged tracks into the final movie.
pub(crate) fn mux_args(video: Option<&Path>, audio: Option<&Path>, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
    ];
    for input in [video, audio].into_iter().flatten() {
        args.extend(["-i".into(), input.to_string_lossy().into_owned()]);
    }
    let mut index = 0;
    if video.is_some() {
        args.extend([
            "-map".into(),
            format!("{index}:v:0"),
            "-c:v".into(),
            "copy".into(),
        ]);
        index += 1;
    }
    if audio.is_some() {
        args.extend([
            "-map".into(),
            format!("{index}:a:0"),
            "-c:a".into(),
            "aac".into(),
        ]);
    }
    args.extend(["-f".into(), "mov".into(), output.to_string_lossy().into_owned()]);
    args
}

fn spawn_encoder(
    binary: &str,
    settings: &WriterSettings,
    output: &Path,
    mut receiver: mpsc::Receiver<VideoJob>,
) -> MontageResult<JoinHandle<MontageResult<u64>>> {
    let mut child = Command::new(binary)
        .args(encoder_args(settings, output))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MontageError::capture(format!("failed to start {binary}: {e}")))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| MontageError::capture("encoder stdin unavailable"))?;
    let fps = settings.video.fps;
    let expected_len = settings.video.width as usize * settings.video.height as usize * 4;

    Ok(tokio::task::spawn_blocking(move || {
        let mut slots = FrameSlots::new(fps);
        let mut last: Option<Vec<u8>> = None;
        let mut write_error = None;

        while let Some(job) = receiver.blocking_recv() {
            if job.frame.data.len() != expected_len {
                tracing::warn!(
                    width = job.frame.width,
                    height = job.frame.height,
                    "Skipping frame with unexpected size"
                );
                continue;
            }
            let Some(repeats) = slots.place(job.offset) else {
                continue;
            };
            let fill = last.as_deref().unwrap_or(job.frame.data.as_slice());
            let mut result = Ok(());
            for _ in 0..repeats {
                result = result.and_then(|_| stdin.write_all(fill));
            }
            result = result.and_then(|_| stdin.write_all(&job.frame.data));
            if let Err(e) = result {
                write_error = Some(e);
                break;
            }
            last = Some(job.frame.data);
        }
        drop(stdin);

        let output = child.wait_with_output()?;
        if let Some(e) = write_error {
            return Err(MontageError::capture(format!("video encoder pipe closed: {e}")));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MontageError::custom(format!(
                "video encoder failed: {}",
                stderr.trim()
            )));
        }
        Ok(slots.written())
    }))
}

#[async_trait]
impl SampleWriter for FfmpegSampleWriter {
    /// Must be called within a tokio runtime.
    fn start_writing(&mut self) -> MontageResult<()> {
        if self.video.is_some() {
            return Err(MontageError::capture("writer already started"));
        }
        let (sender, receiver) = mpsc::channel(VIDEO_QUEUE_DEPTH);
        let worker = spawn_encoder(&self.binary, &self.settings, &self.staged_video(), receiver)?;
        self.start_audio()?;
        self.video = Some(sender);
        self.video_worker = Some(worker);
        tracing::debug!(output = %self.output_path.display(), "Sample writer started");
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.origin = Some(at);
    }

    fn is_ready(&self, kind: MediaKind) -> bool {
        if self.finished {
            return false;
        }
        match kind {
            MediaKind::Video => self.video.as_ref().map_or(false, |s| s.capacity() > 0),
            MediaKind::Audio => self.audio.as_ref().map_or(false, |s| s.capacity() > 0),
        }
    }

    fn append(&mut self, sample: SampleBuffer) -> MontageResult<()> {
        if self.finished {
            return Err(MontageError::capture("writer is finished"));
        }
        let offset = self.offset_of(sample.pts);
        match sample.payload {
            SamplePayload::Video(frame) => {
                let sender = self
                    .video
                    .as_ref()
                    .ok_or_else(|| MontageError::capture("writer not started"))?;
                sender
                    .try_send(VideoJob { offset, frame })
                    .map_err(|e| MontageError::data(format!("video input rejected frame: {e}")))
            }
            SamplePayload::Audio(chunk) => {
                check_audio_format(self.settings.audio, &chunk)?;
                let sender = self
                    .audio
                    .as_ref()
                    .ok_or_else(|| MontageError::capture("writer not started"))?;
                sender
                    .try_send(AudioJob { offset, chunk })
                    .map_err(|e| MontageError::data(format!("audio input rejected chunk: {e}")))
            }
        }
    }

    fn mark_as_finished(&mut self) {
        self.finished = true;
        self.video = None;
        self.audio = None;
    }

    async fn finish_writing(self: Box<Self>) -> MontageResult<PathBuf> {
        let mut this = self;
        this.mark_as_finished();

        let frames = match this.video_worker.take() {
            Some(worker) => worker
                .await
                .map_err(|e| MontageError::capture(format!("video encoder task failed: {e}")))??,
            None => 0,
        };
        let audio = match this.audio_worker.take() {
            Some(worker) => worker
                .await
                .map_err(|e| MontageError::capture(format!("audio writer task failed: {e}")))??,
            None => None,
        };
        tracing::debug!(frames, has_audio = audio.is_some(), "Staged tracks closed");

        let video = (frames > 0).then(|| this.staged_video());
        if video.is_none() && audio.is_none() {
            return Err(MontageError::custom("no media was recorded"));
        }

        let args = mux_args(video.as_deref(), audio.as_deref(), &this.output_path);
        let binary = this.binary.clone();
        let output = tokio::task::spawn_blocking(move || {
            Command::new(&binary)
                .args(&args)
                .stdin(Stdio::null())
                .output()
        })
        .await
        .map_err(|e| MontageError::capture(format!("mux task failed: {e}")))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MontageError::custom(format!("mux failed: {}", stderr.trim())));
        }
        tracing::info!(output = %this.output_path.display(), frames, "Recording written");
        Ok(this.output_path.clone())
    }
}

/// Creates [`FfmpegSampleWriter`]s.
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    pub binary: String,
}

impl FfmpegWriterFactory {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn create_writer(
        &self,
        output_path: &Path,
        settings: &WriterSettings,
    ) -> MontageResult<Box<dyn SampleWriter>> {
        Ok(Box::new(FfmpegSampleWriter::new(
            output_path,
            self.binary.clone(),
            *settings,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> WriterSettings {
        WriterSettings {
            video: VideoInputSettings {
                width: 4,
                height: 2,
                fps: 30,
            },
            audio: AudioInputSettings {
                sample_rate: 1000,
                channels: 1,
            },
            real_time: true,
        }
    }

    #[test]
    fn test_frame_slots_fill_gaps_and_skip_duplicates() {
        let mut slots = FrameSlots::new(30);
        assert_eq!(slots.place(MediaTime::ZERO), Some(0));
        assert_eq!(slots.place(MediaTime::new(1, 30)), Some(0));
        // Two slots missed.
        assert_eq!(slots.place(MediaTime::new(4, 30)), Some(2));
        // Lands in slot 4 again.
        assert_eq!(slots.place(MediaTime::new(41, 300)), None);
        assert_eq!(slots.written(), 5);
    }

    #[test]
    fn test_frame_slots_late_first_frame_fills_leading_gap() {
        let mut slots = FrameSlots::new(10);
        assert_eq!(slots.place(MediaTime::new(1, 2)), Some(5));
        assert_eq!(slots.written(), 6);
    }

    #[test]
    fn test_audio_track_pads_gaps_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        let mut track = AudioTrack::create(&path, settings().audio).unwrap();
        let chunk = AudioChunk {
            sample_rate: 1000,
            channels: 1,
            samples: vec![7; 100],
        };

        track.write(MediaTime::ZERO, &chunk).unwrap();
        // 5 ms of jitter is not padded.
        track.write(MediaTime::new(105, 1000), &chunk).unwrap();
        // 300 ms gap: 100 frames of silence before the chunk.
        track.write(MediaTime::new(300, 1000), &chunk).unwrap();
        let written = track.finalize().unwrap().unwrap();

        let samples: Vec<i16> = hound::WavReader::open(written)
            .unwrap()
            .into_samples()
            .map(Result::unwrap)
            .collect();
        assert_eq!(samples.len(), 400);
        assert!(samples[200..300].iter().all(|&s| s == 0));
        assert!(samples[300..].iter().all(|&s| s == 7));
    }

    #[test]
    fn test_audio_track_rejects_format_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut track = AudioTrack::create(&dir.path().join("a.wav"), settings().audio).unwrap();
        let chunk = AudioChunk {
            sample_rate: 44_100,
            channels: 2,
            samples: vec![0; 10],
        };
        let err = track.write(MediaTime::ZERO, &chunk).unwrap_err();
        assert_eq!(err.kind_name(), "data");
    }

    #[test]
    fn test_empty_audio_track_finalizes_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let track = AudioTrack::create(&dir.path().join("a.wav"), settings().audio).unwrap();
        assert!(track.finalize().unwrap().is_none());
    }

    #[test]
    fn test_encoder_args_read_raw_frames() {
        let args = encoder_args(&settings(), Path::new("/tmp/v.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 4x2 -r 30 -i pipe:0"));
        assert!(joined.contains("-tune zerolatency"));
        assert_eq!(args.last().unwrap(), "/tmp/v.mp4");
    }

    #[test]
    fn test_mux_args_map_available_tracks() {
        let out = Path::new("/tmp/out.mov");
        let both = mux_args(Some(Path::new("v.mp4")), Some(Path::new("a.wav")), out).join(" ");
        assert!(both.contains("-i v.mp4 -i a.wav -map 0:v:0 -c:v copy -map 1:a:0 -c:a aac"));
        assert!(both.ends_with("-f mov /tmp/out.mov"));

        let audio_only = mux_args(None, Some(Path::new("a.wav")), out).join(" ");
        assert!(audio_only.contains("-map 0:a:0"));
        assert!(!audio_only.contains("-c:v"));
    }

    #[test]
    fn test_writer_is_not_ready_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let writer =
            FfmpegSampleWriter::new(&dir.path().join("o.mov"), "ffmpeg", settings()).unwrap();
        assert!(!writer.is_ready(MediaKind::Video));
        assert!(!writer.is_ready(MediaKind::Audio));
    }

    #[tokio::test]
    async fn test_finishing_unstarted_writer_reports_no_media() {
        let dir = tempfile::tempdir().unwrap();
        let writer: Box<dyn SampleWriter> = Box::new(
            FfmpegSampleWriter::new(&dir.path().join("o.mov"), "ffmpeg", settings()).unwrap(),
        );
        let err = writer.finish_writing().await.unwrap_err();
        assert_eq!(err.kind_name(), "custom");
    }

    fn chunk(value: i16, frames: usize) -> AudioChunk {
        AudioChunk {
            sample_rate: 1000,
            channels: 1,
            samples: vec![value; frames],
        }
    }

    #[tokio::test]
    async fn test_audio_is_written_on_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            FfmpegSampleWriter::new(&dir.path().join("o.mov"), "ffmpeg", settings()).unwrap();
        writer.start_audio().unwrap();
        writer.start_session(MediaTime::new(2, 1));
        assert!(writer.is_ready(MediaKind::Audio));

        let at = |ms: i64| MediaTime::new(2000 + ms, 1000);
        writer.append(SampleBuffer::audio(at(0), chunk(3, 100))).unwrap();
        writer.append(SampleBuffer::audio(at(200), chunk(5, 100))).unwrap();
        writer.mark_as_finished();
        assert!(!writer.is_ready(MediaKind::Audio));

        let path = writer.audio_worker.take().unwrap().await.unwrap().unwrap().unwrap();
        let samples: Vec<i16> = hound::WavReader::open(path)
            .unwrap()
            .into_samples()
            .map(Result::unwrap)
            .collect();
        assert_eq!(samples.len(), 300);
        assert!(samples[..100].iter().all(|&s| s == 3));
        assert!(samples[100..200].iter().all(|&s| s == 0));
        assert!(samples[200..].iter().all(|&s| s == 5));
    }

    #[tokio::test]
    async fn test_full_audio_queue_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            FfmpegSampleWriter::new(&dir.path().join("o.mov"), "ffmpeg", settings()).unwrap();
        let (sender, _receiver) = mpsc::channel(1);
        writer.audio = Some(sender);
        writer.start_session(MediaTime::ZERO);

        writer.append(SampleBuffer::audio(MediaTime::ZERO, chunk(1, 10))).unwrap();
        assert!(!writer.is_ready(MediaKind::Audio));
        let err = writer
            .append(SampleBuffer::audio(MediaTime::new(1, 100), chunk(1, 10)))
            .unwrap_err();
        assert_eq!(err.kind_name(), "data");
    }

    #[tokio::test]
    async fn test_mismatched_audio_is_rejected_before_queueing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            FfmpegSampleWriter::new(&dir.path().join("o.mov"), "ffmpeg", settings()).unwrap();
        writer.start_audio().unwrap();
        let stereo = AudioChunk {
            sample_rate: 1000,
            channels: 2,
            samples: vec![0; 20],
        };
        let err = writer
            .append(SampleBuffer::audio(MediaTime::ZERO, stereo))
            .unwrap_err();
        assert_eq!(err.kind_name(), "data");
        assert_eq!(writer.audio.as_ref().unwrap().capacity(), AUDIO_QUEUE_DEPTH);
    }

    #[test]
    fn test_settings_from_capture_defaults() {
        let defaults = CaptureDefaults::default();
        let settings = WriterSettings::from(&defaults);
        assert_eq!(settings.video.width, defaults.width);
        assert_eq!(settings.audio.sample_rate, defaults.sample_rate);
        assert!(settings.real_time);
    }
}
