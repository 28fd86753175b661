//! Video generation from still images.
//!
//! Images wait in a FIFO [`FrameQueue`]. The queue is drained into a
//! [`FrameWriter`] only while the writer reports readiness; when it stops
//! being ready the drain suspends and resumes after the writer's readiness
//! signal fires, without touching images that were already consumed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use montage_common::{FileManager, MediaKind, MontageError, MontageResult};
use montage_model::{MediaTime, Size};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ffmpeg::{
    format_rate, run_ffmpeg, scale_filter, EncoderSettings, FfmpegFailure, FfmpegPlan,
};
use crate::pixel::{rasterize, PixelBuffer};

/// Consumer of rasterized frames.
#[async_trait]
pub trait FrameWriter: Send {
    /// Whether [`FrameWriter::append`] would accept a frame right now.
    fn is_ready_for_more_media_data(&self) -> bool;

    /// Resolves once the writer is ready for more data.
    async fn ready(&mut self) -> MontageResult<()>;

    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> MontageResult<()>;

    /// No more frames will be appended.
    fn mark_as_finished(&mut self);

    /// Complete the file and return its path.
    async fn finish_writing(self: Box<Self>) -> MontageResult<PathBuf>;
}

/// Creates a writer for a fresh output path.
pub trait FrameWriterFactory: Send + Sync {
    fn create_writer(&self, output_path: &Path) -> MontageResult<Box<dyn FrameWriter>>;
}

/// How presentation times are assigned to queued images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Image N is shown at `N / fps`.
    FixedRate { fps: u32 },
    /// One image held on screen for the whole duration.
    HoldFor(MediaTime),
}

/// Duration of one frame at `fps`: `timescale / fps` units.
///
/// When `fps` does not divide `timescale`, the smallest multiple of
/// `timescale` it does divide is used instead, so 7 fps at 600 becomes
/// `600/4200`.
pub fn frame_duration(fps: u32, timescale: u32) -> MediaTime {
    let fps = u64::from(fps.max(1));
    let base = u64::from(timescale.max(1));
    let scaled = base * (fps / gcd(base, fps));
    match u32::try_from(scaled) {
        Ok(scaled) => MediaTime::new((u64::from(scaled) / fps) as i64, scaled),
        Err(_) => MediaTime::new(1, fps as u32),
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every queued image was consumed.
    Complete,
    /// The writer stopped accepting data; images remain queued.
    Suspended,
}

struct Pending {
    image: Arc<RgbaImage>,
    /// Fixed time for held images; fixed-rate images are timed by the frame counter.
    at: Option<MediaTime>,
}

/// FIFO of images waiting to be written.
pub struct FrameQueue {
    pending: VecDeque<Pending>,
    frame_duration: MediaTime,
    frame_number: i64,
    timeline_end: Option<MediaTime>,
}

impl FrameQueue {
    /// Queue `images` for fixed-rate writing. Fails on an empty list.
    pub fn fixed_rate(images: Vec<RgbaImage>, fps: u32, timescale: u32) -> MontageResult<Self> {
        if images.is_empty() {
            return Err(MontageError::input_parameters("no images to generate a video from"));
        }
        Ok(Self {
            pending: images
                .into_iter()
                .map(|image| Pending {
                    image: Arc::new(image),
                    at: None,
                })
                .collect(),
            frame_duration: frame_duration(fps, timescale),
            frame_number: 0,
            timeline_end: None,
        })
    }

    /// Queue one image to be held for `duration`. It is written at zero and
    /// again halfway through so players keep it visible throughout.
    pub fn hold(image: RgbaImage, duration: MediaTime, timescale: u32) -> MontageResult<Self> {
        if !duration.is_negative() && !duration.is_zero() {
            let image = Arc::new(image);
            let halfway = duration.halved().convert_scale(timescale);
            return Ok(Self {
                pending: VecDeque::from([
                    Pending {
                        image: image.clone(),
                        at: Some(MediaTime::new(0, timescale)),
                    },
                    Pending {
                        image,
                        at: Some(halfway),
                    },
                ]),
                frame_duration: halfway,
                frame_number: 0,
                timeline_end: Some(duration),
            });
        }
        Err(MontageError::input_parameters(format!(
            "hold duration must be positive, got {duration}"
        )))
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Frames successfully appended so far.
    pub fn frames_appended(&self) -> i64 {
        self.frame_number
    }

    pub fn frame_duration(&self) -> MediaTime {
        self.frame_duration
    }

    /// Length of the generated video once every appended frame has played.
    pub fn timeline_end(&self) -> MediaTime {
        self.timeline_end
            .unwrap_or_else(|| self.frame_duration.multiply(self.frame_number))
    }

    /// Hand queued images to `writer` while it is ready.
    pub fn drain(&mut self, writer: &mut dyn FrameWriter) -> Drain {
        while !self.pending.is_empty() {
            if !writer.is_ready_for_more_media_data() {
                return Drain::Suspended;
            }
            let Some(next) = self.pending.pop_front() else {
                break;
            };
            let at = next
                .at
                .unwrap_or_else(|| self.frame_duration.multiply(self.frame_number));
            let appended = rasterize(&next.image).and_then(|buffer| writer.append(buffer, at));
            match appended {
                Ok(()) => self.frame_number += 1,
                Err(e) => tracing::warn!(at = %at, error = %e, "Dropped frame"),
            }
        }
        Drain::Complete
    }
}

/// Drain `queue` into `writer`, waiting on its readiness signal between passes.
pub async fn write_frames(
    queue: &mut FrameQueue,
    writer: &mut dyn FrameWriter,
) -> MontageResult<()> {
    loop {
        match queue.drain(writer) {
            Drain::Complete => return Ok(()),
            Drain::Suspended => writer.ready().await?,
        }
    }
}

/// A video produced from images.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedVideo {
    pub path: PathBuf,
    pub duration: MediaTime,
    pub frames: i64,
}

/// Write every queued image to a new video file.
pub async fn generate_video(
    mut queue: FrameQueue,
    factory: &dyn FrameWriterFactory,
    files: &dyn FileManager,
) -> MontageResult<GeneratedVideo> {
    let output_path = files
        .unique_url(MediaKind::Video)
        .ok_or_else(|| MontageError::data("no output path available"))?;
    let mut writer = factory.create_writer(&output_path)?;

    write_frames(&mut queue, writer.as_mut()).await?;
    writer.mark_as_finished();
    let path = writer.finish_writing().await?;

    tracing::info!(
        output = %path.display(),
        frames = queue.frames_appended(),
        duration_secs = queue.timeline_end().seconds(),
        "Generated video from images"
    );
    Ok(GeneratedVideo {
        path,
        duration: queue.timeline_end(),
        frames: queue.frames_appended(),
    })
}

struct Frame {
    buffer: PixelBuffer,
    at: MediaTime,
}

/// [`FrameWriter`] that stages frames as PNGs and encodes them with ffmpeg.
///
/// The bounded channel to the PNG worker is the readiness signal: the writer
/// is ready while the channel has free slots.
pub struct FfmpegFrameWriter {
    sender: Option<mpsc::Sender<Frame>>,
    worker: JoinHandle<MontageResult<Vec<(PathBuf, MediaTime)>>>,
    staging: tempfile::TempDir,
    output_path: PathBuf,
    binary: String,
    render_size: Size,
    fps: u32,
    settings: EncoderSettings,
}

impl FfmpegFrameWriter {
    /// Must be called within a tokio runtime.
    pub fn new(
        output_path: &Path,
        binary: impl Into<String>,
        render_size: Size,
        fps: u32,
        queue_depth: usize,
        settings: EncoderSettings,
    ) -> MontageResult<Self> {
        let staging = tempfile::tempdir()?;
        let (sender, mut receiver) = mpsc::channel::<Frame>(queue_depth.max(1));
        let dir = staging.path().to_path_buf();

        let worker = tokio::task::spawn_blocking(move || {
            let mut written = Vec::new();
            while let Some(frame) = receiver.blocking_recv() {
                let path = dir.join(format!("frame_{:06}.png", written.len()));
                frame
                    .buffer
                    .to_rgba_image()
                    .save(&path)
                    .map_err(|e| MontageError::data(format!("Failed to stage frame: {e}")))?;
                written.push((path, frame.at));
            }
            Ok(written)
        });

        Ok(Self {
            sender: Some(sender),
            worker,
            staging,
            output_path: output_path.to_path_buf(),
            binary: binary.into(),
            render_size,
            fps: fps.max(1),
            settings,
        })
    }

    /// Close the channel and collect the staged frames in presentation order.
    async fn staged_frames(&mut self) -> MontageResult<Vec<(PathBuf, MediaTime)>> {
        self.sender = None;
        let mut frames = (&mut self.worker)
            .await
            .map_err(|e| MontageError::data(format!("Frame worker failed: {e}")))??;
        frames.sort_by_key(|(_, at)| *at);
        Ok(frames)
    }
}

#[async_trait]
impl FrameWriter for FfmpegFrameWriter {
    fn is_ready_for_more_media_data(&self) -> bool {
        self.sender.as_ref().map_or(false, |s| s.capacity() > 0)
    }

    async fn ready(&mut self) -> MontageResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| MontageError::data("frame writer is finished"))?;
        sender
            .reserve()
            .await
            .map(drop)
            .map_err(|_| MontageError::data("frame worker stopped"))
    }

    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> MontageResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| MontageError::data("frame writer is finished"))?;
        sender
            .try_send(Frame { buffer, at })
            .map_err(|e| MontageError::data(format!("frame writer not ready: {e}")))
    }

    fn mark_as_finished(&mut self) {
        self.sender = None;
    }

    async fn finish_writing(self: Box<Self>) -> MontageResult<PathBuf> {
        let mut this = self;
        let frames = this.staged_frames().await?;
        if frames.is_empty() {
            return Err(MontageError::data("no frames were written"));
        }

        let list_path = this.staging.path().join("frames.ffconcat");
        let fallback = MediaTime::new(1, this.fps);
        std::fs::write(&list_path, build_concat_list(&frames, fallback))?;

        let duration = frames
            .windows(2)
            .map(|w| w[1].1 - w[0].1)
            .last()
            .unwrap_or(fallback)
            + frames.last().map_or(MediaTime::ZERO, |(_, at)| *at);
        let plan = FfmpegPlan {
            args: vec![
                "-y".to_string(),
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-nostats".to_string(),
                "-progress".to_string(),
                "pipe:1".to_string(),
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
                "-i".to_string(),
                list_path.display().to_string(),
                "-vf".to_string(),
                scale_filter(this.render_size),
                "-r".to_string(),
                format_rate(this.fps as f64),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "slow".to_string(),
                "-crf".to_string(),
                this.settings.crf.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
                "-f".to_string(),
                "mov".to_string(),
                this.output_path.display().to_string(),
            ],
            expected_duration_secs: duration.seconds(),
            total_frames: (duration.seconds() * this.fps as f64).round() as u64,
        };

        let binary = this.binary.clone();
        tokio::task::spawn_blocking(move || run_ffmpeg(&binary, &plan, None, None))
            .await
            .map_err(|e| MontageError::custom(format!("Encoder task failed: {e}")))?
            .map_err(|failure| match failure {
                FfmpegFailure::Cancelled => MontageError::custom("The operation was cancelled"),
                FfmpegFailure::Failed(message) => MontageError::custom(message),
            })?;

        Ok(this.output_path.clone())
    }
}

/// ffconcat script showing each staged frame until the next one starts.
///
/// The last frame lasts as long as the interval before it, or `fallback`
/// when it is the only frame. It is listed twice because the concat demuxer
/// ignores the duration of the final entry.
pub fn build_concat_list(frames: &[(PathBuf, MediaTime)], fallback: MediaTime) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    let mut last_interval = fallback;
    for (i, (path, at)) in frames.iter().enumerate() {
        let duration = match frames.get(i + 1) {
            Some((_, next)) => {
                last_interval = *next - *at;
                last_interval
            }
            None => last_interval,
        };
        list.push_str(&format!(
            "file {}\nduration {:.6}\n",
            concat_quote(path),
            duration.seconds()
        ));
    }
    if let Some((path, _)) = frames.last() {
        list.push_str(&format!("file {}\n", concat_quote(path)));
    }
    list
}

fn concat_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "'\\''"))
}

/// Creates [`FfmpegFrameWriter`]s with shared encoder parameters.
#[derive(Debug, Clone)]
pub struct FfmpegFrameWriterFactory {
    pub binary: String,
    pub render_size: Size,
    pub fps: u32,
    pub queue_depth: usize,
    pub settings: EncoderSettings,
}

impl FrameWriterFactory for FfmpegFrameWriterFactory {
    fn create_writer(&self, output_path: &Path) -> MontageResult<Box<dyn FrameWriter>> {
        if !crate::ffmpeg::is_executable(&self.binary) {
            return Err(MontageError::export_session(format!(
                "{} is not available",
                self.binary
            )));
        }
        Ok(Box::new(FfmpegFrameWriter::new(
            output_path,
            self.binary.clone(),
            self.render_size,
            self.fps,
            self.queue_depth,
            self.settings.clone(),
        )?))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records appended frame times; readiness follows a scripted pattern.
    #[derive(Default)]
    pub struct RecordingWriter {
        pub appended: Arc<Mutex<Vec<MediaTime>>>,
        /// Appends accepted before the writer reports busy once.
        pub burst: Option<usize>,
        pub since_ready: usize,
        pub waits: usize,
        pub finished: bool,
        pub path: PathBuf,
    }

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        fn is_ready_for_more_media_data(&self) -> bool {
            !self.finished && self.burst.map_or(true, |burst| self.since_ready < burst)
        }

        async fn ready(&mut self) -> MontageResult<()> {
            self.waits += 1;
            self.since_ready = 0;
            Ok(())
        }

        fn append(&mut self, _buffer: PixelBuffer, at: MediaTime) -> MontageResult<()> {
            self.since_ready += 1;
            self.appended.lock().unwrap().push(at);
            Ok(())
        }

        fn mark_as_finished(&mut self) {
            self.finished = true;
        }

        async fn finish_writing(self: Box<Self>) -> MontageResult<PathBuf> {
            Ok(self.path.clone())
        }
    }

    /// Factory handing out [`RecordingWriter`]s that share one log.
    #[derive(Default)]
    pub struct RecordingFactory {
        pub appended: Arc<Mutex<Vec<MediaTime>>>,
    }

    impl FrameWriterFactory for RecordingFactory {
        fn create_writer(&self, output_path: &Path) -> MontageResult<Box<dyn FrameWriter>> {
            Ok(Box::new(RecordingWriter {
                appended: self.appended.clone(),
                burst: Some(2),
                path: output_path.to_path_buf(),
                ..Default::default()
            }))
        }
    }
}
