//! Events delivered by capture devices and notifications emitted by sessions.

use montage_common::MediaKind;
use montage_model::{MediaAsset, MediaTime};
use serde::{Deserialize, Serialize};

/// Which physical camera a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

/// What `start_capture` was asked to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Video,
    Photo,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoOrientation {
    #[default]
    Portrait,
}

/// Mirroring applied to the video and photo outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mirroring {
    pub video_mirrored: bool,
    pub photo_mirrored: bool,
    pub orientation: VideoOrientation,
}

impl Mirroring {
    /// Only the front camera is mirrored.
    pub fn for_position(position: CameraPosition) -> Self {
        let mirrored = position == CameraPosition::Front;
        Self {
            video_mirrored: mirrored,
            photo_mirrored: mirrored,
            orientation: VideoOrientation::Portrait,
        }
    }
}

/// One RGBA camera frame, rows top-down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Interleaved signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplePayload {
    Video(VideoFrame),
    Audio(AudioChunk),
}

/// A timestamped media buffer from the capture hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Presentation time on the device clock.
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub payload: SamplePayload,
}

impl SampleBuffer {
    pub fn video(pts: MediaTime, duration: MediaTime, frame: VideoFrame) -> Self {
        Self {
            pts,
            duration,
            payload: SamplePayload::Video(frame),
        }
    }

    pub fn audio(pts: MediaTime, chunk: AudioChunk) -> Self {
        let duration = MediaTime::new(chunk.frames() as i64, chunk.sample_rate);
        Self {
            pts,
            duration,
            payload: SamplePayload::Audio(chunk),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.payload {
            SamplePayload::Video(_) => MediaKind::Video,
            SamplePayload::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn end(&self) -> MediaTime {
        self.pts + self.duration
    }
}

/// Detected-object metadata. Delivered on its own channel and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFrame {
    pub pts: MediaTime,
    pub object_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Sample(SampleBuffer),
    Metadata(MetadataFrame),
}

/// What happened to an event handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Appended,
    /// The writer was not ready for this kind; the buffer was discarded.
    Dropped,
    /// Not recording, or not a media buffer.
    Ignored,
    /// Appended, and the recording reached its maximum duration.
    LimitReached,
}

/// Notifications sent to whoever observes a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    Ready { position: CameraPosition },
    RecordingStarted,
    Finished(MediaAsset),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_front_camera_is_mirrored() {
        let front = Mirroring::for_position(CameraPosition::Front);
        assert!(front.video_mirrored && front.photo_mirrored);
        assert_eq!(front.orientation, VideoOrientation::Portrait);

        for position in [CameraPosition::Back, CameraPosition::Unspecified] {
            let m = Mirroring::for_position(position);
            assert!(!m.video_mirrored && !m.photo_mirrored);
        }
    }

    #[test]
    fn test_audio_sample_duration_follows_frame_count() {
        let chunk = AudioChunk {
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0; 4_800],
        };
        let sample = SampleBuffer::audio(MediaTime::new(1, 1), chunk);
        assert_eq!(sample.kind(), MediaKind::Audio);
        assert_eq!(sample.duration, MediaTime::new(2_400, 48_000));
        assert_eq!(sample.end(), MediaTime::new(52_800, 48_000));
    }
}
