//! Source assets, composition tracks, and compositions.
//!
//! A [`Composition`] owns at most one video and one audio
//! [`CompositionTrack`]. Each track is an ordered list of segments copied
//! from source asset tracks, placed at destination offsets that never
//! overlap.

use std::path::{Path, PathBuf};

use montage_common::{MediaKind, MontageError};
use serde::{Deserialize, Serialize};

use crate::geometry::{AffineTransform, Size};
use crate::time::{MediaTime, TimeRange};

/// Errors from building composition tracks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    #[error("cannot insert {inserted} media into a {destination} track")]
    KindMismatch {
        inserted: MediaKind,
        destination: MediaKind,
    },

    #[error("insertion at {at} overlaps existing media ending at {end}")]
    Overlap { at: MediaTime, end: MediaTime },

    #[error("range {start}..{end} lies outside the source track")]
    OutsideSource { start: MediaTime, end: MediaTime },

    #[error("composition already has a {0} track")]
    DuplicateTrack(MediaKind),

    #[error("composition has no {0} track")]
    MissingTrack(MediaKind),
}

impl From<TrackError> for MontageError {
    fn from(err: TrackError) -> Self {
        MontageError::composition_track(err.to_string())
    }
}

/// One media track inside a file-backed asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetTrack {
    /// Stream index within the container.
    pub index: usize,

    pub kind: MediaKind,

    /// Span of the track in asset time.
    pub time_range: TimeRange,

    /// Stored frame size before the preferred transform (zero for audio).
    pub natural_size: Size,

    /// Orientation the track should be displayed with.
    pub preferred_transform: AffineTransform,

    pub codec: Option<String>,
}

/// A file-backed media resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub duration: MediaTime,
    pub tracks: Vec<AssetTrack>,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>, duration: MediaTime, tracks: Vec<AssetTrack>) -> Self {
        Self {
            path: path.into(),
            duration,
            tracks,
        }
    }

    /// Tracks of one kind, in stream order.
    pub fn tracks(&self, kind: MediaKind) -> impl Iterator<Item = &AssetTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn first_track(&self, kind: MediaKind) -> Option<&AssetTrack> {
        self.tracks(kind).next()
    }
}

/// A range of a source track placed on the composition timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSegment {
    pub source_path: PathBuf,
    pub source_track: usize,
    /// Range within the source track.
    pub source_range: TimeRange,
    /// Destination offset on the composition timeline.
    pub target_start: MediaTime,
}

impl TrackSegment {
    pub fn target_range(&self) -> TimeRange {
        TimeRange {
            start: self.target_start,
            duration: self.source_range.duration,
        }
    }
}

/// An ordered, non-overlapping sequence of segments of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionTrack {
    pub kind: MediaKind,
    pub segments: Vec<TrackSegment>,
    pub preferred_transform: AffineTransform,
    pub natural_size: Size,
}

impl CompositionTrack {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            segments: Vec::new(),
            preferred_transform: AffineTransform::IDENTITY,
            natural_size: Size::ZERO,
        }
    }

    /// End of the last segment.
    pub fn duration(&self) -> MediaTime {
        self.segments
            .last()
            .map(|s| s.target_range().end())
            .unwrap_or(MediaTime::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Copy `range` of `source` into this track starting at `at`.
    ///
    /// Segments are appended in destination order: `at` must not precede the
    /// current end of the track. Gaps are allowed. Empty ranges are accepted
    /// and leave the track unchanged.
    pub fn insert_time_range(
        &mut self,
        range: TimeRange,
        source: &AssetTrack,
        source_path: &Path,
        at: MediaTime,
    ) -> Result<(), TrackError> {
        if source.kind != self.kind {
            return Err(TrackError::KindMismatch {
                inserted: source.kind,
                destination: self.kind,
            });
        }
        if !source.time_range.contains_range(&range) {
            return Err(TrackError::OutsideSource {
                start: range.start,
                end: range.end(),
            });
        }
        let end = self.duration();
        if at < end || at.is_negative() {
            return Err(TrackError::Overlap { at, end });
        }
        if range.is_empty() {
            return Ok(());
        }

        if self.natural_size == Size::ZERO {
            self.natural_size = source.natural_size;
        }
        self.segments.push(TrackSegment {
            source_path: source_path.to_path_buf(),
            source_track: source.index,
            source_range: range,
            target_start: at,
        });
        Ok(())
    }
}

/// An in-memory, not yet encoded timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub video: Option<CompositionTrack>,
    pub audio: Option<CompositionTrack>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty track of the given kind.
    pub fn add_track(&mut self, kind: MediaKind) -> Result<&mut CompositionTrack, TrackError> {
        let slot = match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        };
        if slot.is_some() {
            return Err(TrackError::DuplicateTrack(kind));
        }
        Ok(slot.insert(CompositionTrack::new(kind)))
    }

    pub fn track(&self, kind: MediaKind) -> Option<&CompositionTrack> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    pub fn track_mut(&mut self, kind: MediaKind) -> Result<&mut CompositionTrack, TrackError> {
        match kind {
            MediaKind::Video => self.video.as_mut(),
            MediaKind::Audio => self.audio.as_mut(),
        }
        .ok_or(TrackError::MissingTrack(kind))
    }

    /// Longest track end.
    pub fn duration(&self) -> MediaTime {
        let video = self.video.as_ref().map(|t| t.duration());
        let audio = self.audio.as_ref().map(|t| t.duration());
        video
            .into_iter()
            .chain(audio)
            .fold(MediaTime::ZERO, MediaTime::max)
    }

    /// Whether no track carries any segment.
    pub fn is_empty(&self) -> bool {
        self.video.as_ref().map_or(true, |t| t.is_empty())
            && self.audio.as_ref().map_or(true, |t| t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: i64) -> MediaTime {
        MediaTime::new(s * 600, 600)
    }

    fn source_track(kind: MediaKind, duration: MediaTime) -> AssetTrack {
        AssetTrack {
            index: 0,
            kind,
            time_range: TimeRange::from_zero(duration).unwrap(),
            natural_size: Size::new(1920.0, 1080.0),
            preferred_transform: AffineTransform::IDENTITY,
            codec: None,
        }
    }

    #[test]
    fn test_insert_appends_segments_and_tracks_duration() {
        let source = source_track(MediaKind::Video, secs(4));
        let mut track = CompositionTrack::new(MediaKind::Video);
        let range = source.time_range;

        track
            .insert_time_range(range, &source, Path::new("a.mov"), MediaTime::ZERO)
            .unwrap();
        track
            .insert_time_range(range, &source, Path::new("b.mov"), secs(4))
            .unwrap();

        assert_eq!(track.segments.len(), 2);
        assert_eq!(track.duration(), secs(8));
        assert_eq!(track.natural_size, Size::new(1920.0, 1080.0));
    }

    #[test]
    fn test_insert_rejects_kind_mismatch() {
        let source = source_track(MediaKind::Audio, secs(1));
        let mut track = CompositionTrack::new(MediaKind::Video);
        let err = track
            .insert_time_range(source.time_range, &source, Path::new("a.m4a"), MediaTime::ZERO)
            .unwrap_err();
        assert!(matches!(err, TrackError::KindMismatch { .. }));
    }

    #[test]
    fn test_insert_rejects_overlap() {
        let source = source_track(MediaKind::Video, secs(4));
        let mut track = CompositionTrack::new(MediaKind::Video);
        track
            .insert_time_range(source.time_range, &source, Path::new("a.mov"), MediaTime::ZERO)
            .unwrap();
        let err = track
            .insert_time_range(source.time_range, &source, Path::new("a.mov"), secs(3))
            .unwrap_err();
        assert!(matches!(err, TrackError::Overlap { .. }));
        assert_eq!(track.segments.len(), 1);
    }

    #[test]
    fn test_insert_rejects_range_outside_source() {
        let source = source_track(MediaKind::Video, secs(2));
        let mut track = CompositionTrack::new(MediaKind::Video);
        let range = TimeRange::from_zero(secs(3)).unwrap();
        let err = track
            .insert_time_range(range, &source, Path::new("a.mov"), MediaTime::ZERO)
            .unwrap_err();
        assert!(matches!(err, TrackError::OutsideSource { .. }));
    }

    #[test]
    fn test_insert_allows_gaps() {
        let source = source_track(MediaKind::Audio, secs(1));
        let mut track = CompositionTrack::new(MediaKind::Audio);
        track
            .insert_time_range(source.time_range, &source, Path::new("a.m4a"), secs(5))
            .unwrap();
        assert_eq!(track.duration(), secs(6));
    }

    #[test]
    fn test_composition_tracks() {
        let mut composition = Composition::new();
        composition.add_track(MediaKind::Video).unwrap();
        assert_eq!(
            composition.add_track(MediaKind::Video).unwrap_err(),
            TrackError::DuplicateTrack(MediaKind::Video)
        );
        assert!(composition.track_mut(MediaKind::Audio).is_err());
        assert!(composition.is_empty());
        assert_eq!(composition.duration(), MediaTime::ZERO);
    }

    #[test]
    fn test_track_error_maps_to_composition_track_kind() {
        let err: MontageError = TrackError::MissingTrack(MediaKind::Audio).into();
        assert_eq!(err.kind_name(), "composition_track");
    }
}
