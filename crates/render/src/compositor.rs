//! Offline compositor: builds compositions from source assets.

use std::path::PathBuf;

use montage_common::{MediaKind, MontageError, MontageResult};
use montage_model::{
    advance, AssetTrack, Composition, DisplayGeometry, MediaAsset, MediaTime, Overlay, TimeRange,
    TrackError,
};

use crate::overlay::{build_video_composition, VideoComposition};

/// A per-asset insertion failure recorded during a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeFailure {
    /// Position of the asset in the input list.
    pub index: usize,
    pub path: PathBuf,
    pub kind: MediaKind,
    pub error: TrackError,
}

/// Result of a concatenation merge: the composition plus every recorded
/// per-asset failure.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub composition: Composition,
    pub failures: Vec<MergeFailure>,
    /// Sum of all input durations; where the next asset would have started.
    pub timeline_end: MediaTime,
}

impl MergeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The composition if every insertion succeeded, otherwise a
    /// `CompositionTrack` error describing the failures.
    pub fn into_composition(self) -> MontageResult<Composition> {
        if self.failures.is_empty() {
            return Ok(self.composition);
        }
        let details = self
            .failures
            .iter()
            .map(|f| format!("asset {} ({}) {}: {}", f.index, f.path.display(), f.kind, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        Err(MontageError::composition_track(format!(
            "{} insertion(s) failed: {details}",
            self.failures.len()
        )))
    }
}

/// Concatenate `assets` in order onto one video and one audio track.
///
/// Each asset's first video and first audio track are inserted at a running
/// offset that advances by the asset's duration. Failures are recorded and
/// the remaining assets are still processed. The video orientation of the
/// last successfully inserted asset wins.
pub fn merge_assets(assets: &[MediaAsset]) -> MontageResult<MergeOutcome> {
    if assets.is_empty() {
        return Err(MontageError::input_parameters("no assets to merge"));
    }

    let mut composition = Composition::new();
    composition.add_track(MediaKind::Video)?;
    composition.add_track(MediaKind::Audio)?;

    let mut failures = Vec::new();
    let mut insert_time = MediaTime::ZERO;

    for (index, asset) in assets.iter().enumerate() {
        for kind in [MediaKind::Video, MediaKind::Audio] {
            let Some(source) = asset.first_track(kind) else {
                continue;
            };
            let result = clamped_range(asset.duration, source).and_then(|range| {
                let track = composition.track_mut(kind)?;
                track.insert_time_range(range, source, &asset.path, insert_time)?;
                if kind == MediaKind::Video {
                    track.preferred_transform = source.preferred_transform;
                }
                Ok(())
            });
            if let Err(error) = result {
                tracing::warn!(
                    index,
                    path = %asset.path.display(),
                    kind = %kind,
                    error = %error,
                    "Failed to insert asset track"
                );
                failures.push(MergeFailure {
                    index,
                    path: asset.path.clone(),
                    kind,
                    error,
                });
            }
        }
        insert_time = advance(insert_time, asset.duration);
    }

    tracing::info!(
        assets = assets.len(),
        failures = failures.len(),
        duration_secs = composition.duration().seconds(),
        "Merged assets"
    );

    Ok(MergeOutcome {
        composition,
        failures,
        timeline_end: insert_time,
    })
}

/// Pair a video asset's picture with an audio asset's sound, both from zero.
///
/// The audio is cut to the video's duration, or shorter when the audio track
/// itself ends earlier.
pub fn merge_pair(video: &MediaAsset, audio: &MediaAsset) -> MontageResult<Composition> {
    let video_source = video.first_track(MediaKind::Video).ok_or_else(|| {
        MontageError::composition_track(format!("{} has no video track", video.path.display()))
    })?;
    let audio_source = audio.first_track(MediaKind::Audio).ok_or_else(|| {
        MontageError::composition_track(format!("{} has no audio track", audio.path.display()))
    })?;

    let mut composition = Composition::new();

    let track = composition.add_track(MediaKind::Video)?;
    track.insert_time_range(
        clamped_range(video.duration, video_source)?,
        video_source,
        &video.path,
        MediaTime::ZERO,
    )?;
    track.preferred_transform = video_source.preferred_transform;

    composition.add_track(MediaKind::Audio)?.insert_time_range(
        clamped_range(video.duration, audio_source)?,
        audio_source,
        &audio.path,
        MediaTime::ZERO,
    )?;

    tracing::info!(
        video = %video.path.display(),
        audio = %audio.path.display(),
        duration_secs = composition.duration().seconds(),
        "Paired video and audio"
    );
    Ok(composition)
}

/// Place `asset` on a fresh composition and lay `overlays` out over it.
pub fn compose_overlays(
    asset: &MediaAsset,
    overlays: &[Overlay],
    geometry: &DisplayGeometry,
) -> MontageResult<(Composition, VideoComposition)> {
    let video_source = asset.first_track(MediaKind::Video).ok_or_else(|| {
        MontageError::composition_track(format!("{} has no video track", asset.path.display()))
    })?;

    let mut composition = Composition::new();
    let track = composition.add_track(MediaKind::Video)?;
    track.insert_time_range(
        clamped_range(asset.duration, video_source)?,
        video_source,
        &asset.path,
        MediaTime::ZERO,
    )?;
    track.preferred_transform = video_source.preferred_transform;

    if let Some(audio_source) = asset.first_track(MediaKind::Audio) {
        composition.add_track(MediaKind::Audio)?.insert_time_range(
            clamped_range(asset.duration, audio_source)?,
            audio_source,
            &asset.path,
            MediaTime::ZERO,
        )?;
    }

    let video_composition = build_video_composition(&composition, overlays, geometry)?;
    Ok((composition, video_composition))
}

/// `[0, duration)` limited to the part the source track actually covers.
fn clamped_range(duration: MediaTime, source: &AssetTrack) -> Result<TimeRange, TrackError> {
    let wanted = TimeRange::from_zero(duration).ok_or(TrackError::OutsideSource {
        start: MediaTime::ZERO,
        end: duration,
    })?;
    wanted
        .intersection(&source.time_range)
        .ok_or(TrackError::OutsideSource {
            start: wanted.start,
            end: wanted.end(),
        })
}
