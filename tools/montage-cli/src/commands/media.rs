//! Merge, pair, crop, generate, and probe.

use std::path::PathBuf;

use montage_common::{AppConfig, MediaKind};
use montage_model::{MediaAsset, MediaTime};
use montage_render::Montage;

fn kind(audio: bool) -> MediaKind {
    if audio {
        MediaKind::Audio
    } else {
        MediaKind::Video
    }
}

fn open_all(montage: &Montage, files: &[PathBuf]) -> anyhow::Result<Vec<MediaAsset>> {
    files
        .iter()
        .map(|path| {
            montage
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))
        })
        .collect()
}

pub(crate) fn report(asset: &MediaAsset) {
    println!("{}", asset.path.display());
    println!("  Duration: {:.3}s", asset.duration.seconds());
    for track in &asset.tracks {
        println!(
            "  Track {}: {} {}x{} {}",
            track.index,
            track.kind,
            track.natural_size.width,
            track.natural_size.height,
            track.codec.as_deref().unwrap_or("-")
        );
    }
}

pub async fn merge(config: &AppConfig, files: Vec<PathBuf>, audio: bool) -> anyhow::Result<()> {
    let montage = Montage::from_config(config);
    let assets = open_all(&montage, &files)?;
    println!("Merging {} files...", assets.len());
    let output = montage.merge(&assets, kind(audio)).await?;
    report(&output);
    Ok(())
}

pub async fn pair(config: &AppConfig, video: PathBuf, audio: PathBuf) -> anyhow::Result<()> {
    let montage = Montage::from_config(config);
    let assets = open_all(&montage, &[video, audio])?;
    let output = montage.merge_pair(&assets[0], &assets[1]).await?;
    report(&output);
    Ok(())
}

pub async fn crop(
    config: &AppConfig,
    file: PathBuf,
    start: f64,
    end: f64,
    audio: bool,
) -> anyhow::Result<()> {
    let montage = Montage::from_config(config);
    let asset = montage.open(&file)?;
    println!("Cropping {} to {start:.3}s..{end:.3}s", file.display());
    let output = montage.crop(&asset, kind(audio), start, end).await?;
    report(&output);
    Ok(())
}

pub async fn generate(
    config: &AppConfig,
    images: Vec<PathBuf>,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    let montage = Montage::from_config(config);
    let mut frames = Vec::with_capacity(images.len());
    for path in &images {
        let image = image::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        frames.push(image.to_rgba8());
    }

    let output = match duration {
        Some(secs) => {
            let [image] = <[_; 1]>::try_from(frames)
                .map_err(|_| anyhow::anyhow!("--duration takes exactly one image"))?;
            let duration = MediaTime::from_seconds(secs, config.generation.timescale);
            montage.generate_video_with_duration(image, duration).await?
        }
        None => montage.generate_video(frames).await?,
    };
    report(&output);
    Ok(())
}

pub fn probe(config: &AppConfig, file: PathBuf) -> anyhow::Result<()> {
    let montage = Montage::from_config(config);
    let asset = montage.open(&file)?;
    println!("{}", serde_json::to_string_pretty(&asset)?);
    Ok(())
}
