//! Record from the camera and microphone.

use montage_common::AppConfig;

#[cfg(feature = "gst")]
pub async fn run(
    config: &AppConfig,
    front: bool,
    max_duration: Option<f64>,
) -> anyhow::Result<()> {
    use std::sync::Arc;

    use montage_capture::{
        run_session, CameraPosition, CaptureConfig, CaptureSession, CaptureSource,
        FfmpegWriterFactory, GstDeviceFactory,
    };
    use montage_common::CachesFileManager;

    let mut defaults = config.capture.clone();
    if max_duration.is_some() {
        defaults.max_duration_secs = max_duration;
    }
    let position = if front {
        CameraPosition::Front
    } else {
        CameraPosition::Back
    };

    let mut session = CaptureSession::new(
        CaptureConfig::from(&defaults),
        Arc::new(GstDeviceFactory::from(&defaults)),
        Arc::new(FfmpegWriterFactory::new(&config.export.ffmpeg_binary)),
        Arc::new(CachesFileManager::new(&config.caches_dir)),
    );
    session.setup_capture_session(position).await?;
    session.start_capture(CaptureSource::Video)?;
    match defaults.max_duration_secs {
        Some(secs) => println!("Recording for up to {secs:.1}s. Press Ctrl+C to stop."),
        None => println!("Recording. Press Ctrl+C to stop."),
    }

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    let recording = run_session(&mut session, stop).await?;

    let stats = session.stats();
    match recording {
        Some(asset) => {
            super::media::report(&asset);
            println!(
                "  Buffers: {} appended, {} dropped ({:.1}%)",
                stats.appended(),
                stats.dropped(),
                stats.drop_rate()
            );
        }
        None => println!("Nothing was recorded"),
    }
    Ok(())
}

#[cfg(not(feature = "gst"))]
pub async fn run(
    _config: &AppConfig,
    _front: bool,
    _max_duration: Option<f64>,
) -> anyhow::Result<()> {
    anyhow::bail!("montage was built without camera support; rebuild with `--features gst`")
}
