//! Capture hardware and preview collaborators.

use std::sync::Arc;

use montage_common::MontageResult;
use tokio::sync::mpsc;

use crate::event::{CameraPosition, CaptureEvent, Mirroring};

/// Where a running device delivers its buffers.
///
/// Media and metadata use separate channels so a slow metadata consumer can
/// never hold up camera or microphone buffers.
#[derive(Debug, Clone)]
pub struct CaptureOutputs {
    pub media: mpsc::Sender<CaptureEvent>,
    pub metadata: mpsc::Sender<CaptureEvent>,
}

/// A camera plus microphone pair.
///
/// Implementations deliver buffers from their own threads with `try_send`:
/// a full channel means the buffer is dropped, never queued.
pub trait CaptureDevice: Send {
    /// Begin delivering buffers.
    fn start(&mut self, outputs: CaptureOutputs) -> MontageResult<()>;

    /// Halt delivery. No buffer is sent after this returns.
    fn stop(&mut self) -> MontageResult<()>;

    /// Swap the camera input in place, keeping outputs attached.
    fn switch_camera(&mut self, position: CameraPosition, mirroring: Mirroring)
        -> MontageResult<()>;

    fn is_running(&self) -> bool;
}

/// Builds fresh device endpoints for a camera position.
pub trait DeviceFactory: Send + Sync {
    fn open(
        &self,
        position: CameraPosition,
        mirroring: Mirroring,
    ) -> MontageResult<Box<dyn CaptureDevice>>;
}

/// A live preview target. Attaching replaces any previous attachment.
pub trait PreviewSurface: Send + Sync {
    fn attach(&self, position: CameraPosition, mirroring: Mirroring);

    fn detach(&self);
}

/// Preview surface that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreview;

impl PreviewSurface for NoPreview {
    fn attach(&self, position: CameraPosition, _mirroring: Mirroring) {
        tracing::trace!(?position, "Preview attached (headless)");
    }

    fn detach(&self) {}
}

pub(crate) fn default_preview() -> Arc<dyn PreviewSurface> {
    Arc::new(NoPreview)
}
