//! Montage Render Engine
//!
//! Offline pipeline that builds compositions from source assets, lays out
//! visual overlays, and encodes the result to files.
//!
//! # Pipeline Architecture
//!
//! ```text
//! assets ──┬── merge / merge_pair ──────────────┐
//!          │                                    │
//!          └── compose_overlays ── layer engine ┤ Composition
//!                                               │ (+ VideoComposition)
//! images ── rasterize ── FrameQueue ── writer   ▼
//!                           │             Exporter ── ffmpeg ── output.mov
//!                           ▼
//!                      output.mov
//! ```

pub mod compositor;
pub mod export;
pub mod ffmpeg;
pub mod generate;
pub mod overlay;
pub mod pixel;
pub mod probe;
pub mod toolkit;

pub use compositor::*;
pub use export::*;
pub use ffmpeg::{EncoderSettings, FfmpegBackend};
pub use generate::*;
pub use overlay::*;
pub use pixel::*;
pub use probe::*;
pub use toolkit::*;
