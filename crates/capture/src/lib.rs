//! Montage Live Capture
//!
//! Runs a camera and microphone session and records it into a movie file.
//! Capture hardware and encoders sit behind traits so the session state
//! machine can be driven by in-memory fakes in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 CaptureSession                   │
//! │  ┌──────────────┐   media    ┌────────────────┐  │
//! │  │ CaptureDevice│ ─────────▶ │ handle_event   │  │
//! │  │ (camera+mic) │            │ origin latch   │  │
//! │  └──────┬───────┘            │ ready-or-drop  │  │
//! │         │ metadata           └───────┬────────┘  │
//! │         ▼                            ▼           │
//! │  ┌──────────────┐            ┌────────────────┐  │
//! │  │ no-op drain  │            │ SampleWriter   │  │
//! │  └──────────────┘            │ (.mov output)  │  │
//! │                              └────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Sessions are rebuilt from scratch after every recording; nothing from a
//! finished take is reused for the next one.

pub mod device;
pub mod event;
#[cfg(feature = "gst")]
pub mod pipeline;
pub mod session;
pub mod writer;

pub use device::*;
pub use event::*;
#[cfg(feature = "gst")]
pub use pipeline::{GstCaptureDevice, GstDeviceFactory};
pub use session::*;
pub use writer::*;
