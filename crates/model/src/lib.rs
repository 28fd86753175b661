//! Montage Media Model
//!
//! Defines the core data contracts shared by the offline pipeline and live
//! capture:
//! - **Time:** exact rational media time and time ranges
//! - **Tracks:** source assets, composition tracks, and compositions
//! - **Geometry:** points, sizes, rectangles, and affine transforms
//! - **Overlays:** image-sequence, text, and drawing overlay descriptions
//!
//! Time is never stored as floating point. Repeated concatenation of
//! segments accumulates no drift because every sum is exact.

pub mod geometry;
pub mod overlay;
pub mod time;
pub mod track;

pub use geometry::*;
pub use montage_common::MediaKind;
pub use overlay::*;
pub use time::*;
pub use track::*;
