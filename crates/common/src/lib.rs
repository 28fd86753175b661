//! Montage Common Utilities
//!
//! Shared infrastructure for all Montage crates:
//! - Error kinds and result aliases
//! - Output media kinds and the file-manager collaborator
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod fs;
pub mod kind;
pub mod logging;

pub use config::*;
pub use error::*;
pub use fs::*;
pub use kind::*;
