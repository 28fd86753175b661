//! Error types shared across Montage crates.

use std::path::PathBuf;

/// Top-level error type for Montage operations.
#[derive(Debug, thiserror::Error)]
pub enum MontageError {
    /// Empty or invalid argument set (e.g. an empty asset list).
    #[error("Invalid input parameters: {message}")]
    InputParameters { message: String },

    /// An output path or pixel buffer could not be produced.
    #[error("Data error: {message}")]
    Data { message: String },

    /// Track creation or segment insertion failed.
    #[error("Composition track error: {message}")]
    CompositionTrack { message: String },

    /// The encoder for an export could not be constructed.
    #[error("Export session could not be created: {message}")]
    AssetExportSession { message: String },

    /// A source asset is unreadable or malformed.
    #[error("Asset error: {message}")]
    Asset { message: String },

    /// Failure reported by an underlying encoder.
    #[error("{0}")]
    Custom(String),

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MontageError.
pub type MontageResult<T> = Result<T, MontageError>;

impl MontageError {
    pub fn input_parameters(msg: impl Into<String>) -> Self {
        Self::InputParameters {
            message: msg.into(),
        }
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data {
            message: msg.into(),
        }
    }

    pub fn composition_track(msg: impl Into<String>) -> Self {
        Self::CompositionTrack {
            message: msg.into(),
        }
    }

    pub fn export_session(msg: impl Into<String>) -> Self {
        Self::AssetExportSession {
            message: msg.into(),
        }
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset {
            message: msg.into(),
        }
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Short stable name of the error kind, used in logs and CLI output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::InputParameters { .. } => "input_parameters",
            Self::Data { .. } => "data",
            Self::CompositionTrack { .. } => "composition_track",
            Self::AssetExportSession { .. } => "asset_export_session",
            Self::Asset { .. } => "asset",
            Self::Custom(_) => "custom",
            Self::Capture { .. } => "capture",
            Self::Config { .. } => "config",
            Self::FileNotFound { .. } => "file_not_found",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}
