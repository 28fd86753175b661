//! Media kinds shared by tracks, outputs, and capture buffers.

use serde::{Deserialize, Serialize};

/// The kind of media a track, buffer, or output file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// File extension used for generated outputs of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "m4a",
            MediaKind::Video => "mov",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
