//! Track model
//!
//! Validated audio references and the decoded-file properties attached to
//! them at load time.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where a track's audio lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackLocator {
    /// Local file path
    File { path: PathBuf },
    /// Remote URL (accepted as a reference; resolution is the host's concern)
    Url { url: String },
}

impl TrackLocator {
    /// Display name derived from the locator when no title metadata exists
    pub fn display_name(&self) -> String {
        match self {
            TrackLocator::File { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            TrackLocator::Url { url } => url.clone(),
        }
    }

    /// Local path, if this locator refers to a file
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            TrackLocator::File { path } => Some(path),
            TrackLocator::Url { .. } => None,
        }
    }
}

/// Decoded file properties, filled at load time and immutable thereafter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Duration in seconds
    pub duration: f64,
    /// Source sample rate in Hz (before normalization)
    pub sample_rate: u32,
    /// Source channel count
    pub channels: u16,
    /// Source bit depth, when the container reports one
    pub bit_depth: Option<u32>,
    /// Title tag, when present
    pub title: Option<String>,
    /// Artist tag, when present
    pub artist: Option<String>,
}

/// Validated audio reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique track identity
    pub id: Uuid,
    /// Audio location
    pub locator: TrackLocator,
    /// Filled at load; `None` until the file has been probed
    pub metadata: Option<TrackMetadata>,
}

impl Track {
    /// Create a track from a local file path, checking existence
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(EngineError::FileLoad {
                reason: format!("file does not exist: {}", path.display()),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            locator: TrackLocator::File { path },
            metadata: None,
        })
    }

    /// Create a track from a remote URL
    ///
    /// Only minimally validated; remote resolution belongs to the host's
    /// decoder collaborator.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !url.contains("://") {
            return Err(EngineError::FileLoad {
                reason: format!("not a URL: {url}"),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            locator: TrackLocator::Url { url },
            metadata: None,
        })
    }

    /// Title for display: metadata title when known, otherwise derived
    /// from the locator.
    pub fn title(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| self.locator.display_name())
    }

    /// Duration in seconds, when metadata has been filled
    pub fn duration(&self) -> Option<f64> {
        self.metadata.as_ref().map(|m| m.duration)
    }
}
