//! Error types for the playback engine
//!
//! A single closed error enum covering every failure kind the engine can
//! surface, with a coarse category mapping used for logging and for the
//! `failed` state payload.

use crate::state::{PlaybackFailure, PlayerState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the playback engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// File missing, unreadable, corrupt, or decode failure
    #[error("file load failed: {reason}")]
    FileLoad { reason: String },

    /// Decoded audio could not be normalized to the standard format
    #[error("invalid audio format: {reason}")]
    InvalidFormat { reason: String },

    /// Out-of-range parameter rejected at configuration update
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Operation not permitted in the current state
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// Disallowed state-machine transition
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: PlayerState, to: PlayerState },

    /// Audio session could not be configured
    #[error("audio session configuration failed: {reason}")]
    SessionConfiguration { reason: String },

    /// Audio hardware refused to start
    #[error("engine start failed: {reason}")]
    EngineStart { reason: String },

    /// Output route change could not be handled
    #[error("route change failed: {reason}")]
    RouteChange { reason: String },

    /// Runtime frame-scheduling failure
    #[error("buffer scheduling failed: {reason}")]
    BufferScheduling { reason: String },

    /// Navigation attempted on an empty playlist
    #[error("playlist is empty")]
    EmptyPlaylist,

    /// Operation requires a loaded track
    #[error("no active track")]
    NoActiveTrack,

    /// Playlist index out of bounds
    #[error("playlist index {index} out of bounds (len {len})")]
    InvalidPlaylistIndex { index: usize, len: usize },

    /// Requested sound effect is not in the cache (never preloaded or evicted)
    #[error("sound effect not found: {id}")]
    EffectNotFound { id: String },

    /// Operation was cancelled by a higher-priority command
    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Wall-clock bound exceeded
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// Fallback
    #[error("{reason}")]
    Unknown { reason: String },
}

/// Coarse error category for logging and failure display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    File,
    Configuration,
    State,
    System,
    Playback,
    Playlist,
    Unknown,
}

impl EngineError {
    /// Category this error kind maps to
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::FileLoad { .. } | EngineError::InvalidFormat { .. } => ErrorCategory::File,
            EngineError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            EngineError::InvalidState { .. } | EngineError::InvalidTransition { .. } => {
                ErrorCategory::State
            }
            EngineError::SessionConfiguration { .. }
            | EngineError::EngineStart { .. }
            | EngineError::RouteChange { .. } => ErrorCategory::System,
            EngineError::BufferScheduling { .. }
            | EngineError::Cancelled { .. }
            | EngineError::Timeout { .. } => ErrorCategory::Playback,
            EngineError::EmptyPlaylist
            | EngineError::NoActiveTrack
            | EngineError::InvalidPlaylistIndex { .. }
            | EngineError::EffectNotFound { .. } => ErrorCategory::Playlist,
            EngineError::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Failure payload for [`PlayerState::Failed`]
    pub fn to_failure(&self) -> PlaybackFailure {
        PlaybackFailure {
            category: self.category(),
            reason: self.to_string(),
        }
    }

    /// True for errors the engine recovers from locally without entering
    /// the failed state (cancelled crossfades and preempted file loads).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }
}

/// Result type alias using the engine error
pub type Result<T> = std::result::Result<T, EngineError>;
