//! # Stillpoint shared types (stillpoint-common)
//!
//! Leaf types shared by the engine and its hosts: fade curves, playback and
//! overlay configuration, the track model, the error taxonomy, and the event
//! stream types. Nothing in this crate touches audio hardware.

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod state;
pub mod track;

pub use config::{OverlayConfiguration, OverlayLoopMode, PlayerConfiguration, RepeatMode};
pub use error::{EngineError, ErrorCategory, Result};
pub use events::{EventBus, PlayerEvent};
pub use fade_curves::{CrossfadeCalculator, FadeCurve};
pub use state::{
    CrossfadeOperation, CrossfadePhase, CrossfadeProgress, CrossfadeResult, OverlayState,
    PlaybackFailure, PlayerState,
};
pub use track::{Track, TrackLocator, TrackMetadata};
