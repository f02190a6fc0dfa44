//! # Stillpoint engine (stillpoint-engine)
//!
//! Embeddable audio playback engine for long-form ambient and meditation
//! programs, built around seamless, glitch-free track transitions.
//!
//! **Core pieces:**
//! - `audio`: decode/resample to the standard 44.1 kHz stereo format, the
//!   lock-free frame queue, and the cpal device stream
//! - `engine`: the dual-node [`AudioEngine`] with overlay node, effects bus
//!   and the sample-accurate synchronized crossfade
//! - `playback`: the state store, crossfade orchestrator, prioritized
//!   operation queue and near-end scheduler
//! - `overlay` / `effects`: the independent secondary layers
//! - [`Player`]: the facade hosts embed
//!
//! Shared leaf types (configuration, curves, events, errors) live in
//! `stillpoint-common` and are re-exported here.

pub mod audio;
pub mod collaborators;
pub mod effects;
pub mod engine;
pub mod overlay;
pub mod playback;
pub mod player;

pub use collaborators::{
    AudioSessionManager, NoopNowPlaying, NowPlayingSink, NullAudioSession, PlaylistNavigator,
    TrackList,
};
pub use effects::{EffectCache, SoundEffect};
pub use engine::{AudioEngine, CrossfadeState, DeviceSink, NullSink, OutputSink};
pub use overlay::OverlayPlayer;
pub use player::{Player, PlayerOptions, DEFAULT_SKIP_SECONDS};

// Re-export the shared types so hosts depend on one crate
pub use stillpoint_common::{
    CrossfadeCalculator, CrossfadeOperation, CrossfadePhase, CrossfadeProgress, CrossfadeResult,
    EngineError, ErrorCategory, EventBus, FadeCurve, OverlayConfiguration, OverlayLoopMode,
    OverlayState, PlaybackFailure, PlayerConfiguration, PlayerEvent, PlayerState, RepeatMode,
    Result, Track, TrackLocator, TrackMetadata,
};
