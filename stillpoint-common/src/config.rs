//! Playback configuration
//!
//! Global playback policy and per-overlay policy. Constructors clamp all
//! numeric fields to their documented ranges; `validate()` is the stricter
//! check applied when a host replaces the configuration at runtime.

use crate::error::{EngineError, Result};
use crate::fade_curves::FadeCurve;
use serde::{Deserialize, Serialize};

/// Minimum crossfade duration in seconds
pub const MIN_CROSSFADE_DURATION: f64 = 1.0;
/// Maximum crossfade duration in seconds
pub const MAX_CROSSFADE_DURATION: f64 = 30.0;
/// Maximum accepted fade-in/fade-out duration in seconds
pub const MAX_FADE_DURATION: f64 = 10.0;

/// Repeat behavior for the main track flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// Stop at the end of the playlist
    #[default]
    Off,
    /// Loop the current track
    Single,
    /// Loop the whole playlist
    Playlist,
}

/// Global playback policy
///
/// Created at init; replaceable atomically via `update_configuration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfiguration {
    /// Crossfade duration in seconds, clamped to [1.0, 30.0]
    pub crossfade_duration: f64,
    /// Curve used for crossfades and gain ramps
    pub fade_curve: FadeCurve,
    /// Repeat behavior
    pub repeat_mode: RepeatMode,
    /// Repeat count for `RepeatMode::Playlist`; `None` = infinite
    pub repeat_count: Option<u32>,
    /// Master volume, clamped to [0.0, 1.0]
    pub master_volume: f32,
    /// Fade-in applied when resuming from a plain pause, seconds
    pub resume_fade_in: f64,
    /// Default fade-out for `stop`/`finish`, seconds
    pub stop_fade_out: f64,
    /// Gain-restore duration after a cancelled crossfade, seconds
    pub rollback_duration: f64,
}

impl Default for PlayerConfiguration {
    fn default() -> Self {
        Self {
            crossfade_duration: 5.0,
            fade_curve: FadeCurve::EqualPower,
            repeat_mode: RepeatMode::Off,
            repeat_count: None,
            master_volume: 1.0,
            resume_fade_in: 0.25,
            stop_fade_out: 2.0,
            rollback_duration: 0.3,
        }
    }
}

impl PlayerConfiguration {
    /// Build a configuration, clamping every numeric field into range
    pub fn new(crossfade_duration: f64, fade_curve: FadeCurve, master_volume: f32) -> Self {
        Self {
            crossfade_duration,
            fade_curve,
            master_volume,
            ..Self::default()
        }
        .normalized()
    }

    /// Copy with all numeric fields clamped to their documented ranges
    pub fn normalized(mut self) -> Self {
        self.crossfade_duration = self
            .crossfade_duration
            .clamp(MIN_CROSSFADE_DURATION, MAX_CROSSFADE_DURATION);
        self.master_volume = self.master_volume.clamp(0.0, 1.0);
        self.resume_fade_in = self.resume_fade_in.max(0.0);
        self.stop_fade_out = self.stop_fade_out.max(0.0);
        self.rollback_duration = self.rollback_duration.max(0.0);
        self
    }

    /// Strict validation used by `update_configuration`
    ///
    /// Unlike the clamping constructor, out-of-range fade durations are
    /// rejected here so a host replacing the configuration learns about the
    /// bad value instead of silently playing something else.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CROSSFADE_DURATION..=MAX_CROSSFADE_DURATION).contains(&self.crossfade_duration) {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "crossfade_duration {} outside [{}, {}]",
                    self.crossfade_duration, MIN_CROSSFADE_DURATION, MAX_CROSSFADE_DURATION
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.master_volume) {
            return Err(EngineError::InvalidConfiguration {
                reason: format!("master_volume {} outside [0.0, 1.0]", self.master_volume),
            });
        }
        for (name, value) in [
            ("resume_fade_in", self.resume_fade_in),
            ("stop_fade_out", self.stop_fade_out),
            ("rollback_duration", self.rollback_duration),
        ] {
            if !(0.0..=MAX_FADE_DURATION).contains(&value) {
                return Err(EngineError::InvalidConfiguration {
                    reason: format!("{name} {value} outside [0.0, {MAX_FADE_DURATION}]"),
                });
            }
        }
        if self.repeat_count == Some(0) {
            return Err(EngineError::InvalidConfiguration {
                reason: "repeat_count must be positive (None = infinite)".into(),
            });
        }
        Ok(())
    }
}

/// Loop behavior for one overlay run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverlayLoopMode {
    /// Play once, stop
    Once,
    /// Play `count` iterations (count > 0)
    Count { count: u32 },
    /// Loop until stopped
    Infinite,
}

/// Overlay policy
///
/// Created per overlay start; immutable for the duration of that overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfiguration {
    /// Loop behavior
    pub loop_mode: OverlayLoopMode,
    /// Silence between loop iterations, seconds (>= 0)
    pub loop_delay: f64,
    /// Overlay gain ceiling, clamped to [0.0, 1.0]
    pub volume: f32,
    /// Fade-in duration, seconds (>= 0)
    pub fade_in: f64,
    /// Fade-out duration, seconds (>= 0)
    pub fade_out: f64,
    /// Curve for overlay fades
    pub fade_curve: FadeCurve,
    /// When true, every loop iteration fades in and out; otherwise only the
    /// first fade-in and the last fade-out occur.
    pub fade_on_each_loop: bool,
}

impl Default for OverlayConfiguration {
    fn default() -> Self {
        Self {
            loop_mode: OverlayLoopMode::Once,
            loop_delay: 0.0,
            volume: 1.0,
            fade_in: 0.0,
            fade_out: 0.0,
            fade_curve: FadeCurve::EqualPower,
            fade_on_each_loop: false,
        }
    }
}

impl OverlayConfiguration {
    /// Copy with all numeric fields clamped to their documented ranges
    ///
    /// A `Count { count: 0 }` loop mode collapses to `Once`.
    pub fn normalized(mut self) -> Self {
        self.loop_delay = self.loop_delay.max(0.0);
        self.volume = self.volume.clamp(0.0, 1.0);
        self.fade_in = self.fade_in.max(0.0);
        self.fade_out = self.fade_out.max(0.0);
        if self.loop_mode == (OverlayLoopMode::Count { count: 0 }) {
            self.loop_mode = OverlayLoopMode::Once;
        }
        self
    }

    /// Number of iterations, `None` for infinite
    pub fn iterations(&self) -> Option<u32> {
        match self.loop_mode {
            OverlayLoopMode::Once => Some(1),
            OverlayLoopMode::Count { count } => Some(count.max(1)),
            OverlayLoopMode::Infinite => None,
        }
    }
}
