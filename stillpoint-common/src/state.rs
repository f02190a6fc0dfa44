//! Playback and overlay state types
//!
//! Closed variant sets shared between the engine, the state store and the
//! event stream. Transition enforcement lives in the engine's state store;
//! these types only name the states.

use crate::error::ErrorCategory;
use serde::{Deserialize, Serialize};

/// Main-track playback state
///
/// Transitions are only permitted through the playback state store, which
/// enforces the transition table. Initial state is `Finished`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlayerState {
    /// Loading and priming the active node
    Preparing,
    /// Audio is flowing from the active node
    Playing,
    /// Both nodes halted; resumable
    Paused,
    /// Terminal fade-out in progress (finish/stop with fade)
    FadingOut,
    /// Nothing playing; the resting state
    Finished,
    /// Unrecoverable error; engine stopped
    Failed(PlaybackFailure),
}

impl PlayerState {
    /// Short lowercase label for logging
    pub fn label(&self) -> &'static str {
        match self {
            PlayerState::Preparing => "preparing",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::FadingOut => "fading-out",
            PlayerState::Finished => "finished",
            PlayerState::Failed(_) => "failed",
        }
    }

    /// True when both variants are the same state, ignoring failure payloads
    pub fn same_variant(&self, other: &PlayerState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Error payload carried by [`PlayerState::Failed`]
///
/// Carries the error kind's category and a human-readable reason so hosts
/// can render the failure without holding the full error value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackFailure {
    /// Coarse error category for logging and display grouping
    pub category: ErrorCategory,
    /// Human-readable reason
    pub reason: String,
}

impl std::fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.category, self.reason)
    }
}

/// Overlay layer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
    Idle,
    Preparing,
    Playing,
    Paused,
    /// Stop-with-fade in progress
    Stopping,
}

impl std::fmt::Display for OverlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OverlayState::Idle => "idle",
            OverlayState::Preparing => "preparing",
            OverlayState::Playing => "playing",
            OverlayState::Paused => "paused",
            OverlayState::Stopping => "stopping",
        };
        write!(f, "{}", label)
    }
}

/// Phase of a running crossfade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadePhase {
    /// No crossfade in flight
    Idle,
    /// Incoming node is being primed (lead-in frames scheduled, gain 0)
    Preparing,
    /// Gain ramps in progress; payload is normalized progress [0, 1]
    Fading(f64),
    /// Active/inactive labels being swapped
    Switching,
    /// Outgoing node stopped and cleared
    Cleanup,
}

/// Snapshot of crossfade progress, emitted on the progress stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossfadeProgress {
    pub phase: CrossfadePhase,
    /// Total crossfade duration in seconds
    pub duration: f64,
    /// Elapsed fade time in seconds
    pub elapsed: f64,
}

impl CrossfadeProgress {
    /// Normalized progress through the fading phase
    pub fn fraction(&self) -> f64 {
        match self.phase {
            CrossfadePhase::Idle | CrossfadePhase::Preparing => 0.0,
            CrossfadePhase::Fading(p) => p,
            CrossfadePhase::Switching | CrossfadePhase::Cleanup => 1.0,
        }
    }
}

/// Why a crossfade was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeOperation {
    /// Triggered by the near-end-of-track scheduler
    AutomaticLoop,
    /// Triggered by a user command (skip, replace)
    ManualChange,
}

/// Outcome of a crossfade driven to rest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeResult {
    /// Fade ran to completion; the incoming track is now active
    Completed,
    /// Fade was captured into a paused snapshot
    Paused,
    /// Fade was rolled back
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_variant_ignores_failure_payload() {
        let a = PlayerState::Failed(PlaybackFailure {
            category: ErrorCategory::System,
            reason: "one".into(),
        });
        let b = PlayerState::Failed(PlaybackFailure {
            category: ErrorCategory::File,
            reason: "two".into(),
        });
        assert!(a.same_variant(&b));
        assert!(!a.same_variant(&PlayerState::Playing));
    }

    #[test]
    fn test_progress_fraction() {
        let p = CrossfadeProgress {
            phase: CrossfadePhase::Fading(0.25),
            duration: 5.0,
            elapsed: 1.25,
        };
        assert_eq!(p.fraction(), 0.25);

        let done = CrossfadeProgress {
            phase: CrossfadePhase::Cleanup,
            duration: 5.0,
            elapsed: 5.0,
        };
        assert_eq!(done.fraction(), 1.0);
    }
}
