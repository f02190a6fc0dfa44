//! Playback state store
//!
//! The single authority on main-track state: playback mode, current/next
//! track, mirrored mixer gains, crossfade flags and the paused-crossfade
//! snapshot. Every mutation takes the one write lock, so no observer can
//! see a half-applied change, and mode changes are checked against the
//! transition table before they land.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stillpoint_common::{
    EngineError, EventBus, FadeCurve, PlayerEvent, PlayerState, Result, Track, TrackMetadata,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Resumable snapshot of a crossfade captured at pause time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PausedCrossfadeSnapshot {
    /// When the pause landed
    pub timestamp: DateTime<Utc>,
    /// Outgoing track
    pub from_track: Track,
    /// Incoming track
    pub to_track: Track,
    /// Full crossfade duration in seconds
    pub total_duration: f64,
    /// Fade time elapsed before the pause, seconds
    pub elapsed: f64,
    /// Curve the fade was running
    pub curve: FadeCurve,
    /// Captured node gains (active, inactive)
    pub active_gain: f32,
    pub inactive_gain: f32,
    /// Captured node read heads in frames
    pub active_frame: u64,
    pub inactive_frame: u64,
}

impl PausedCrossfadeSnapshot {
    /// Normalized progress at pause time
    pub fn progress(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 1.0;
        }
        (self.elapsed / self.total_duration).clamp(0.0, 1.0)
    }

    /// Seconds of fade that had not yet run
    pub fn remaining(&self) -> f64 {
        (self.total_duration - self.elapsed).max(0.0)
    }
}

/// Is `from -> to` in the main-track transition table?
fn transition_allowed(from: &PlayerState, to: &PlayerState) -> bool {
    use PlayerState::*;
    matches!(
        (from, to),
        (Finished, Preparing)
            | (Preparing, Playing)
            | (Preparing, Finished)
            | (Preparing, Failed(_))
            | (Playing, Preparing)
            | (Playing, Paused)
            | (Playing, FadingOut)
            | (Playing, Finished)
            | (Playing, Failed(_))
            | (Paused, Playing)
            | (Paused, Finished)
            | (Paused, Failed(_))
            | (FadingOut, Finished)
            | (FadingOut, Failed(_))
            | (Failed(_), Preparing)
    )
}

#[derive(Debug)]
struct StoreInner {
    mode: PlayerState,
    current_track: Option<Track>,
    active_metadata: Option<TrackMetadata>,
    next_track: Option<Track>,
    active_gain: f32,
    inactive_gain: f32,
    crossfading: bool,
    paused_crossfade: Option<PausedCrossfadeSnapshot>,
}

/// Serialized, single-authority store for main-track state
pub struct PlaybackStateStore {
    inner: RwLock<StoreInner>,
    events: EventBus,
}

impl PlaybackStateStore {
    /// New store in the initial `Finished` state
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                mode: PlayerState::Finished,
                current_track: None,
                active_metadata: None,
                next_track: None,
                active_gain: 0.0,
                inactive_gain: 0.0,
                crossfading: false,
                paused_crossfade: None,
            }),
            events,
        }
    }

    // --------------------------------------------------------------
    // Queries
    // --------------------------------------------------------------

    pub async fn mode(&self) -> PlayerState {
        self.inner.read().await.mode.clone()
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.inner.read().await.current_track.clone()
    }

    pub async fn next_track(&self) -> Option<Track> {
        self.inner.read().await.next_track.clone()
    }

    pub async fn active_metadata(&self) -> Option<TrackMetadata> {
        self.inner.read().await.active_metadata.clone()
    }

    pub async fn is_crossfading(&self) -> bool {
        self.inner.read().await.crossfading
    }

    pub async fn has_paused_crossfade(&self) -> bool {
        self.inner.read().await.paused_crossfade.is_some()
    }

    pub async fn paused_crossfade(&self) -> Option<PausedCrossfadeSnapshot> {
        self.inner.read().await.paused_crossfade.clone()
    }

    /// Mirrored mixer gains (active, inactive)
    pub async fn mixer_volumes(&self) -> (f32, f32) {
        let inner = self.inner.read().await;
        (inner.active_gain, inner.inactive_gain)
    }

    /// Cross-field invariant check, used by tests and diagnostics
    pub async fn is_state_consistent(&self) -> bool {
        let inner = self.inner.read().await;

        // Snapshot only exists in paused state
        if inner.paused_crossfade.is_some() && inner.mode != PlayerState::Paused {
            return false;
        }
        // A crossfade needs a main flow to crossfade
        if inner.crossfading
            && !matches!(inner.mode, PlayerState::Playing | PlayerState::Paused)
        {
            return false;
        }
        // Gains live in [0, 1]
        if !(0.0..=1.0).contains(&inner.active_gain)
            || !(0.0..=1.0).contains(&inner.inactive_gain)
        {
            return false;
        }
        // A current track implies metadata once playing
        if inner.mode == PlayerState::Playing && inner.current_track.is_none() {
            return false;
        }
        true
    }

    // --------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------

    /// Transition the playback mode, enforcing the transition table.
    ///
    /// Emits `StateChanged` on success. A transition to the current variant
    /// is a no-op (idempotent commands don't bounce off the table).
    pub async fn update_mode(&self, new_mode: PlayerState) -> Result<PlayerState> {
        let mut inner = self.inner.write().await;
        let old_mode = inner.mode.clone();

        if old_mode.same_variant(&new_mode) {
            inner.mode = new_mode;
            return Ok(old_mode);
        }
        if !transition_allowed(&old_mode, &new_mode) {
            return Err(EngineError::InvalidTransition {
                from: old_mode,
                to: new_mode,
            });
        }

        info!("Playback state: {} -> {}", old_mode, new_mode);
        inner.mode = new_mode.clone();

        // Leaving paused consumes nothing; entering any state other than
        // paused invalidates a stale snapshot.
        if new_mode != PlayerState::Paused {
            inner.paused_crossfade = None;
        }

        drop(inner);
        self.events.emit(PlayerEvent::StateChanged {
            old_state: old_mode.clone(),
            new_state: new_mode,
            timestamp: Utc::now(),
        });
        Ok(old_mode)
    }

    /// Record the track loaded on the inactive node
    pub async fn load_on_inactive(&self, track: Track) {
        self.inner.write().await.next_track = Some(track);
    }

    /// Mirror the engine's node gains
    pub async fn update_mixer_volumes(&self, active: f32, inactive: f32) {
        let mut inner = self.inner.write().await;
        inner.active_gain = active.clamp(0.0, 1.0);
        inner.inactive_gain = inactive.clamp(0.0, 1.0);
    }

    /// Flip the crossfading flag
    pub async fn update_crossfading(&self, crossfading: bool) {
        self.inner.write().await.crossfading = crossfading;
    }

    /// Swap active/inactive bookkeeping after the engine's label flip:
    /// the next track becomes current and the mirrored gains swap.
    pub async fn switch_active_player(&self) {
        let mut inner = self.inner.write().await;
        if let Some(next) = inner.next_track.take() {
            inner.active_metadata = next.metadata.clone();
            inner.current_track = Some(next);
        }
        let inner = &mut *inner;
        std::mem::swap(&mut inner.active_gain, &mut inner.inactive_gain);
        debug!("State store switched active player");
    }

    /// Compound mutation for pause-then-skip: install `new_track` as
    /// current (with its metadata), optionally set the mode, clear
    /// crossfade bookkeeping. One write lock; no observer sees a partial
    /// switch.
    pub async fn atomic_switch(
        &self,
        new_track: Track,
        mode: Option<PlayerState>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;

        if let Some(ref new_mode) = mode {
            let old_mode = inner.mode.clone();
            if !old_mode.same_variant(new_mode) && !transition_allowed(&old_mode, new_mode) {
                return Err(EngineError::InvalidTransition {
                    from: old_mode,
                    to: new_mode.clone(),
                });
            }
        }

        inner.active_metadata = new_track.metadata.clone();
        inner.current_track = Some(new_track);
        inner.next_track = None;
        inner.crossfading = false;
        inner.paused_crossfade = None;
        if let Some(new_mode) = mode {
            let old_mode = std::mem::replace(&mut inner.mode, new_mode.clone());
            drop(inner);
            if !old_mode.same_variant(&new_mode) {
                self.events.emit(PlayerEvent::StateChanged {
                    old_state: old_mode,
                    new_state: new_mode,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(())
    }

    /// Install a paused-crossfade snapshot (only legal in `Paused`)
    pub async fn set_paused_crossfade(&self, snapshot: PausedCrossfadeSnapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.mode != PlayerState::Paused {
            return Err(EngineError::InvalidState {
                reason: format!(
                    "paused-crossfade snapshot requires paused state (was {})",
                    inner.mode
                ),
            });
        }
        inner.paused_crossfade = Some(snapshot);
        Ok(())
    }

    /// Drop the snapshot (resume completion or cancel)
    pub async fn clear_paused_crossfade(&self) {
        self.inner.write().await.paused_crossfade = None;
    }

    /// Record the track now on the active node (initial load path)
    pub async fn set_current_track(&self, track: Option<Track>) {
        let mut inner = self.inner.write().await;
        inner.active_metadata = track.as_ref().and_then(|t| t.metadata.clone());
        inner.current_track = track;
    }
}
