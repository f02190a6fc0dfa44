//! Crossfade orchestrator
//!
//! Policy layer over the engine's crossfade primitives: loading the incoming
//! track (with the adaptive timeout), driving the progress stream, the
//! pause-snapshot / resume strategy, rollback on cancel, and all crossfade
//! event emission. The orchestrator never lets two crossfades into the
//! engine at once.

use crate::engine::AudioEngine;
use crate::playback::operations::CancellationHandle;
use crate::playback::state_store::{PausedCrossfadeSnapshot, PlaybackStateStore};
use chrono::Utc;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use stillpoint_common::{
    CrossfadeOperation, CrossfadePhase, CrossfadeResult, EngineError, EventBus, FadeCurve,
    PlayerConfiguration, PlayerEvent, PlayerState, Result, Track,
};
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

/// Bounded fast-finish applied when resuming past the midpoint, seconds
pub const QUICK_FINISH_DURATION: f64 = 1.0;

/// Floor for the adaptive file-load timeout, seconds
const MIN_LOAD_TIMEOUT: f64 = 2.0;

/// Progress of the crossfade currently being driven (for pause capture)
#[derive(Debug, Clone, Copy)]
struct LiveProgress {
    elapsed: f64,
    total: f64,
    curve: FadeCurve,
}

pub struct CrossfadeOrchestrator {
    engine: Arc<AudioEngine>,
    store: Arc<PlaybackStateStore>,
    events: EventBus,
    config: Arc<RwLock<PlayerConfiguration>>,
    /// Set by the player just before a pause preempts a running crossfade,
    /// so the driver freezes for snapshot capture instead of treating the
    /// cancellation as a rollback request.
    pause_pending: AtomicBool,
    /// Last progress tick of the crossfade being driven
    live_progress: Mutex<Option<LiveProgress>>,
    /// Observed load durations for the adaptive timeout
    load_durations: Mutex<Vec<f64>>,
}

impl CrossfadeOrchestrator {
    pub fn new(
        engine: Arc<AudioEngine>,
        store: Arc<PlaybackStateStore>,
        events: EventBus,
        config: Arc<RwLock<PlayerConfiguration>>,
    ) -> Self {
        Self {
            engine,
            store,
            events,
            config,
            pause_pending: AtomicBool::new(false),
            live_progress: Mutex::new(None),
            load_durations: Mutex::new(Vec::new()),
        }
    }

    // --------------------------------------------------------------
    // Introspection
    // --------------------------------------------------------------

    pub fn has_active_crossfade(&self) -> bool {
        self.engine.has_active_crossfade()
    }

    pub async fn has_paused_crossfade(&self) -> bool {
        self.store.has_paused_crossfade().await
    }

    /// Arm the freeze-for-pause path before a pause preempts the driver
    pub fn set_pause_pending(&self) {
        self.pause_pending.store(true, Ordering::Release);
    }

    // --------------------------------------------------------------
    // Start
    // --------------------------------------------------------------

    /// Load `to` on the inactive node and drive a crossfade to it.
    ///
    /// `manual_change` preempts an in-flight crossfade (rollback first);
    /// `automatic_loop` never does. Rejected while a paused snapshot is
    /// waiting, and outside the `playing` state.
    pub async fn start_crossfade(
        &self,
        to: Track,
        duration: f64,
        curve: FadeCurve,
        operation: CrossfadeOperation,
        cancel: Option<CancellationHandle>,
    ) -> Result<CrossfadeResult> {
        if self.store.has_paused_crossfade().await {
            return Err(EngineError::InvalidState {
                reason: "a paused crossfade must be resumed or cancelled first".into(),
            });
        }
        let mode = self.store.mode().await;
        if mode != PlayerState::Playing {
            return Err(EngineError::InvalidState {
                reason: format!("crossfade requires playing state (was {mode})"),
            });
        }

        if self.engine.has_active_crossfade() {
            match operation {
                CrossfadeOperation::ManualChange => {
                    info!("Manual change preempts in-flight crossfade");
                    self.cancel_active_crossfade().await?;
                }
                CrossfadeOperation::AutomaticLoop => {
                    return Err(EngineError::InvalidState {
                        reason: "automatic crossfade while another is in flight".into(),
                    });
                }
            }
        }

        let from_title = self
            .store
            .current_track()
            .await
            .map(|t| t.title())
            .unwrap_or_default();

        // Load the incoming track (suspension point; adaptive timeout)
        let loaded = self.load_inactive(&to, cancel.as_ref()).await?;
        if let Some(handle) = cancel.as_ref() {
            handle.check("crossfade")?;
        }

        self.engine.prepare_inactive()?;
        self.store.load_on_inactive(loaded.clone()).await;

        info!(
            "Crossfade started ({:?}): '{}' -> '{}' over {:.1}s",
            operation,
            from_title,
            loaded.title(),
            duration
        );
        self.events.emit(PlayerEvent::CrossfadeStarted {
            from: from_title,
            to: loaded.title(),
            duration,
            timestamp: Utc::now(),
        });
        self.store.update_crossfading(true).await;

        let stream = self.engine.perform_synchronized_crossfade(duration, curve)?;
        let outcome = self
            .drive(stream, duration, curve, cancel.as_ref())
            .await?;
        self.finalize(outcome).await;
        Ok(outcome)
    }

    /// Decode onto the inactive node under the adaptive timeout
    async fn load_inactive(
        &self,
        track: &Track,
        cancel: Option<&CancellationHandle>,
    ) -> Result<Track> {
        if let Some(handle) = cancel {
            handle.check("file load")?;
        }
        self.events.emit(PlayerEvent::FileLoadStarted {
            track_id: track.id,
            timestamp: Utc::now(),
        });

        let limit = self.adaptive_load_timeout();
        let started = Instant::now();
        let result = timeout(limit, self.engine.load_on_inactive(track)).await;

        let metadata = match result {
            Err(_) => {
                warn!(
                    "File load exceeded {:.1}s timeout: {}",
                    limit.as_secs_f64(),
                    track.title()
                );
                self.events.emit(PlayerEvent::FileLoadTimeout {
                    track_id: track.id,
                    timestamp: Utc::now(),
                });
                return Err(EngineError::Timeout {
                    operation: format!("file load '{}'", track.title()),
                });
            }
            Ok(Err(e)) => {
                self.events.emit(PlayerEvent::FileLoadError {
                    track_id: track.id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
            Ok(Ok(metadata)) => metadata,
        };

        self.load_durations
            .lock()
            .unwrap()
            .push(started.elapsed().as_secs_f64());
        self.events.emit(PlayerEvent::FileLoadCompleted {
            track_id: track.id,
            duration: metadata.duration,
            timestamp: Utc::now(),
        });

        let mut loaded = track.clone();
        loaded.metadata = Some(metadata);
        Ok(loaded)
    }

    /// `max(2s, 2x observed median load time)`
    fn adaptive_load_timeout(&self) -> Duration {
        let mut observed = self.load_durations.lock().unwrap().clone();
        let timeout_secs = if observed.is_empty() {
            MIN_LOAD_TIMEOUT
        } else {
            observed.sort_by(|a, b| a.total_cmp(b));
            let median = observed[observed.len() / 2];
            MIN_LOAD_TIMEOUT.max(2.0 * median)
        };
        Duration::from_secs_f64(timeout_secs)
    }

    // --------------------------------------------------------------
    // Drive
    // --------------------------------------------------------------

    /// Consume the engine's progress stream to an outcome.
    ///
    /// Wall clock is bounded at 1.5x the fade duration; exceeding it emits
    /// `crossfade-timeout` and cancels. A fired cancellation handle freezes
    /// the fade: with a pause pending the snapshot capture follows, any
    /// other preemptor resolves the frozen fade through
    /// [`cancel_active_crossfade`](Self::cancel_active_crossfade).
    async fn drive(
        &self,
        mut stream: futures::stream::BoxStream<'static, stillpoint_common::CrossfadeProgress>,
        duration: f64,
        curve: FadeCurve,
        cancel: Option<&CancellationHandle>,
    ) -> Result<CrossfadeResult> {
        let deadline = Instant::now() + Duration::from_secs_f64(duration * 1.5);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let item = match timeout(remaining, stream.next()).await {
                Err(_) => {
                    warn!("Crossfade exceeded 1.5x wall-clock bound; cancelling");
                    self.events.emit(PlayerEvent::CrossfadeTimeout {
                        timestamp: Utc::now(),
                    });
                    drop(stream);
                    self.cancel_active_crossfade().await?;
                    return Err(EngineError::Timeout {
                        operation: "crossfade".into(),
                    });
                }
                Ok(item) => item,
            };

            let Some(progress) = item else {
                break;
            };

            if let CrossfadePhase::Fading(fraction) = progress.phase {
                *self.live_progress.lock().unwrap() = Some(LiveProgress {
                    elapsed: progress.elapsed,
                    total: duration,
                    curve,
                });
                let active = self.engine.active_node().gain();
                let inactive = self.engine.inactive_node().gain();
                self.store.update_mixer_volumes(active, inactive).await;
                self.events
                    .emit(PlayerEvent::CrossfadeProgress { progress: fraction });
            }

            if let Some(handle) = cancel {
                if handle.is_cancelled() {
                    // Freeze: stop polling, leave gains captured. The
                    // preempting operation decides what happens next.
                    drop(stream);
                    if self.pause_pending.load(Ordering::Acquire) {
                        debug!("Crossfade frozen for pause capture");
                        return Ok(CrossfadeResult::Paused);
                    }
                    debug!("Crossfade frozen by preemption");
                    return Ok(CrossfadeResult::Cancelled);
                }
            }
        }

        *self.live_progress.lock().unwrap() = None;
        if self.engine.has_active_crossfade() {
            // Stream ended on the engine's cancel flag without completing
            return Ok(CrossfadeResult::Cancelled);
        }
        Ok(CrossfadeResult::Completed)
    }

    /// Book the outcome of a driven crossfade into the store and event bus
    async fn finalize(&self, outcome: CrossfadeResult) {
        match outcome {
            CrossfadeResult::Completed => {
                self.store.switch_active_player().await;
                self.store.update_crossfading(false).await;
                self.store.update_mixer_volumes(1.0, 0.0).await;
                self.events.emit(PlayerEvent::CrossfadeCompleted {
                    timestamp: Utc::now(),
                });
                if let Some(track) = self.store.current_track().await {
                    if let Some(metadata) = track.metadata.clone() {
                        self.events.emit(PlayerEvent::TrackChanged {
                            track_id: track.id,
                            metadata,
                            timestamp: Utc::now(),
                        });
                    }
                }
                info!("Crossfade completed");
            }
            CrossfadeResult::Paused | CrossfadeResult::Cancelled => {
                // Resolution happens in pause_crossfade / cancel paths
            }
        }
    }

    // --------------------------------------------------------------
    // Pause / resume / cancel
    // --------------------------------------------------------------

    /// Capture the in-flight (or frozen) crossfade into a resumable
    /// snapshot, halting both nodes. Idempotent: `None` when no crossfade
    /// is active.
    ///
    /// The store must already be in `paused` (the snapshot invariant);
    /// callers transition the mode first.
    pub async fn pause_crossfade(&self) -> Result<Option<PausedCrossfadeSnapshot>> {
        self.pause_pending.store(false, Ordering::Release);

        let Some(state) = self.engine.suspend_crossfade() else {
            return Ok(None);
        };
        let live = self.live_progress.lock().unwrap().take();
        let (elapsed, total, curve) = match live {
            Some(p) => (p.elapsed, p.total, p.curve),
            None => (0.0, self.config.read().await.crossfade_duration, FadeCurve::default()),
        };

        let from_track = self.store.current_track().await.ok_or_else(|| {
            EngineError::InvalidState {
                reason: "crossfade snapshot without a current track".into(),
            }
        })?;
        let to_track = self.store.next_track().await.ok_or_else(|| {
            EngineError::InvalidState {
                reason: "crossfade snapshot without an incoming track".into(),
            }
        })?;

        let snapshot = PausedCrossfadeSnapshot {
            timestamp: Utc::now(),
            from_track,
            to_track,
            total_duration: total,
            elapsed,
            curve,
            active_gain: state.active_gain,
            inactive_gain: state.inactive_gain,
            active_frame: state.active_frame,
            inactive_frame: state.inactive_frame,
        };

        self.store.update_crossfading(false).await;
        self.store.set_paused_crossfade(snapshot.clone()).await?;
        info!(
            "Crossfade paused at {:.0}% (gains {:.2}/{:.2})",
            snapshot.progress() * 100.0,
            snapshot.active_gain,
            snapshot.inactive_gain
        );
        Ok(Some(snapshot))
    }

    /// Resume the stored paused crossfade.
    ///
    /// Below 50% progress the full remaining duration runs on the original
    /// curve from the captured gains. At or past 50% the fade quick-finishes
    /// over one second, which is perceptually indistinguishable from the
    /// completed crossfade and avoids a long, nearly-silent tail.
    ///
    /// Returns `false` when there is nothing to resume.
    pub async fn resume_crossfade(&self, cancel: Option<CancellationHandle>) -> Result<bool> {
        let Some(snapshot) = self.store.paused_crossfade().await else {
            return Ok(false);
        };

        let progress = snapshot.progress();
        let remaining = if progress < 0.5 {
            snapshot.remaining()
        } else {
            QUICK_FINISH_DURATION.min(snapshot.remaining().max(0.1))
        };
        info!(
            "Resuming crossfade at {:.0}% over {:.2}s{}",
            progress * 100.0,
            remaining,
            if progress >= 0.5 { " (quick finish)" } else { "" }
        );

        // Leaving paused clears the snapshot (it only exists while paused)
        self.store.update_mode(PlayerState::Playing).await?;
        self.store.update_crossfading(true).await;

        let stream = self.engine.resume_crossfade_from_state(
            remaining,
            snapshot.curve,
            (snapshot.active_gain, snapshot.inactive_gain),
        )?;
        let outcome = self
            .drive(stream, remaining, snapshot.curve, cancel.as_ref())
            .await?;
        self.finalize(outcome).await;
        Ok(outcome == CrossfadeResult::Completed)
    }

    /// Roll back the in-flight (or frozen) crossfade: the active node's gain
    /// restores smoothly, the incoming node stops, and any paused snapshot
    /// is dropped. The main flow is left playing on the node that was active
    /// when the cancel began.
    pub async fn cancel_active_crossfade(&self) -> Result<()> {
        let rollback = self.config.read().await.rollback_duration;

        if self.engine.has_active_crossfade() {
            self.engine.cancel_active_crossfade();
            let captured = self.engine.rollback_crossfade(rollback).await;
            debug!("Crossfade rolled back from gain {:.3}", captured);
            self.store.update_crossfading(false).await;
            self.store.update_mixer_volumes(1.0, 0.0).await;
            self.events.emit(PlayerEvent::CrossfadeCancelled {
                timestamp: Utc::now(),
            });
        }
        *self.live_progress.lock().unwrap() = None;
        self.store.clear_paused_crossfade().await;
        Ok(())
    }
}
