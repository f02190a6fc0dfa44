//! Near-end-of-track scheduler
//!
//! Samples the active node's position at 10 Hz. When remaining time drops
//! to the configured crossfade duration it fires the automatic-loop trigger
//! exactly once per track; the trigger re-arms when the active track
//! changes. The same sampling loop throttles 1 Hz position events onto the
//! event bus.

use crate::engine::AudioEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stillpoint_common::{EventBus, PlayerConfiguration, PlayerEvent};
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

/// Position sampling period (10 Hz)
const SAMPLE_PERIOD: Duration = Duration::from_millis(100);
/// Position events are emitted every Nth sample (~1 Hz)
const POSITION_EMIT_EVERY: u32 = 10;

/// Background task watching for the automatic-loop trigger point
pub struct NearEndScheduler {
    running: Arc<AtomicBool>,
}

impl NearEndScheduler {
    /// Spawn the sampling task.
    ///
    /// `on_trigger` is invoked (synchronously, once per track) when the
    /// active track's remaining time crosses the configured crossfade
    /// duration; the player uses it to enqueue the automatic-loop
    /// operation. `on_ended` fires once when the active track runs out
    /// without a transition having taken over (end of playlist).
    pub fn start(
        engine: Arc<AudioEngine>,
        events: EventBus,
        config: Arc<RwLock<PlayerConfiguration>>,
        on_trigger: Arc<dyn Fn() + Send + Sync>,
        on_ended: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let task_running = Arc::clone(&running);

        tokio::spawn(async move {
            debug!("Near-end scheduler started");
            let mut ticker = interval(SAMPLE_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut armed_for: Option<Uuid> = None;
            let mut armed = false;
            let mut ended_armed = false;
            let mut tick: u32 = 0;

            while task_running.load(Ordering::Acquire) {
                ticker.tick().await;
                tick = tick.wrapping_add(1);

                let node = engine.active_node();
                let Some(track) = node.track() else {
                    continue;
                };
                let Some((position, duration)) = node.position_seconds() else {
                    continue;
                };

                // Re-arm when a different track becomes active
                if armed_for != Some(track.id) {
                    armed_for = Some(track.id);
                    armed = true;
                    ended_armed = true;
                }

                // The node halts itself at the buffer end; no crossfade
                // having taken over means the playlist is done.
                if !node.is_playing() {
                    if ended_armed
                        && position >= duration - 0.05
                        && !engine.has_active_crossfade()
                    {
                        info!("'{}' ran out; playlist exhausted", track.title());
                        ended_armed = false;
                        on_ended();
                    }
                    continue;
                }

                if tick % POSITION_EMIT_EVERY == 0 {
                    events.emit(PlayerEvent::PositionChanged { position, duration });
                }

                let crossfade_duration = config.read().await.crossfade_duration;
                let remaining = duration - position;
                if armed && remaining <= crossfade_duration && !engine.has_active_crossfade() {
                    info!(
                        "Near end of '{}': {:.2}s remaining (crossfade {:.1}s)",
                        track.title(),
                        remaining,
                        crossfade_duration
                    );
                    armed = false;
                    on_trigger();
                }
            }
            debug!("Near-end scheduler stopped");
        });

        Self { running }
    }

    /// Stop the sampling task
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for NearEndScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
