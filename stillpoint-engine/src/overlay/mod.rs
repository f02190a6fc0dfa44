//! Overlay player
//!
//! An independent playback layer for ambient beds and voice guidance. The
//! overlay owns its own node, gain and loop machinery; it never reads or
//! writes the main mixer gains. Loop behavior, fades and volume come from
//! the per-start [`OverlayConfiguration`].

use crate::audio::TrackDecoder;
use crate::engine::{ramp_gain, AudioEngine, PlayerNode};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use stillpoint_common::{
    EngineError, EventBus, OverlayConfiguration, OverlayState, PlayerEvent, Result, Track,
};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Poll period of the iteration wait loop
const POLL: Duration = Duration::from_millis(20);
/// Fade used when replacing mid-play and the configuration has no fade-out
const REPLACE_FADE: f64 = 0.25;

/// Is `from -> to` a legal overlay transition?
fn transition_allowed(from: OverlayState, to: OverlayState) -> bool {
    use OverlayState::*;
    matches!(
        (from, to),
        (Idle, Preparing)
            | (Preparing, Playing)
            | (Preparing, Idle)
            | (Playing, Paused)
            | (Playing, Stopping)
            | (Playing, Idle)
            | (Paused, Playing)
            | (Paused, Idle)
            | (Stopping, Idle)
    )
}

/// Independent overlay playback layer
pub struct OverlayPlayer {
    node: Arc<PlayerNode>,
    events: EventBus,
    state: Arc<Mutex<OverlayState>>,
    config: Mutex<Option<OverlayConfiguration>>,
    /// Bumped on stop/replace; a stale loop task sees the new generation
    /// and exits without touching the node.
    generation: Arc<AtomicU64>,
}

impl OverlayPlayer {
    pub fn new(engine: &AudioEngine, events: EventBus) -> Self {
        Self {
            node: engine.overlay_node(),
            events,
            state: Arc::new(Mutex::new(OverlayState::Idle)),
            config: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> OverlayState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new_state: OverlayState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let old_state = *state;
        if old_state == new_state {
            return Ok(());
        }
        if !transition_allowed(old_state, new_state) {
            return Err(EngineError::InvalidState {
                reason: format!("overlay transition {old_state} -> {new_state} not allowed"),
            });
        }
        *state = new_state;
        drop(state);

        debug!("Overlay state: {} -> {}", old_state, new_state);
        self.events.emit(PlayerEvent::OverlayStateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Load and start an overlay with the given policy
    pub async fn start(&self, track: &Track, config: OverlayConfiguration) -> Result<()> {
        let config = config.normalized();
        self.set_state(OverlayState::Preparing)?;

        let path = match track.locator.as_path() {
            Some(path) => path.to_path_buf(),
            None => {
                self.set_state(OverlayState::Idle)?;
                return Err(EngineError::FileLoad {
                    reason: "overlay requires a local file locator".into(),
                });
            }
        };

        let decode =
            tokio::task::spawn_blocking(move || TrackDecoder::decode_normalized(&path)).await;
        let (buffer, _metadata) = match decode {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => {
                self.set_state(OverlayState::Idle)?;
                return Err(e);
            }
            Err(e) => {
                self.set_state(OverlayState::Idle)?;
                return Err(EngineError::Unknown {
                    reason: format!("overlay decode task panicked: {e}"),
                });
            }
        };

        self.node.load(track.clone(), Arc::new(buffer));
        self.node.set_gain(0.0);
        *self.config.lock().unwrap() = Some(config.clone());

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.set_state(OverlayState::Playing)?;
        info!("Overlay started: '{}' ({:?})", track.title(), config.loop_mode);

        let node = Arc::clone(&self.node);
        let state = Arc::clone(&self.state);
        let generation_counter = Arc::clone(&self.generation);
        tokio::spawn(async move {
            run_loop(node, state, config, generation_counter, generation).await;
        });
        Ok(())
    }

    /// Pause the overlay, retaining position
    pub fn pause(&self) -> Result<()> {
        self.set_state(OverlayState::Paused)?;
        self.node.set_playing(false);
        Ok(())
    }

    /// Resume a paused overlay
    pub fn resume(&self) -> Result<()> {
        self.set_state(OverlayState::Playing)?;
        if self.node.has_buffer() {
            self.node.set_playing(true);
        }
        Ok(())
    }

    /// Stop the overlay. With `fade`, the configured fade-out runs first
    /// (`Playing -> Stopping -> Idle`); without it the overlay halts
    /// immediately (`Playing -> Idle`).
    pub async fn stop(&self, fade: bool) -> Result<()> {
        let current = self.state();
        if current == OverlayState::Idle {
            return Ok(());
        }
        // Kill the loop task before touching the node
        self.generation.fetch_add(1, Ordering::AcqRel);

        let fade_out = self
            .config
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| (c.fade_out, c.fade_curve))
            .unwrap_or((0.0, stillpoint_common::FadeCurve::EqualPower));

        if fade && current == OverlayState::Playing && fade_out.0 > 0.0 {
            self.set_state(OverlayState::Stopping)?;
            ramp_gain(&self.node, self.node.gain(), 0.0, fade_out.0, fade_out.1).await;
        }
        self.node.clear();
        *self.config.lock().unwrap() = None;
        self.set_state(OverlayState::Idle)?;
        info!("Overlay stopped");
        Ok(())
    }

    /// Replace the overlay content while it plays: fade the current sound
    /// out, load the new one, fade it in under the same configuration.
    pub async fn replace(&self, track: &Track) -> Result<()> {
        let Some(config) = self.config.lock().unwrap().clone() else {
            return Err(EngineError::InvalidState {
                reason: "no overlay to replace".into(),
            });
        };

        if self.state() == OverlayState::Playing {
            let fade = if config.fade_out > 0.0 {
                config.fade_out.min(REPLACE_FADE)
            } else {
                REPLACE_FADE
            };
            self.generation.fetch_add(1, Ordering::AcqRel);
            ramp_gain(&self.node, self.node.gain(), 0.0, fade, config.fade_curve).await;
            self.node.clear();
            self.set_state(OverlayState::Idle)?;
        }
        self.start(track, config).await
    }
}

/// One overlay run: iterations, loop-delay silence, first/last or per-loop
/// fades. Exits silently the moment its generation goes stale.
async fn run_loop(
    node: Arc<PlayerNode>,
    state: Arc<Mutex<OverlayState>>,
    config: OverlayConfiguration,
    generation: Arc<AtomicU64>,
    my_generation: u64,
) {
    let iterations = config.iterations();
    let mut iteration: u32 = 0;

    loop {
        if generation.load(Ordering::Acquire) != my_generation {
            return;
        }
        let is_first = iteration == 0;
        let is_last = iterations.map(|n| iteration + 1 >= n).unwrap_or(false);
        let fade_in_now = config.fade_in > 0.0 && (config.fade_on_each_loop || is_first);
        let fade_out_now = config.fade_out > 0.0 && (config.fade_on_each_loop || is_last);

        let completed = play_iteration(
            &node,
            &state,
            &config,
            &generation,
            my_generation,
            fade_in_now,
            fade_out_now,
        )
        .await;
        if !completed {
            return;
        }

        iteration += 1;
        if let Some(total) = iterations {
            if iteration >= total {
                break;
            }
        }

        // Silence between iterations
        if config.loop_delay > 0.0 {
            node.set_playing(false);
            let mut remaining = config.loop_delay;
            while remaining > 0.0 {
                if generation.load(Ordering::Acquire) != my_generation {
                    return;
                }
                let step = remaining.min(0.05);
                sleep(Duration::from_secs_f64(step)).await;
                remaining -= step;
            }
        }
    }

    // Natural completion: settle back to idle if nothing superseded us
    if generation.load(Ordering::Acquire) == my_generation {
        node.clear();
        let mut state = state.lock().unwrap();
        if *state != OverlayState::Idle {
            debug!("Overlay run complete");
            *state = OverlayState::Idle;
        }
    }
}

/// Play the buffer once from frame 0; true when it ran to the end
async fn play_iteration(
    node: &Arc<PlayerNode>,
    state: &Arc<Mutex<OverlayState>>,
    config: &OverlayConfiguration,
    generation: &Arc<AtomicU64>,
    my_generation: u64,
    fade_in_now: bool,
    fade_out_now: bool,
) -> bool {
    let Some(buffer) = node.buffer() else {
        warn!("overlay iteration without a buffer");
        return false;
    };
    let total = buffer.frames();

    node.set_position_frames(0);
    node.set_playing(true);
    if fade_in_now {
        ramp_gain(node, 0.0, config.volume, config.fade_in, config.fade_curve).await;
    } else {
        node.set_gain(config.volume);
    }

    let mut fading_out = false;
    loop {
        if generation.load(Ordering::Acquire) != my_generation {
            return false;
        }
        let position = node.position_frames();
        if position >= total {
            return true;
        }

        if *state.lock().unwrap() == OverlayState::Paused {
            sleep(POLL).await;
            continue;
        }
        if !node.is_playing() {
            // Resumed from pause
            node.set_playing(true);
        }

        if fade_out_now && !fading_out {
            let remaining =
                (total - position) as f64 / f64::from(crate::audio::STANDARD_SAMPLE_RATE);
            if remaining <= config.fade_out {
                fading_out = true;
                ramp_gain(node, node.gain(), 0.0, remaining, config.fade_curve).await;
                continue;
            }
        }
        sleep(POLL).await;
    }
}
