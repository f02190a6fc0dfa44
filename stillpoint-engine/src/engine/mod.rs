//! Audio engine
//!
//! Hardware-level control of the two main playback nodes, the overlay node,
//! the effects bus and the master gain. The engine executes scheduling
//! primitives; policy (when to crossfade, what to do on pause) lives in the
//! orchestrator and the player facade above it.
//!
//! **Render model:** a mixer task renders blocks from the nodes into a
//! lock-free ring buffer; the output sink's realtime callback only pops
//! frames. Tests and headless hosts call [`AudioEngine::render_block`]
//! directly or use a [`NullSink`].

mod node;
mod sink;

pub use node::PlayerNode;
pub use sink::{DeviceSink, NullSink, OutputSink};

use crate::audio::ring_buffer::AudioRingBuffer;
use crate::audio::types::{
    AudioFrame, STANDARD_SAMPLE_RATE, CROSSFADE_LEAD_IN_FRAMES,
};
use crate::audio::TrackDecoder;
use crate::effects::EffectsBus;
use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stillpoint_common::{
    CrossfadeCalculator, CrossfadePhase, CrossfadeProgress, EngineError, FadeCurve, Result, Track,
    TrackMetadata,
};
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fixed tick of the crossfade gain updater
pub const STEP_TIME: Duration = Duration::from_millis(10);
/// Step time in seconds
pub const STEP_TIME_SECS: f64 = 0.010;
/// Pre/post fade segment of a click-free seek
pub const SEEK_FADE: Duration = Duration::from_millis(100);

/// Frames rendered per mixer batch (~11.6 ms at 44.1 kHz)
const RENDER_BATCH_FRAMES: usize = 512;
/// Mixer task wake interval
const MIXER_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Captured gains and read heads of an in-flight crossfade, for resume
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CrossfadeState {
    pub active_gain: f32,
    pub inactive_gain: f32,
    pub active_frame: u64,
    pub inactive_frame: u64,
}

/// The audio engine: two main nodes, one overlay node, one effects bus,
/// one master gain.
pub struct AudioEngine {
    /// Self-handle for tasks and streams the engine spawns
    this: std::sync::Weak<AudioEngine>,
    /// Main playback nodes; exactly one is labelled active at any instant
    nodes: [Arc<PlayerNode>; 2],
    /// Index of the active node (0 or 1); the label flip is this atomic swap
    active: AtomicUsize,
    /// Independent overlay node
    overlay: Arc<PlayerNode>,
    /// Dedicated effects bus
    effects: Arc<EffectsBus>,
    /// Master gain; independent of crossfade gains
    master_volume: Mutex<f32>,
    /// True while the host expects audio to flow (underrun classification)
    audio_expected: Arc<AtomicBool>,
    /// Mixer task liveness
    running: Arc<AtomicBool>,
    prepared: AtomicBool,
    started: AtomicBool,
    /// A crossfade ticker currently owns the node gains
    crossfade_active: Arc<AtomicBool>,
    /// Cooperative cancel for the crossfade ticker
    crossfade_cancel: Arc<AtomicBool>,
    sink: Mutex<Box<dyn OutputSink>>,
}

impl AudioEngine {
    /// Engine with the default hardware sink
    pub fn new() -> Arc<Self> {
        Self::with_sink(Box::new(DeviceSink::new(None)))
    }

    /// Engine with a custom output sink (headless hosts, tests)
    pub fn with_sink(sink: Box<dyn OutputSink>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            nodes: [
                Arc::new(PlayerNode::new("A")),
                Arc::new(PlayerNode::new("B")),
            ],
            active: AtomicUsize::new(0),
            overlay: Arc::new(PlayerNode::new("overlay")),
            effects: Arc::new(EffectsBus::new()),
            master_volume: Mutex::new(1.0),
            audio_expected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            prepared: AtomicBool::new(false),
            started: AtomicBool::new(false),
            crossfade_active: Arc::new(AtomicBool::new(false)),
            crossfade_cancel: Arc::new(AtomicBool::new(false)),
            sink: Mutex::new(sink),
        })
    }

    /// Strong self-handle; valid for the engine's whole life (the weak is
    /// only dead during teardown of the last Arc)
    fn arc(&self) -> Arc<Self> {
        self.this.upgrade().expect("engine self-handle")
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Prime the engine. Idempotent; node and bus state is allocated at
    /// construction, so this only transitions the lifecycle flag and gives
    /// hosts a hook that matches `start`/`stop`.
    pub fn prepare(&self) -> Result<()> {
        if !self.prepared.swap(true, Ordering::AcqRel) {
            info!("Audio engine prepared");
        }
        Ok(())
    }

    /// Start the mixer task and the output sink. Idempotent.
    ///
    /// Surfaces `engine-start-failed` when the sink (hardware) refuses.
    pub fn start(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        self.prepare()?;

        let ring = AudioRingBuffer::new(None, Arc::clone(&self.audio_expected));
        let (producer, mut consumer) = ring.split();

        self.running.store(true, Ordering::Release);

        let engine = self.arc();
        tokio::spawn(async move {
            engine.mixer_loop(producer).await;
        });

        let result = self
            .sink
            .lock()
            .unwrap()
            .start(Box::new(move || consumer.pop_or_silence()));
        if let Err(e) = result {
            self.running.store(false, Ordering::Release);
            return Err(e);
        }

        self.started.store(true, Ordering::Release);
        info!("Audio engine started");
        Ok(())
    }

    /// Stop the sink and the mixer task. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.running.store(false, Ordering::Release);
        self.sink.lock().unwrap().stop()?;
        info!("Audio engine stopped");
        Ok(())
    }

    /// Mixer task: keep the ring buffer inside its fill band
    async fn mixer_loop(self: Arc<Self>, mut producer: crate::audio::ring_buffer::AudioProducer) {
        debug!("Mixer task started");
        let mut ticker = interval(MIXER_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut block = vec![AudioFrame::zero(); RENDER_BATCH_FRAMES];

        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            while producer.needs_frames() {
                self.render_block(&mut block);
                for frame in &block {
                    if !producer.push(*frame) {
                        break;
                    }
                }
            }
        }
        debug!("Mixer task stopped");
    }

    /// Render one block: main nodes + overlay + effects, master gain, clamp
    ///
    /// This is the mixer core; the mixer task calls it continuously and
    /// tests drive it directly.
    pub fn render_block(&self, out: &mut [AudioFrame]) {
        for frame in out.iter_mut() {
            *frame = AudioFrame::zero();
        }
        self.nodes[0].render_add(out);
        self.nodes[1].render_add(out);
        self.overlay.render_add(out);
        self.effects.render_add(out);

        let master = *self.master_volume.lock().unwrap();
        for frame in out.iter_mut() {
            frame.apply_gain(master);
            frame.clamp();
        }
    }

    // ------------------------------------------------------------------
    // Node accessors
    // ------------------------------------------------------------------

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// The node currently producing the primary audio
    pub fn active_node(&self) -> Arc<PlayerNode> {
        Arc::clone(&self.nodes[self.active_index()])
    }

    /// The standby node
    pub fn inactive_node(&self) -> Arc<PlayerNode> {
        Arc::clone(&self.nodes[1 - self.active_index()])
    }

    /// Overlay node (managed by the overlay player, never by the main flow)
    pub fn overlay_node(&self) -> Arc<PlayerNode> {
        Arc::clone(&self.overlay)
    }

    /// Dedicated effects bus
    pub fn effects_bus(&self) -> Arc<EffectsBus> {
        Arc::clone(&self.effects)
    }

    /// Signal whether audio is expected to flow (underrun classification)
    pub fn set_audio_expected(&self, expected: bool) {
        self.audio_expected.store(expected, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Loading & scheduling
    // ------------------------------------------------------------------

    /// Decode a track onto the active node; returns its metadata
    pub async fn load_on_active(&self, track: &Track) -> Result<TrackMetadata> {
        self.load_on(self.active_index(), track).await
    }

    /// Decode a track onto the inactive node; returns its metadata
    pub async fn load_on_inactive(&self, track: &Track) -> Result<TrackMetadata> {
        self.load_on(1 - self.active_index(), track).await
    }

    async fn load_on(&self, index: usize, track: &Track) -> Result<TrackMetadata> {
        let path = track
            .locator
            .as_path()
            .ok_or_else(|| EngineError::FileLoad {
                reason: format!("remote locator requires a host decoder: {:?}", track.locator),
            })?
            .to_path_buf();

        let (buffer, metadata) =
            tokio::task::spawn_blocking(move || TrackDecoder::decode_normalized(&path))
                .await
                .map_err(|e| EngineError::Unknown {
                    reason: format!("decode task panicked: {e}"),
                })??;

        let mut loaded = track.clone();
        loaded.metadata = Some(metadata.clone());

        let node = &self.nodes[index];
        node.load(loaded, Arc::new(buffer));
        debug!(
            "Loaded '{}' on node {} ({:.2}s)",
            track.title(),
            node.name(),
            metadata.duration
        );
        Ok(metadata)
    }

    /// Schedule the active node from its current read head, optionally
    /// ramping its gain from 0 to 1 over `fade_in_duration`.
    pub async fn schedule_active(
        &self,
        fade_in: bool,
        fade_in_duration: f64,
        curve: FadeCurve,
    ) -> Result<()> {
        let node = self.active_node();
        if !node.has_buffer() {
            return Err(EngineError::InvalidState {
                reason: "no track loaded on active node".into(),
            });
        }
        if fade_in && fade_in_duration > 0.0 {
            node.set_gain(0.0);
            node.set_playing(true);
            ramp_gain(&node, 0.0, 1.0, fade_in_duration, curve).await;
        } else {
            node.set_gain(1.0);
            node.set_playing(true);
        }
        Ok(())
    }

    /// Prime the inactive node at frame 0 without starting it
    pub fn prepare_inactive(&self) -> Result<()> {
        let node = self.inactive_node();
        if !node.has_buffer() {
            return Err(EngineError::InvalidState {
                reason: "no track loaded on inactive node".into(),
            });
        }
        node.set_playing(false);
        node.set_position_frames(0);
        node.set_gain(0.0);
        Ok(())
    }

    /// Active node's playback head: `(current, total)` in seconds
    pub fn get_position(&self) -> Option<(f64, f64)> {
        self.active_node().position_seconds()
    }

    /// Click-free seek: pre-fade the active gain down, move the read head,
    /// ramp back up.
    pub async fn seek(&self, time: f64) -> Result<()> {
        let node = self.active_node();
        let Some(buffer) = node.buffer() else {
            return Err(EngineError::InvalidState {
                reason: "seek requires a loaded track".into(),
            });
        };

        // Saturate inside [0, duration - 0.1s]
        let margin = u64::from(STANDARD_SAMPLE_RATE) / 10;
        let target = buffer
            .frame_for_seconds(time)
            .min(buffer.frames().saturating_sub(margin));

        let prior_gain = node.gain();
        let segment = SEEK_FADE.as_secs_f64();
        ramp_gain(&node, prior_gain, 0.0, segment, FadeCurve::SCurve).await;
        node.set_position_frames(target);
        ramp_gain(&node, 0.0, prior_gain, segment, FadeCurve::SCurve).await;

        debug!("Seeked to {:.2}s (frame {})", time, target);
        Ok(())
    }

    /// Master gain; independent of the per-node crossfade gains
    pub fn set_master_volume(&self, volume: f32) {
        *self.master_volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    pub fn get_master_volume(&self) -> f32 {
        *self.master_volume.lock().unwrap()
    }

    /// Schedule a gain ramp on the active node
    pub async fn fade_active_mixer(
        &self,
        from: f32,
        to: f32,
        duration: f64,
        curve: FadeCurve,
    ) -> Result<()> {
        let node = self.active_node();
        node.set_gain(from);
        ramp_gain(&node, from, to, duration, curve).await;
        Ok(())
    }

    /// Atomic swap of the active/inactive labels
    pub fn switch_active(&self) {
        let old = self.active_index();
        self.active.store(1 - old, Ordering::Release);
        debug!(
            "Switched active node: {} -> {}",
            self.nodes[old].name(),
            self.nodes[1 - old].name()
        );
    }

    /// Swap labels and bring the new active node to full gain (used for
    /// non-crossfade skips).
    pub fn switch_active_with_volume(&self) {
        self.switch_active();
        self.active_node().set_gain(1.0);
    }

    // ------------------------------------------------------------------
    // Crossfade
    // ------------------------------------------------------------------

    /// Drive a sample-accurate synchronized crossfade of `duration` seconds.
    ///
    /// The inactive node starts at frame 0 with gain 0 and plays a short
    /// lead-in before the first nonzero gain, so audio is already flowing at
    /// the first audible tick. Gains update every [`STEP_TIME`]; a late tick
    /// is caught up from actual elapsed time, so total duration stays within
    /// one step time of `duration`.
    ///
    /// The returned stream emits `Preparing`, `Fading(p)` per tick, then
    /// `Switching` and `Cleanup` after the atomic label swap. Cancellation
    /// (via [`cancel_active_crossfade`](Self::cancel_active_crossfade)) ends
    /// the stream without switching; rollback is the caller's move.
    pub fn perform_synchronized_crossfade(
        &self,
        duration: f64,
        curve: FadeCurve,
    ) -> Result<BoxStream<'static, CrossfadeProgress>> {
        self.begin_crossfade()?;
        Ok(self
            .arc()
            .run_crossfade(duration, curve, (1.0, 0.0), true)
            .boxed())
    }

    /// Resume a crossfade from captured gains over `remaining` seconds.
    ///
    /// Gains follow the curve's shape from the captured values:
    /// `gain_in(p) = i0 + (1 - i0) * g(p)` and `gain_out(p) = a0 * g(1 - p)`,
    /// monotone from `(a0, i0)` to `(0, 1)` without re-traversing the
    /// already-faded portion.
    pub fn resume_crossfade_from_state(
        &self,
        remaining: f64,
        curve: FadeCurve,
        start_gains: (f32, f32),
    ) -> Result<BoxStream<'static, CrossfadeProgress>> {
        self.begin_crossfade()?;
        Ok(self
            .arc()
            .run_crossfade(remaining, curve, start_gains, false)
            .boxed())
    }

    fn begin_crossfade(&self) -> Result<()> {
        if self.crossfade_active.swap(true, Ordering::AcqRel) {
            return Err(EngineError::InvalidState {
                reason: "a crossfade is already in flight".into(),
            });
        }
        if !self.inactive_node().has_buffer() {
            self.crossfade_active.store(false, Ordering::Release);
            return Err(EngineError::InvalidState {
                reason: "no track loaded on inactive node".into(),
            });
        }
        self.crossfade_cancel.store(false, Ordering::Release);
        Ok(())
    }

    fn run_crossfade(
        self: Arc<Self>,
        duration: f64,
        curve: FadeCurve,
        start_gains: (f32, f32),
        lead_in: bool,
    ) -> impl futures::Stream<Item = CrossfadeProgress> + Send {
        stream! {
            let (a0, i0) = (f64::from(start_gains.0), f64::from(start_gains.1));
            let active = self.active_node();
            let inactive = self.inactive_node();

            yield CrossfadeProgress {
                phase: CrossfadePhase::Preparing,
                duration,
                elapsed: 0.0,
            };

            inactive.set_gain(start_gains.1);
            inactive.set_playing(true);
            active.set_playing(true);

            if lead_in {
                // Buffer delay policy: audio must already be decoding and
                // flowing before the first nonzero inactive gain.
                let lead = CROSSFADE_LEAD_IN_FRAMES as f64
                    / f64::from(STANDARD_SAMPLE_RATE);
                sleep(Duration::from_secs_f64(lead)).await;
            }

            let calc = CrossfadeCalculator::new(curve, duration, STEP_TIME_SECS);
            let steps = calc.steps();
            let start = Instant::now();
            let mut ticker = interval(STEP_TIME);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut k: u32 = 0;
            let mut cancelled = false;
            loop {
                ticker.tick().await;
                if self.crossfade_cancel.load(Ordering::Acquire) {
                    cancelled = true;
                    break;
                }

                // Monotonic catch-up: a late tick jumps to the step the
                // wall clock says we should be on.
                let caught_up = ((start.elapsed().as_secs_f64() / STEP_TIME_SECS) as u32)
                    .min(steps);
                if caught_up > k {
                    if caught_up > k + 1 {
                        warn!("crossfade tick late; skipping to step {}/{}", caught_up, steps);
                    }
                    k = caught_up;
                }

                let (g_out, g_in) = calc.gains_at(k);
                active.set_gain((a0 * g_out) as f32);
                inactive.set_gain((i0 + (1.0 - i0) * g_in) as f32);

                let progress = f64::from(k) / f64::from(steps);
                yield CrossfadeProgress {
                    phase: CrossfadePhase::Fading(progress),
                    duration,
                    elapsed: progress * duration,
                };

                if k >= steps {
                    break;
                }
                k += 1;
            }

            if !cancelled {
                yield CrossfadeProgress {
                    phase: CrossfadePhase::Switching,
                    duration,
                    elapsed: duration,
                };

                let outgoing = self.active_node();
                self.switch_active();
                outgoing.clear();

                yield CrossfadeProgress {
                    phase: CrossfadePhase::Cleanup,
                    duration,
                    elapsed: duration,
                };
                self.crossfade_active.store(false, Ordering::Release);
            }
            // A cancelled ticker leaves `crossfade_active` set: the gains and
            // read heads stay captured for rollback or pause until the
            // orchestrator resolves them.
        }
    }

    /// Cooperatively cancel the in-flight crossfade ticker
    pub fn cancel_active_crossfade(&self) {
        self.crossfade_cancel.store(true, Ordering::Release);
    }

    /// Cancel the ticker and halt/clear the incoming node
    pub fn cancel_and_stop_inactive(&self) {
        self.cancel_active_crossfade();
        self.inactive_node().clear();
    }

    /// Unwind a cancelled crossfade: restore the active gain to 1.0 over
    /// `rollback_duration`, stop and clear the inactive node. Returns the
    /// active gain captured at cancel time.
    pub async fn rollback_crossfade(&self, rollback_duration: f64) -> f32 {
        self.cancel_active_crossfade();
        let active = self.active_node();
        let captured = active.gain();

        ramp_gain(&active, captured, 1.0, rollback_duration, FadeCurve::SCurve).await;
        self.inactive_node().clear();
        self.crossfade_active.store(false, Ordering::Release);

        debug!("Rolled back crossfade from gain {:.3}", captured);
        captured
    }

    /// Snapshot of an in-flight crossfade, `None` when none is running
    pub fn get_crossfade_state(&self) -> Option<CrossfadeState> {
        if !self.crossfade_active.load(Ordering::Acquire) {
            return None;
        }
        let active = self.active_node();
        let inactive = self.inactive_node();
        Some(CrossfadeState {
            active_gain: active.gain(),
            inactive_gain: inactive.gain(),
            active_frame: active.position_frames(),
            inactive_frame: inactive.position_frames(),
        })
    }

    /// True while a crossfade ticker owns the node gains
    pub fn has_active_crossfade(&self) -> bool {
        self.crossfade_active.load(Ordering::Acquire)
    }

    /// Halt both main nodes mid-crossfade (gains and heads stay captured)
    pub fn pause_both_players_during_crossfade(&self) {
        self.nodes[0].set_playing(false);
        self.nodes[1].set_playing(false);
    }

    /// Convert an in-flight (or frozen) crossfade into a captured state:
    /// stop the ticker, halt both nodes, release the crossfade slot. The
    /// nodes keep their buffers, gains and read heads for resume.
    pub fn suspend_crossfade(&self) -> Option<CrossfadeState> {
        if !self.crossfade_active.load(Ordering::Acquire) {
            return None;
        }
        self.crossfade_cancel.store(true, Ordering::Release);
        let state = self.get_crossfade_state();
        self.pause_both_players_during_crossfade();
        self.crossfade_active.store(false, Ordering::Release);
        state
    }

    /// Discard all scheduled frames: stop and clear every node, drop effect
    /// voices, zero main gains. Master volume is left alone.
    pub fn full_reset(&self) {
        warn!("Audio engine full reset");
        self.crossfade_cancel.store(true, Ordering::Release);
        self.crossfade_active.store(false, Ordering::Release);
        for node in &self.nodes {
            node.clear();
        }
        self.overlay.clear();
        self.effects.stop_all(true);
        self.audio_expected.store(false, Ordering::Release);
    }
}

/// Tick a node's gain from `from` to `to` over `duration` seconds along
/// `curve`, catching up from wall-clock time when a tick lands late.
pub(crate) async fn ramp_gain(
    node: &PlayerNode,
    from: f32,
    to: f32,
    duration: f64,
    curve: FadeCurve,
) {
    if duration <= 0.0 || (from - to).abs() < f32::EPSILON {
        node.set_gain(to);
        return;
    }
    let start = Instant::now();
    let mut ticker = interval(STEP_TIME);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let progress = (start.elapsed().as_secs_f64() / duration).min(1.0);
        let eased = curve.fade_in_gain(progress);
        let gain = f64::from(from) + (f64::from(to) - f64::from(from)) * eased;
        node.set_gain(gain as f32);
        if progress >= 1.0 {
            break;
        }
    }
    node.set_gain(to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::TrackBuffer;
    use stillpoint_common::TrackLocator;
    use uuid::Uuid;

    fn test_engine() -> Arc<AudioEngine> {
        AudioEngine::with_sink(Box::new(NullSink::new()))
    }

    fn test_track(name: &str) -> Track {
        Track {
            id: Uuid::new_v4(),
            locator: TrackLocator::Url {
                url: format!("test://{name}"),
            },
            metadata: None,
        }
    }

    fn load_constant(node: &PlayerNode, name: &str, frames: u64, value: f32) {
        let samples = vec![value; (frames as usize) * 2];
        node.load(test_track(name), Arc::new(TrackBuffer::new(samples)));
    }

    #[test]
    fn test_exactly_one_active_node() {
        let engine = test_engine();
        let a = engine.active_node();
        let b = engine.inactive_node();
        assert_ne!(a.name(), b.name());

        engine.switch_active();
        assert_eq!(engine.active_node().name(), b.name());
        assert_eq!(engine.inactive_node().name(), a.name());
    }

    #[test]
    fn test_render_mixes_nodes_with_master() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "t1", 100, 0.5);
        engine.active_node().set_gain(1.0);
        engine.active_node().set_playing(true);
        engine.set_master_volume(0.5);

        let mut out = vec![AudioFrame::zero(); 4];
        engine.render_block(&mut out);
        assert!((out[0].left - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_master_volume_clamped() {
        let engine = test_engine();
        engine.set_master_volume(2.0);
        assert_eq!(engine.get_master_volume(), 1.0);
        engine.set_master_volume(-1.0);
        assert_eq!(engine.get_master_volume(), 0.0);
    }

    #[tokio::test]
    async fn test_crossfade_requires_inactive_buffer() {
        let engine = test_engine();
        let result = engine.perform_synchronized_crossfade(2.0, FadeCurve::EqualPower);
        assert!(matches!(result, Err(EngineError::InvalidState { .. })));
        assert!(!engine.has_active_crossfade());
    }

    #[tokio::test]
    async fn test_crossfade_completes_and_switches() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "out", 441_000, 0.5);
        engine.active_node().set_gain(1.0);
        engine.active_node().set_playing(true);
        load_constant(&engine.inactive_node(), "in", 441_000, 0.5);
        engine.prepare_inactive().unwrap();

        let incoming_name = engine.inactive_node().name();
        let mut stream = engine
            .perform_synchronized_crossfade(0.2, FadeCurve::EqualPower)
            .unwrap();

        let start = Instant::now();
        let mut last_progress = -1.0;
        let mut saw_switch = false;
        while let Some(progress) = stream.next().await {
            match progress.phase {
                CrossfadePhase::Fading(p) => {
                    assert!(p >= last_progress, "progress regressed");
                    last_progress = p;
                }
                CrossfadePhase::Switching => saw_switch = true,
                _ => {}
            }
        }
        let elapsed = start.elapsed().as_secs_f64();

        assert!(saw_switch);
        assert!(last_progress >= 1.0 - 1e-9);
        // Lead-in (~46ms) plus the 0.2s fade, with scheduler slack
        assert!(elapsed >= 0.2, "crossfade finished early: {elapsed:.3}s");
        assert!(elapsed < 0.5, "crossfade overran: {elapsed:.3}s");
        assert_eq!(engine.active_node().name(), incoming_name);
        assert!((engine.active_node().gain() - 1.0).abs() < 1e-3);
        // Outgoing node stopped and cleared
        assert!(!engine.inactive_node().has_buffer());
        assert!(!engine.has_active_crossfade());
    }

    #[tokio::test]
    async fn test_crossfade_cancel_then_rollback() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "out", 441_000, 0.5);
        engine.active_node().set_gain(1.0);
        engine.active_node().set_playing(true);
        load_constant(&engine.inactive_node(), "in", 441_000, 0.5);
        engine.prepare_inactive().unwrap();

        let original_active = engine.active_node().name();
        let mut stream = engine
            .perform_synchronized_crossfade(2.0, FadeCurve::EqualPower)
            .unwrap();

        // Let the fade make some progress then cancel
        for _ in 0..12 {
            if stream.next().await.is_none() {
                break;
            }
        }
        engine.cancel_active_crossfade();
        while stream.next().await.is_some() {}

        // No switch happened
        assert_eq!(engine.active_node().name(), original_active);

        let captured = engine.rollback_crossfade(0.05).await;
        assert!(captured < 1.0);
        assert!((engine.active_node().gain() - 1.0).abs() < 1e-6);
        assert!(!engine.inactive_node().has_buffer());
        assert!(!engine.has_active_crossfade());
    }

    #[tokio::test]
    async fn test_pause_and_state_capture_mid_crossfade() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "out", 441_000, 0.5);
        engine.active_node().set_gain(1.0);
        engine.active_node().set_playing(true);
        load_constant(&engine.inactive_node(), "in", 441_000, 0.5);
        engine.prepare_inactive().unwrap();

        let mut stream = engine
            .perform_synchronized_crossfade(1.0, FadeCurve::EqualPower)
            .unwrap();
        for _ in 0..20 {
            stream.next().await;
        }

        let state = engine.get_crossfade_state().expect("crossfade running");
        assert!(state.active_gain < 1.0);
        assert!(state.inactive_gain > 0.0);

        engine.pause_both_players_during_crossfade();
        assert!(!engine.active_node().is_playing());
        assert!(!engine.inactive_node().is_playing());

        // Unwind for the next test step
        engine.cancel_active_crossfade();
        while stream.next().await.is_some() {}
    }

    #[tokio::test]
    async fn test_resume_crossfade_from_gains() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "out", 441_000, 0.5);
        engine.active_node().set_gain(0.7);
        load_constant(&engine.inactive_node(), "in", 441_000, 0.5);
        engine.inactive_node().set_gain(0.6);

        let mut stream = engine
            .resume_crossfade_from_state(0.1, FadeCurve::EqualPower, (0.7, 0.6))
            .unwrap();

        let mut min_in: f32 = 1.0;
        while let Some(progress) = stream.next().await {
            if let CrossfadePhase::Fading(_) = progress.phase {
                min_in = min_in.min(engine.inactive_node().gain());
            }
        }
        // Incoming gain never dropped below its captured value
        assert!(min_in >= 0.6 - 1e-3, "incoming gain re-traversed: {min_in}");
        assert!((engine.active_node().gain() - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_seek_restores_gain() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "t", 441_000, 0.5);
        engine.active_node().set_gain(1.0);
        engine.active_node().set_playing(true);

        engine.seek(5.0).await.unwrap();
        assert_eq!(engine.active_node().position_frames(), 5 * 44_100);
        assert!((engine.active_node().gain() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_seek_saturates_at_track_edge() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "t", 44_100, 0.5); // 1s track
        engine.active_node().set_gain(1.0);

        engine.seek(100.0).await.unwrap();
        let pos = engine.active_node().position_frames();
        assert!(pos <= 44_100 - 4_410);

        engine.seek(-3.0).await.unwrap();
        assert_eq!(engine.active_node().position_frames(), 0);
    }

    #[tokio::test]
    async fn test_seek_without_track_fails() {
        let engine = test_engine();
        assert!(matches!(
            engine.seek(1.0).await,
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_schedule_active_with_fade_in() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "t", 441_000, 0.5);

        engine
            .schedule_active(true, 0.1, FadeCurve::EqualPower)
            .await
            .unwrap();
        assert!(engine.active_node().is_playing());
        assert!((engine.active_node().gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cancel_and_stop_inactive_clears_incoming() {
        let engine = test_engine();
        load_constant(&engine.inactive_node(), "in", 100, 0.5);
        engine.inactive_node().set_playing(true);

        engine.cancel_and_stop_inactive();
        assert!(!engine.inactive_node().is_playing());
        assert!(!engine.inactive_node().has_buffer());
    }

    #[test]
    fn test_full_reset_clears_everything() {
        let engine = test_engine();
        load_constant(&engine.active_node(), "t", 100, 0.5);
        engine.active_node().set_gain(1.0);
        engine.active_node().set_playing(true);
        engine.set_master_volume(0.8);

        engine.full_reset();
        assert!(!engine.nodes[0].has_buffer());
        assert!(!engine.nodes[1].has_buffer());
        assert_eq!(engine.active_node().gain(), 0.0);
        // Master volume survives a reset
        assert_eq!(engine.get_master_volume(), 0.8);
    }
}
