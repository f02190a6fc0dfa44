//! Player facade
//!
//! The public face of the engine: owns the configuration, the audio engine,
//! the state store, the crossfade orchestrator, the operation queue, the
//! near-end scheduler, the overlay player and the effect cache. Every verb
//! enqueues a prioritized operation; the queue serializes them and preempts
//! by priority (pause beats skip beats resume beats playlist edits;
//! interruption recovery beats everything).

use crate::collaborators::{
    AudioSessionManager, NoopNowPlaying, NowPlayingSink, PlaylistNavigator, TrackList,
};
use crate::effects::{EffectCache, SoundEffect, DEFAULT_CACHE_CAPACITY};
use crate::engine::{AudioEngine, OutputSink};
use crate::overlay::OverlayPlayer;
use crate::playback::operations::{CancellationHandle, OperationPriority, OperationQueue};
use crate::playback::orchestrator::CrossfadeOrchestrator;
use crate::playback::scheduler::NearEndScheduler;
use crate::playback::state_store::PlaybackStateStore;
use chrono::Utc;
use std::sync::{Arc, Mutex, RwLock as StdRwLock};
use stillpoint_common::{
    CrossfadeOperation, CrossfadeResult, EngineError, EventBus, OverlayConfiguration,
    PlayerConfiguration, PlayerEvent, PlayerState, RepeatMode, Result, Track,
};
use tokio::sync::RwLock;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Default skip amount for skip_forward/skip_backward, seconds
pub const DEFAULT_SKIP_SECONDS: f64 = 15.0;

/// Construction options for [`Player`]
pub struct PlayerOptions {
    /// Output sink; `None` uses the default hardware device
    pub sink: Option<Box<dyn OutputSink>>,
    /// Audio-session collaborator; `None` uses the no-op session
    pub session: Option<Arc<dyn AudioSessionManager>>,
    /// Lock-screen sink; `None` drops updates
    pub now_playing: Option<Arc<dyn NowPlayingSink>>,
    /// Bound of the preloaded-effect pool
    pub effect_cache_capacity: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            sink: None,
            session: None,
            now_playing: None,
            effect_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Component handles shared into queued operations and background tasks
#[derive(Clone)]
struct Shared {
    config: Arc<RwLock<PlayerConfiguration>>,
    engine: Arc<AudioEngine>,
    store: Arc<PlaybackStateStore>,
    orchestrator: Arc<CrossfadeOrchestrator>,
    playlist: Arc<StdRwLock<TrackList>>,
    session: Arc<dyn AudioSessionManager>,
    now_playing: Arc<dyn NowPlayingSink>,
    events: EventBus,
}

/// The embeddable playback engine
///
/// Must be constructed inside a Tokio runtime (the operation queue and
/// background schedulers spawn tasks). One `Player` per process audio
/// session: the audio hardware is global, so concurrent instances need
/// distinct devices and a session collaborator that arbitrates.
pub struct Player {
    shared: Shared,
    ops: Arc<OperationQueue>,
    overlay: Arc<OverlayPlayer>,
    effects: Arc<EffectCache>,
    scheduler: Mutex<Option<NearEndScheduler>>,
}

impl Player {
    /// Player with default options (hardware output, no-op collaborators)
    pub fn new(config: PlayerConfiguration) -> Self {
        Self::with_options(config, PlayerOptions::default())
    }

    /// Player with explicit collaborators and output sink
    pub fn with_options(config: PlayerConfiguration, options: PlayerOptions) -> Self {
        let config = config.normalized();
        let events = EventBus::default();

        let engine = match options.sink {
            Some(sink) => AudioEngine::with_sink(sink),
            None => AudioEngine::new(),
        };
        engine.set_master_volume(config.master_volume);

        let store = Arc::new(PlaybackStateStore::new(events.clone()));
        let config = Arc::new(RwLock::new(config));
        let orchestrator = Arc::new(CrossfadeOrchestrator::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            events.clone(),
            Arc::clone(&config),
        ));

        let shared = Shared {
            config,
            engine: Arc::clone(&engine),
            store,
            orchestrator,
            playlist: Arc::new(StdRwLock::new(TrackList::default())),
            session: options
                .session
                .unwrap_or_else(|| Arc::new(crate::collaborators::NullAudioSession)),
            now_playing: options
                .now_playing
                .unwrap_or_else(|| Arc::new(NoopNowPlaying)),
            events: events.clone(),
        };

        let ops = Arc::new(OperationQueue::new());
        let overlay = Arc::new(OverlayPlayer::new(&engine, events.clone()));
        let effects = Arc::new(EffectCache::new(options.effect_cache_capacity));

        let scheduler = NearEndScheduler::start(
            Arc::clone(&engine),
            events,
            Arc::clone(&shared.config),
            Self::automatic_trigger(shared.clone(), Arc::clone(&ops)),
            Self::ended_trigger(shared.clone(), Arc::clone(&ops)),
        );

        Self {
            shared,
            ops,
            overlay,
            effects,
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    /// Trigger closure fired by the near-end scheduler: enqueue one
    /// automatic-loop crossfade at `normal` priority.
    fn automatic_trigger(
        shared: Shared,
        ops: Arc<OperationQueue>,
    ) -> Arc<dyn Fn() + Send + Sync> {
        Arc::new(move || {
            let next = shared.playlist.read().unwrap().next();
            let Some(next) = next else {
                return;
            };
            let shared = shared.clone();
            // Ticket dropped on purpose: a failed automatic advance is
            // logged by the queue, not surfaced to any caller.
            let _ = ops.enqueue(
                OperationPriority::Normal,
                "automatic loop crossfade",
                move |cancel| {
                    Box::pin(async move {
                        let (duration, curve) = {
                            let config = shared.config.read().await;
                            (config.crossfade_duration, config.fade_curve)
                        };
                        let outcome = shared
                            .orchestrator
                            .start_crossfade(
                                next,
                                duration,
                                curve,
                                CrossfadeOperation::AutomaticLoop,
                                Some(cancel),
                            )
                            .await?;
                        Shared::after_crossfade(&shared, true, outcome).await;
                        Ok(())
                    })
                },
            );
        })
    }

    /// Fired when the last track runs out with no transition pending:
    /// settle the main flow in `finished`.
    fn ended_trigger(shared: Shared, ops: Arc<OperationQueue>) -> Arc<dyn Fn() + Send + Sync> {
        Arc::new(move || {
            let shared = shared.clone();
            let _ = ops.enqueue(OperationPriority::Normal, "playlist exhausted", move |_| {
                Box::pin(async move {
                    if shared.store.mode().await != PlayerState::Playing
                        || shared.engine.has_active_crossfade()
                    {
                        return Ok(());
                    }
                    shared.store.update_mode(PlayerState::Finished).await?;
                    Shared::release_output(&shared).await
                })
            });
        })
    }

    // --------------------------------------------------------------
    // Configuration
    // --------------------------------------------------------------

    /// Replace the configuration atomically.
    ///
    /// Strict validation: out-of-range fields are rejected with
    /// `invalid-configuration` rather than clamped.
    pub async fn update_configuration(&self, new_config: PlayerConfiguration) -> Result<()> {
        new_config.validate()?;
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Low, "update configuration", move |_| {
                Box::pin(async move {
                    shared.engine.set_master_volume(new_config.master_volume);
                    shared.playlist.write().unwrap().set_repeat(
                        new_config.repeat_mode,
                        new_config.repeat_count,
                    );
                    *shared.config.write().await = new_config;
                    info!("Configuration updated");
                    Ok(())
                })
            })
            .await
    }

    /// Alias for initial configuration
    pub async fn configure(&self, config: PlayerConfiguration) -> Result<()> {
        self.update_configuration(config).await
    }

    pub async fn configuration(&self) -> PlayerConfiguration {
        self.shared.config.read().await.clone()
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Low, "set repeat mode", move |_| {
                Box::pin(async move {
                    let count = shared.config.read().await.repeat_count;
                    shared.config.write().await.repeat_mode = mode;
                    shared.playlist.write().unwrap().set_repeat(mode, count);
                    Ok(())
                })
            })
            .await
    }

    // --------------------------------------------------------------
    // Playlist
    // --------------------------------------------------------------

    pub async fn load_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        self.replace_playlist(tracks).await
    }

    pub async fn replace_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Low, "replace playlist", move |_| {
                Box::pin(async move {
                    let config = shared.config.read().await;
                    let mut playlist = shared.playlist.write().unwrap();
                    playlist.replace(tracks);
                    playlist.set_repeat(config.repeat_mode, config.repeat_count);
                    Ok(())
                })
            })
            .await
    }

    pub async fn append(&self, track: Track) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Low, "append track", move |_| {
                Box::pin(async move {
                    shared.playlist.write().unwrap().append(track);
                    Ok(())
                })
            })
            .await
    }

    // --------------------------------------------------------------
    // Transport
    // --------------------------------------------------------------

    /// Start playback of the playlist's current track, optionally fading in
    pub async fn start_playing(&self, fade_in_duration: f64) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Normal, "start playing", move |cancel| {
                Box::pin(Shared::do_start_playing(shared, fade_in_duration, cancel))
            })
            .await
    }

    /// Pause the main flow; an in-flight crossfade is captured resumably
    pub async fn pause(&self) -> Result<()> {
        // Arm the freeze path before the queue preempts a running crossfade
        if self.shared.engine.has_active_crossfade() {
            self.shared.orchestrator.set_pause_pending();
        }
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::UserInteractive, "pause", move |_| {
                Box::pin(Shared::do_pause(shared))
            })
            .await
    }

    /// Resume from pause (paused crossfades resume per the quick-finish
    /// strategy; plain pauses resume with the configured fade-in)
    pub async fn resume(&self) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Normal, "resume", move |cancel| {
                Box::pin(Shared::do_resume(shared, cancel))
            })
            .await
    }

    /// Stop playback with a fade-out (`None` = configured default)
    pub async fn stop(&self, fade_out_duration: Option<f64>) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::UserInteractive, "stop", move |_| {
                Box::pin(Shared::do_stop(shared, fade_out_duration))
            })
            .await
    }

    /// Graceful end of the session: identical gain path to `stop`, kept as
    /// its own verb so hosts can distinguish intent in telemetry
    pub async fn finish(&self, fade_out_duration: Option<f64>) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::UserInteractive, "finish", move |_| {
                Box::pin(Shared::do_stop(shared, fade_out_duration))
            })
            .await
    }

    pub async fn skip_forward(&self, seconds: f64) -> Result<()> {
        self.relative_seek(seconds.abs()).await
    }

    pub async fn skip_backward(&self, seconds: f64) -> Result<()> {
        self.relative_seek(-seconds.abs()).await
    }

    async fn relative_seek(&self, delta: f64) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::High, "relative seek", move |_| {
                Box::pin(async move {
                    let (position, _total) =
                        shared.engine.get_position().ok_or(EngineError::NoActiveTrack)?;
                    shared.engine.seek(position + delta).await
                })
            })
            .await
    }

    pub async fn seek_to(&self, time: f64) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::High, "seek", move |_| {
                Box::pin(async move {
                    shared.engine.get_position().ok_or(EngineError::NoActiveTrack)?;
                    shared.engine.seek(time).await
                })
            })
            .await
    }

    /// Crossfade (or switch, when paused) to the next playlist entry
    pub async fn skip_to_next(&self) -> Result<()> {
        // A skip supersedes whatever transition is in flight
        if self.shared.engine.has_active_crossfade() {
            self.shared.engine.cancel_active_crossfade();
        }
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::High, "skip to next", move |cancel| {
                Box::pin(Shared::do_skip(shared, true, cancel))
            })
            .await
    }

    /// Crossfade (or switch, when paused) to the previous playlist entry
    pub async fn skip_to_previous(&self) -> Result<()> {
        if self.shared.engine.has_active_crossfade() {
            self.shared.engine.cancel_active_crossfade();
        }
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::High, "skip to previous", move |cancel| {
                Box::pin(Shared::do_skip(shared, false, cancel))
            })
            .await
    }

    // --------------------------------------------------------------
    // Volume
    // --------------------------------------------------------------

    /// Master volume (applied immediately, no queue round-trip)
    pub async fn set_master_volume(&self, volume: f32) -> Result<()> {
        let clamped = volume.clamp(0.0, 1.0);
        let old_volume = self.shared.engine.get_master_volume();
        self.shared.engine.set_master_volume(clamped);
        self.shared.config.write().await.master_volume = clamped;
        self.shared.events.emit(PlayerEvent::VolumeChanged {
            old_volume,
            new_volume: clamped,
        });
        Ok(())
    }

    pub fn get_master_volume(&self) -> f32 {
        self.shared.engine.get_master_volume()
    }

    // --------------------------------------------------------------
    // Overlay
    // --------------------------------------------------------------

    pub async fn start_overlay(&self, track: &Track, config: OverlayConfiguration) -> Result<()> {
        self.overlay.start(track, config).await
    }

    pub fn pause_overlay(&self) -> Result<()> {
        self.overlay.pause()
    }

    pub fn resume_overlay(&self) -> Result<()> {
        self.overlay.resume()
    }

    pub async fn stop_overlay(&self) -> Result<()> {
        self.overlay.stop(true).await
    }

    pub async fn replace_overlay(&self, track: &Track) -> Result<()> {
        self.overlay.replace(track).await
    }

    pub fn overlay_state(&self) -> stillpoint_common::OverlayState {
        self.overlay.state()
    }

    // --------------------------------------------------------------
    // Sound effects
    // --------------------------------------------------------------

    /// Decode an effect into the cache (the only point of effect file I/O)
    pub async fn preload_effect(&self, effect: SoundEffect) -> Result<()> {
        self.effects.preload(effect).await
    }

    /// Trigger a preloaded effect on the dedicated bus
    pub fn play_effect(&self, id: &str) -> Result<()> {
        let loaded = self.effects.get(id)?;
        self.shared.engine.effects_bus().trigger(&loaded);
        Ok(())
    }

    /// Fade out and drop all playing effect voices
    pub fn stop_effect(&self) {
        self.shared.engine.effects_bus().stop_all(false);
    }

    pub fn evict_effect(&self, id: &str) -> bool {
        self.effects.evict(id)
    }

    // --------------------------------------------------------------
    // System events (called by the session collaborator)
    // --------------------------------------------------------------

    /// OS audio interruption (phone call, alarm). `began = true` releases
    /// everything at critical priority; `began = false` only notifies.
    pub async fn handle_interruption(&self, began: bool) -> Result<()> {
        self.shared.events.emit(PlayerEvent::AudioSessionInterruption {
            began,
            timestamp: Utc::now(),
        });
        if !began {
            return Ok(());
        }
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Critical, "interruption", move |_| {
                Box::pin(Shared::do_critical_release(shared))
            })
            .await
    }

    /// Output route change (headphones unplugged, device switch)
    pub async fn handle_route_change(&self, reason: &str) -> Result<()> {
        self.shared.events.emit(PlayerEvent::AudioSessionRouteChange {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.shared.session.ensure_active()
    }

    /// Media services reset: tear everything down and reconfigure
    pub async fn handle_media_services_reset(&self) -> Result<()> {
        let shared = self.shared.clone();
        self.ops
            .run(OperationPriority::Critical, "media services reset", move |_| {
                Box::pin(async move {
                    Shared::do_critical_release(shared.clone()).await?;
                    shared.session.force_reconfigure()
                })
            })
            .await
    }

    // --------------------------------------------------------------
    // Observation
    // --------------------------------------------------------------

    /// Subscribe to the multiplexed event stream
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    /// The event stream as an async `Stream`
    pub fn event_stream(&self) -> impl Stream<Item = PlayerEvent> {
        self.shared.events.stream()
    }

    pub async fn state(&self) -> PlayerState {
        self.shared.store.mode().await
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.shared.store.current_track().await
    }

    /// Active node playback head `(current, total)` in seconds
    pub fn position(&self) -> Option<(f64, f64)> {
        self.shared.engine.get_position()
    }

    pub async fn is_state_consistent(&self) -> bool {
        self.shared.store.is_state_consistent().await
    }

    pub async fn has_paused_crossfade(&self) -> bool {
        self.shared.store.has_paused_crossfade().await
    }

    pub fn has_active_crossfade(&self) -> bool {
        self.shared.engine.has_active_crossfade()
    }

    /// Stop background tasks and release the output. The player can be
    /// restarted with `start_playing`.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.lock().unwrap().take() {
            scheduler.stop();
        }
        self.shared.engine.full_reset();
        self.shared.engine.stop()?;
        self.shared.session.deactivate()?;
        Ok(())
    }
}

impl Shared {
    async fn do_start_playing(
        shared: Shared,
        fade_in: f64,
        cancel: CancellationHandle,
    ) -> Result<()> {
        match shared.store.mode().await {
            PlayerState::Playing => return Ok(()),
            PlayerState::Paused => return Shared::do_resume(shared, cancel).await,
            _ => {}
        }

        // Navigation errors reject the operation without a state change
        let track = shared
            .playlist
            .read()
            .unwrap()
            .current()
            .ok_or(EngineError::EmptyPlaylist)?;

        shared.store.update_mode(PlayerState::Preparing).await?;

        match Shared::start_playing_inner(&shared, track, fade_in, &cancel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                let _ = shared.store.update_mode(PlayerState::Finished).await;
                Err(e)
            }
            Err(e) => {
                warn!("start_playing failed: {}", e);
                let _ = shared
                    .store
                    .update_mode(PlayerState::Failed(e.to_failure()))
                    .await;
                let _ = shared.engine.stop();
                Err(e)
            }
        }
    }

    async fn start_playing_inner(
        shared: &Shared,
        track: Track,
        fade_in: f64,
        cancel: &CancellationHandle,
    ) -> Result<()> {
        shared.session.activate()?;
        shared.engine.prepare()?;
        shared.engine.start()?;
        cancel.check("start playing")?;

        shared.events.emit(PlayerEvent::FileLoadStarted {
            track_id: track.id,
            timestamp: Utc::now(),
        });
        let metadata = match shared.engine.load_on_active(&track).await {
            Ok(metadata) => metadata,
            Err(e) => {
                shared.events.emit(PlayerEvent::FileLoadError {
                    track_id: track.id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };
        shared.events.emit(PlayerEvent::FileLoadCompleted {
            track_id: track.id,
            duration: metadata.duration,
            timestamp: Utc::now(),
        });
        cancel.check("start playing")?;

        let mut loaded = track.clone();
        loaded.metadata = Some(metadata.clone());
        shared.store.set_current_track(Some(loaded)).await;

        shared.store.update_mode(PlayerState::Playing).await?;
        shared.engine.set_audio_expected(true);

        let curve = shared.config.read().await.fade_curve;
        shared
            .engine
            .schedule_active(fade_in > 0.0, fade_in.clamp(0.0, 10.0), curve)
            .await?;
        shared.store.update_mixer_volumes(1.0, 0.0).await;

        shared.now_playing.update_now_playing(&metadata);
        shared.now_playing.update_playback_rate(1.0);
        shared.events.emit(PlayerEvent::TrackChanged {
            track_id: track.id,
            metadata,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn do_pause(shared: Shared) -> Result<()> {
        match shared.store.mode().await {
            PlayerState::Paused => Ok(()),
            PlayerState::Playing => {
                shared.store.update_mode(PlayerState::Paused).await?;
                // Captures an in-flight crossfade into a snapshot; a plain
                // pause (None) just halts the active node.
                if shared.orchestrator.pause_crossfade().await?.is_none() {
                    shared.engine.active_node().set_playing(false);
                }
                shared.engine.set_audio_expected(false);
                shared.now_playing.update_playback_rate(0.0);
                Ok(())
            }
            other => Err(EngineError::InvalidState {
                reason: format!("pause requires playing state (was {other})"),
            }),
        }
    }

    async fn do_resume(shared: Shared, cancel: CancellationHandle) -> Result<()> {
        match shared.store.mode().await {
            PlayerState::Playing => Ok(()),
            PlayerState::Paused => {
                if shared.store.has_paused_crossfade().await {
                    shared.orchestrator.resume_crossfade(Some(cancel)).await?;
                } else {
                    cancel.check("resume")?;
                    let (resume_fade, curve) = {
                        let config = shared.config.read().await;
                        (config.resume_fade_in, config.fade_curve)
                    };
                    let node = shared.engine.active_node();
                    let prior_gain = node.gain();
                    shared.store.update_mode(PlayerState::Playing).await?;
                    node.set_playing(true);
                    if resume_fade > 0.0 && prior_gain > 0.0 {
                        node.set_gain(0.0);
                        crate::engine::ramp_gain(&node, 0.0, prior_gain, resume_fade, curve)
                            .await;
                    }
                }
                shared.engine.set_audio_expected(true);
                shared.now_playing.update_playback_rate(1.0);
                Ok(())
            }
            other => Err(EngineError::InvalidState {
                reason: format!("resume requires paused state (was {other})"),
            }),
        }
    }

    async fn do_stop(shared: Shared, fade_out: Option<f64>) -> Result<()> {
        match shared.store.mode().await {
            PlayerState::Finished | PlayerState::FadingOut | PlayerState::Failed(_) => Ok(()),
            PlayerState::Paused | PlayerState::Preparing => {
                shared.orchestrator.cancel_active_crossfade().await?;
                shared.store.update_mode(PlayerState::Finished).await?;
                Shared::release_output(&shared).await
            }
            PlayerState::Playing => {
                shared.orchestrator.cancel_active_crossfade().await?;
                shared.store.update_mode(PlayerState::FadingOut).await?;

                let (duration, curve) = {
                    let config = shared.config.read().await;
                    (
                        fade_out.unwrap_or(config.stop_fade_out).clamp(0.0, 10.0),
                        config.fade_curve,
                    )
                };
                if duration > 0.0 {
                    let gain = shared.engine.active_node().gain();
                    shared
                        .engine
                        .fade_active_mixer(gain, 0.0, duration, curve)
                        .await?;
                }
                shared.store.update_mode(PlayerState::Finished).await?;
                Shared::release_output(&shared).await
            }
        }
    }

    async fn release_output(shared: &Shared) -> Result<()> {
        shared.engine.active_node().clear();
        shared.engine.inactive_node().clear();
        shared.engine.set_audio_expected(false);
        shared.store.update_mixer_volumes(0.0, 0.0).await;
        shared.now_playing.clear_now_playing();
        shared.session.deactivate()?;
        info!("Playback stopped");
        Ok(())
    }

    async fn do_skip(shared: Shared, forward: bool, cancel: CancellationHandle) -> Result<()> {
        let target = {
            let playlist = shared.playlist.read().unwrap();
            if playlist.is_empty() {
                return Err(EngineError::EmptyPlaylist);
            }
            if forward {
                playlist.next()
            } else {
                playlist.previous()
            }
        };
        let Some(target) = target else {
            return Err(EngineError::InvalidState {
                reason: format!(
                    "no {} track to skip to",
                    if forward { "next" } else { "previous" }
                ),
            });
        };

        match shared.store.mode().await {
            PlayerState::Playing => {
                let (duration, curve) = {
                    let config = shared.config.read().await;
                    (config.crossfade_duration, config.fade_curve)
                };
                let outcome = shared
                    .orchestrator
                    .start_crossfade(
                        target,
                        duration,
                        curve,
                        CrossfadeOperation::ManualChange,
                        Some(cancel),
                    )
                    .await?;
                Shared::after_crossfade(&shared, forward, outcome).await;
                Ok(())
            }
            PlayerState::Paused => {
                // Silent switch while paused: load, swap labels, stay paused
                shared.orchestrator.cancel_active_crossfade().await?;
                let metadata = shared.engine.load_on_inactive(&target).await?;
                cancel.check("skip while paused")?;

                let mut loaded = target;
                loaded.metadata = Some(metadata.clone());
                shared.engine.prepare_inactive()?;
                shared.engine.active_node().clear();
                shared.engine.switch_active_with_volume();
                shared.engine.active_node().set_playing(false);

                shared
                    .store
                    .atomic_switch(loaded.clone(), None)
                    .await?;
                Shared::advance_playlist(&shared, forward);
                shared.now_playing.update_now_playing(&metadata);
                shared.events.emit(PlayerEvent::TrackChanged {
                    track_id: loaded.id,
                    metadata,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            other => Err(EngineError::InvalidState {
                reason: format!("skip requires playing or paused state (was {other})"),
            }),
        }
    }

    fn advance_playlist(shared: &Shared, forward: bool) {
        let mut playlist = shared.playlist.write().unwrap();
        if forward {
            playlist.move_to_next();
        } else {
            playlist.move_to_previous();
        }
    }

    /// Post-crossfade bookkeeping shared by skip and automatic advance.
    ///
    /// The playlist pointer moves for any crossfade that actually started
    /// (including one later paused or cancelled): the pointer tracks the
    /// transition target, so a follow-up skip lands on the entry after it.
    /// The lock-screen only updates once the target is really active.
    async fn after_crossfade(shared: &Shared, forward: bool, outcome: CrossfadeResult) {
        Shared::advance_playlist(shared, forward);
        if outcome == CrossfadeResult::Completed {
            if let Some(metadata) = shared.store.active_metadata().await {
                shared.now_playing.update_now_playing(&metadata);
            }
        }
    }

    /// Critical-priority teardown: resolve crossfades, discard all
    /// scheduled audio, release the session, settle in `finished`.
    async fn do_critical_release(shared: Shared) -> Result<()> {
        warn!("Critical release: resetting engine");
        shared.orchestrator.cancel_active_crossfade().await.ok();
        shared.engine.full_reset();
        shared.store.update_crossfading(false).await;
        shared.store.clear_paused_crossfade().await;

        let mode = shared.store.mode().await;
        if !matches!(mode, PlayerState::Finished | PlayerState::Failed(_)) {
            shared.store.update_mode(PlayerState::Finished).await?;
        }
        shared.store.set_current_track(None).await;
        shared.now_playing.clear_now_playing();
        shared.session.deactivate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NullSink;

    fn player() -> Player {
        Player::with_options(
            PlayerConfiguration::default(),
            PlayerOptions {
                sink: Some(Box::new(NullSink::new())),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let player = player();
        assert_eq!(player.state().await, PlayerState::Finished);
        assert!(player.is_state_consistent().await);
        assert!(player.position().is_none());
    }

    #[tokio::test]
    async fn test_start_with_empty_playlist_rejected_without_state_change() {
        let player = player();
        let result = player.start_playing(0.0).await;
        assert!(matches!(result, Err(EngineError::EmptyPlaylist)));
        // Navigation errors leave the machine at rest
        assert_eq!(player.state().await, PlayerState::Finished);
        assert!(player.is_state_consistent().await);
    }

    #[tokio::test]
    async fn test_pause_without_playing_fails() {
        let player = player();
        assert!(matches!(
            player.pause().await,
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_volume_clamp_and_event() {
        let player = player();
        let mut rx = player.subscribe();

        player.set_master_volume(1.5).await.unwrap();
        assert_eq!(player.get_master_volume(), 1.0);

        match rx.recv().await.unwrap() {
            PlayerEvent::VolumeChanged { new_volume, .. } => assert_eq!(new_volume, 1.0),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_configuration_rejects_bad_values() {
        let player = player();
        let bad = PlayerConfiguration {
            stop_fade_out: 30.0,
            ..Default::default()
        };
        assert!(matches!(
            player.update_configuration(bad).await,
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_play_effect_requires_preload() {
        let player = player();
        assert!(matches!(
            player.play_effect("gong"),
            Err(EngineError::EffectNotFound { .. })
        ));
    }
}
