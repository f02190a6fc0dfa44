//! Sound-effect subsystem
//!
//! Preloaded PCM buffers with LRU eviction, triggered with zero file I/O on
//! a dedicated bus. Effect voices mix in parallel with the main nodes and
//! never touch the main or overlay gain schedules.

use crate::audio::decoder::TrackDecoder;
use crate::audio::types::{AudioFrame, TrackBuffer, STANDARD_SAMPLE_RATE};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use stillpoint_common::{EngineError, Result};
use tracing::{debug, info, warn};

/// Default cache bound (preloaded effects held resident)
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Tail fade applied when an effect is stopped mid-play (seconds)
pub const STOP_TAIL_SECONDS: f64 = 0.050;

/// A sound effect definition
///
/// The PCM itself lives in the cache after `preload`; this is the recipe.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SoundEffect {
    /// Cache key
    pub id: String,
    /// Source file
    pub path: PathBuf,
    /// Fade-in over the first part of the buffer, seconds (>= 0)
    pub fade_in: f64,
    /// Fade-out over the last part of the buffer, seconds (>= 0)
    pub fade_out: f64,
    /// Playback gain, clamped to [0.0, 1.0]
    pub volume: f32,
}

impl SoundEffect {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            fade_in: 0.0,
            fade_out: 0.0,
            volume: 1.0,
        }
    }

    /// Copy with numeric fields clamped into range
    pub fn normalized(mut self) -> Self {
        self.fade_in = self.fade_in.max(0.0);
        self.fade_out = self.fade_out.max(0.0);
        self.volume = self.volume.clamp(0.0, 1.0);
        self
    }
}

/// A preloaded effect: definition plus its decoded standard-format PCM
#[derive(Debug)]
pub struct LoadedEffect {
    pub effect: SoundEffect,
    pub buffer: Arc<TrackBuffer>,
}

/// Bounded pool of preloaded effects with LRU eviction
pub struct EffectCache {
    cache: Mutex<LruCache<String, Arc<LoadedEffect>>>,
}

impl EffectCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Decode and store an effect; evicts the least recently used entry when
    /// the pool is full. Decoding and normalization (stereo 44.1 kHz) happen
    /// here, once. `play` never touches the filesystem.
    pub async fn preload(&self, effect: SoundEffect) -> Result<()> {
        let effect = effect.normalized();
        let path = effect.path.clone();

        let (buffer, _metadata) =
            tokio::task::spawn_blocking(move || TrackDecoder::decode_normalized(&path))
                .await
                .map_err(|e| EngineError::Unknown {
                    reason: format!("decode task panicked: {e}"),
                })??;

        info!(
            "Preloaded effect '{}' ({:.2}s)",
            effect.id,
            buffer.duration_seconds()
        );

        let id = effect.id.clone();
        let loaded = Arc::new(LoadedEffect {
            effect,
            buffer: Arc::new(buffer),
        });

        let mut cache = self.cache.lock().unwrap();
        if let Some((evicted_id, _)) = cache.push(id, loaded) {
            debug!("Effect cache evicted '{}'", evicted_id);
        }
        Ok(())
    }

    /// Fetch a preloaded effect, refreshing its recency
    ///
    /// Fails with `EffectNotFound` if the effect was never preloaded or has
    /// been evicted since.
    pub fn get(&self, id: &str) -> Result<Arc<LoadedEffect>> {
        self.cache
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EffectNotFound { id: id.to_string() })
    }

    /// Drop an effect from the pool
    pub fn evict(&self, id: &str) -> bool {
        self.cache.lock().unwrap().pop(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cache.lock().unwrap().contains(id)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EffectCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// One playing effect instance
struct EffectVoice {
    buffer: Arc<TrackBuffer>,
    position: u64,
    volume: f32,
    fade_in_frames: u64,
    fade_out_frames: u64,
    /// Frame at which a stop-with-tail was requested
    stop_frame: Option<u64>,
    tail_frames: u64,
}

impl EffectVoice {
    fn from_loaded(loaded: &LoadedEffect) -> Self {
        let rate = f64::from(STANDARD_SAMPLE_RATE);
        let total = loaded.buffer.frames();
        let fade_in_frames = ((loaded.effect.fade_in * rate) as u64).min(total);
        let fade_out_frames = ((loaded.effect.fade_out * rate) as u64).min(total);
        Self {
            buffer: Arc::clone(&loaded.buffer),
            position: 0,
            volume: loaded.effect.volume,
            fade_in_frames,
            fade_out_frames,
            stop_frame: None,
            tail_frames: (STOP_TAIL_SECONDS * rate) as u64,
        }
    }

    /// Envelope gain at the current read head
    fn envelope(&self) -> f32 {
        let total = self.buffer.frames();
        let mut gain = self.volume;

        if self.fade_in_frames > 0 && self.position < self.fade_in_frames {
            gain *= self.position as f32 / self.fade_in_frames as f32;
        }
        if self.fade_out_frames > 0 {
            let fade_out_start = total.saturating_sub(self.fade_out_frames);
            if self.position >= fade_out_start {
                let into = self.position - fade_out_start;
                gain *= 1.0 - (into as f32 / self.fade_out_frames as f32);
            }
        }
        if let Some(stop_frame) = self.stop_frame {
            let into = self.position.saturating_sub(stop_frame);
            if self.tail_frames == 0 || into >= self.tail_frames {
                return 0.0;
            }
            gain *= 1.0 - (into as f32 / self.tail_frames as f32);
        }
        gain
    }

    /// True once the voice has nothing left to contribute
    fn finished(&self) -> bool {
        if self.position >= self.buffer.frames() {
            return true;
        }
        match self.stop_frame {
            Some(stop_frame) => {
                self.tail_frames == 0 || self.position >= stop_frame + self.tail_frames
            }
            None => false,
        }
    }
}

/// Dedicated mix bus for effect voices
///
/// Owns the active voices and an independent bus gain. Triggering pushes a
/// voice; rendering mixes and reaps finished voices.
pub struct EffectsBus {
    voices: Mutex<Vec<EffectVoice>>,
    gain: Mutex<f32>,
}

impl EffectsBus {
    pub fn new() -> Self {
        Self {
            voices: Mutex::new(Vec::new()),
            gain: Mutex::new(1.0),
        }
    }

    /// Start a preloaded effect immediately
    ///
    /// No allocation beyond the voice entry and no I/O; trigger latency is
    /// bounded by one render block.
    pub fn trigger(&self, loaded: &LoadedEffect) {
        debug!("Triggering effect '{}'", loaded.effect.id);
        self.voices
            .lock()
            .unwrap()
            .push(EffectVoice::from_loaded(loaded));
    }

    /// Stop all voices
    ///
    /// With `snap` the voices drop immediately; otherwise each gets a 50 ms
    /// tail fade from its current position.
    pub fn stop_all(&self, snap: bool) {
        let mut voices = self.voices.lock().unwrap();
        if snap {
            voices.clear();
            return;
        }
        for voice in voices.iter_mut() {
            if voice.stop_frame.is_none() {
                voice.stop_frame = Some(voice.position);
            }
        }
    }

    /// Independent bus gain, clamped to [0.0, 1.0]
    pub fn set_gain(&self, gain: f32) {
        *self.gain.lock().unwrap() = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f32 {
        *self.gain.lock().unwrap()
    }

    /// Number of live voices
    pub fn active_voices(&self) -> usize {
        self.voices.lock().unwrap().len()
    }

    /// Mix all voices into `out`, advancing and reaping them
    pub fn render_add(&self, out: &mut [AudioFrame]) {
        let bus_gain = *self.gain.lock().unwrap();
        let mut voices = self.voices.lock().unwrap();
        if voices.is_empty() {
            return;
        }

        for voice in voices.iter_mut() {
            for frame_out in out.iter_mut() {
                let Some(mut frame) = voice.buffer.frame(voice.position) else {
                    break;
                };
                frame.apply_gain(voice.envelope() * bus_gain);
                frame_out.add(&frame);
                voice.position += 1;
                if voice.finished() {
                    break;
                }
            }
        }
        voices.retain(|voice| {
            if voice.finished() {
                debug!("Effect voice finished");
                false
            } else {
                true
            }
        });
        if voices.len() > 32 {
            warn!("{} concurrent effect voices", voices.len());
        }
    }
}

impl Default for EffectsBus {
    fn default() -> Self {
        Self::new()
    }
}
