//! Playback node
//!
//! One of the engine's playback units: a loaded PCM buffer, a read head, a
//! playing flag and a mixer gain. The render path reads this state through
//! atomics and short std locks only; all scheduling decisions happen on the
//! engine's async side.

use crate::audio::types::{AudioFrame, TrackBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use stillpoint_common::Track;

/// A single playback node (main A/B pair and the overlay each own one)
pub struct PlayerNode {
    /// Name for logging ("A", "B", "overlay")
    name: &'static str,

    /// Loaded, normalized PCM; `None` when no file is attached
    buffer: RwLock<Option<Arc<TrackBuffer>>>,

    /// Track bookkeeping for the loaded buffer
    track: RwLock<Option<Track>>,

    /// Read head in frames; advanced by the render path
    position: AtomicU64,

    /// True while the node contributes audio
    playing: AtomicBool,

    /// Node mixer gain, read once per render block
    gain: Mutex<f32>,
}

impl PlayerNode {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            buffer: RwLock::new(None),
            track: RwLock::new(None),
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            gain: Mutex::new(0.0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Attach a decoded buffer, resetting the read head
    pub fn load(&self, track: Track, buffer: Arc<TrackBuffer>) {
        *self.buffer.write().unwrap() = Some(buffer);
        *self.track.write().unwrap() = Some(track);
        self.position.store(0, Ordering::Release);
    }

    /// Detach buffer and track, halting playback
    pub fn clear(&self) {
        self.playing.store(false, Ordering::Release);
        *self.buffer.write().unwrap() = None;
        *self.track.write().unwrap() = None;
        self.position.store(0, Ordering::Release);
        self.set_gain(0.0);
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.read().unwrap().is_some()
    }

    pub fn buffer(&self) -> Option<Arc<TrackBuffer>> {
        self.buffer.read().unwrap().clone()
    }

    pub fn track(&self) -> Option<Track> {
        self.track.read().unwrap().clone()
    }

    pub fn set_gain(&self, gain: f32) {
        *self.gain.lock().unwrap() = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f32 {
        *self.gain.lock().unwrap()
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Read head in frames
    pub fn position_frames(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn set_position_frames(&self, frame: u64) {
        self.position.store(frame, Ordering::Release);
    }

    /// Read head and total length in seconds, when a buffer is attached
    pub fn position_seconds(&self) -> Option<(f64, f64)> {
        let buffer = self.buffer.read().unwrap().clone()?;
        let pos = self.position.load(Ordering::Acquire) as f64
            / f64::from(crate::audio::types::STANDARD_SAMPLE_RATE);
        Some((pos.min(buffer.duration_seconds()), buffer.duration_seconds()))
    }

    /// Mix this node's next `out.len()` frames into `out`, advancing the
    /// read head. A node that runs off the end of its buffer stops itself.
    pub fn render_add(&self, out: &mut [AudioFrame]) {
        if !self.playing.load(Ordering::Acquire) {
            return;
        }
        let guard = self.buffer.read().unwrap();
        let Some(buffer) = guard.as_ref() else {
            return;
        };
        let gain = *self.gain.lock().unwrap();
        let mut pos = self.position.load(Ordering::Acquire);

        for frame_out in out.iter_mut() {
            match buffer.frame(pos) {
                Some(mut frame) => {
                    frame.apply_gain(gain);
                    frame_out.add(&frame);
                    pos += 1;
                }
                None => {
                    self.playing.store(false, Ordering::Release);
                    break;
                }
            }
        }
        self.position.store(pos, Ordering::Release);
    }
}

impl std::fmt::Debug for PlayerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerNode")
            .field("name", &self.name)
            .field("playing", &self.is_playing())
            .field("gain", &self.gain())
            .field("position", &self.position_frames())
            .field("loaded", &self.has_buffer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stillpoint_common::Track;

    fn test_track() -> Track {
        Track {
            id: uuid::Uuid::new_v4(),
            locator: stillpoint_common::TrackLocator::Url {
                url: "test://tone".into(),
            },
            metadata: None,
        }
    }

    #[test]
    fn test_render_applies_gain_and_advances() {
        let node = PlayerNode::new("A");
        node.load(
            test_track(),
            Arc::new(TrackBuffer::new(vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0])),
        );
        node.set_gain(0.5);
        node.set_playing(true);

        let mut out = vec![AudioFrame::zero(); 2];
        node.render_add(&mut out);

        assert_eq!(out[0].left, 0.5);
        assert_eq!(out[1].right, 0.5);
        assert_eq!(node.position_frames(), 2);
        assert!(node.is_playing());
    }

    #[test]
    fn test_render_stops_at_buffer_end() {
        let node = PlayerNode::new("A");
        node.load(test_track(), Arc::new(TrackBuffer::new(vec![1.0, 1.0])));
        node.set_gain(1.0);
        node.set_playing(true);

        let mut out = vec![AudioFrame::zero(); 4];
        node.render_add(&mut out);

        assert!(!node.is_playing());
        assert_eq!(out[0].left, 1.0);
        assert_eq!(out[1].left, 0.0);
    }

    #[test]
    fn test_silent_when_not_playing() {
        let node = PlayerNode::new("B");
        node.load(test_track(), Arc::new(TrackBuffer::new(vec![1.0, 1.0])));
        node.set_gain(1.0);

        let mut out = vec![AudioFrame::zero(); 1];
        node.render_add(&mut out);
        assert_eq!(out[0].left, 0.0);
        assert_eq!(node.position_frames(), 0);
    }

    #[test]
    fn test_clear_resets_everything() {
        let node = PlayerNode::new("A");
        node.load(test_track(), Arc::new(TrackBuffer::new(vec![1.0, 1.0])));
        node.set_gain(0.8);
        node.set_playing(true);
        node.set_position_frames(1);

        node.clear();
        assert!(!node.is_playing());
        assert!(!node.has_buffer());
        assert_eq!(node.gain(), 0.0);
        assert_eq!(node.position_frames(), 0);
    }
}
