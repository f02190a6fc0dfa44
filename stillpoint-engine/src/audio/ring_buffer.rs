//! Lock-free ring buffer for audio frames
//!
//! Single-producer single-consumer frame queue between the mixer task and
//! the realtime audio callback. The callback side only pops; it never takes
//! a lock.

use crate::audio::types::AudioFrame;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default capacity in frames (~186 ms at 44.1 kHz)
const DEFAULT_CAPACITY: usize = 8192;

/// Producer fill targets
const TARGET_FILL_MIN: f32 = 0.50;
const TARGET_FILL_MAX: f32 = 0.75;

/// Lock-free SPSC ring buffer for audio frames
pub struct AudioRingBuffer {
    buffer: HeapRb<AudioFrame>,
    underruns: Arc<AtomicU64>,
    overruns: Arc<AtomicU64>,
    /// True while the engine expects audio to flow; classifies underruns as
    /// concerning (warn) versus idle (trace).
    audio_expected: Arc<AtomicBool>,
}

impl AudioRingBuffer {
    /// Create a ring buffer of `capacity` frames (default 8192)
    pub fn new(capacity: Option<usize>, audio_expected: Arc<AtomicBool>) -> Self {
        let capacity = capacity.unwrap_or(DEFAULT_CAPACITY);
        debug!("Creating audio ring buffer: {} frames", capacity);

        Self {
            buffer: HeapRb::new(capacity),
            underruns: Arc::new(AtomicU64::new(0)),
            overruns: Arc::new(AtomicU64::new(0)),
            audio_expected,
        }
    }

    /// Split into producer (mixer task) and consumer (audio callback) halves
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        let (prod, cons) = self.buffer.split();

        let producer = AudioProducer {
            producer: prod,
            overruns: Arc::clone(&self.overruns),
        };
        let consumer = AudioConsumer {
            consumer: cons,
            underruns: Arc::clone(&self.underruns),
            audio_expected: Arc::clone(&self.audio_expected),
        };
        (producer, consumer)
    }
}

/// Counters snapshot
#[derive(Debug, Clone, Copy)]
pub struct RingBufferStats {
    pub underruns: u64,
    pub overruns: u64,
}

/// Producer half (mixer task)
pub struct AudioProducer {
    producer: ringbuf::HeapProd<AudioFrame>,
    overruns: Arc<AtomicU64>,
}

impl AudioProducer {
    /// Push one frame; returns false on overrun (buffer full)
    pub fn push(&mut self, frame: AudioFrame) -> bool {
        match self.producer.try_push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Occupied frames
    pub fn occupied_len(&self) -> usize {
        self.producer.occupied_len()
    }

    /// Total capacity in frames
    pub fn capacity(&self) -> usize {
        self.producer.capacity().into()
    }

    /// True below the 50% fill target (producer should render more)
    pub fn needs_frames(&self) -> bool {
        (self.occupied_len() as f32 / self.capacity() as f32) < TARGET_FILL_MIN
    }

    /// True within the 50-75% target band
    pub fn is_fill_optimal(&self) -> bool {
        let fill = self.occupied_len() as f32 / self.capacity() as f32;
        (TARGET_FILL_MIN..TARGET_FILL_MAX).contains(&fill)
    }

    /// Overrun count so far
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Consumer half (audio callback)
pub struct AudioConsumer {
    consumer: ringbuf::HeapCons<AudioFrame>,
    underruns: Arc<AtomicU64>,
    audio_expected: Arc<AtomicBool>,
}

impl AudioConsumer {
    /// Pop one frame, or silence on underrun
    ///
    /// Lock-free; safe to call from the realtime audio callback.
    pub fn pop_or_silence(&mut self) -> AudioFrame {
        match self.consumer.try_pop() {
            Some(frame) => frame,
            None => {
                let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
                if self.audio_expected.load(Ordering::Acquire) {
                    if count % 1000 == 1 {
                        warn!("audio ring buffer underrun (total: {})", count);
                    }
                } else {
                    trace!("idle underrun (no audio expected)");
                }
                AudioFrame::zero()
            }
        }
    }

    /// Counters snapshot
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_round_trip() {
        let flag = Arc::new(AtomicBool::new(true));
        let rb = AudioRingBuffer::new(Some(8), flag);
        let (mut prod, mut cons) = rb.split();

        assert!(prod.push(AudioFrame {
            left: 0.5,
            right: -0.5
        }));
        let frame = cons.pop_or_silence();
        assert_eq!(frame.left, 0.5);
        assert_eq!(frame.right, -0.5);
    }

    #[test]
    fn test_underrun_returns_silence() {
        let flag = Arc::new(AtomicBool::new(false));
        let rb = AudioRingBuffer::new(Some(4), flag);
        let (_prod, mut cons) = rb.split();

        let frame = cons.pop_or_silence();
        assert_eq!(frame.left, 0.0);
        assert_eq!(cons.stats().underruns, 1);
    }

    #[test]
    fn test_overrun_counted() {
        let flag = Arc::new(AtomicBool::new(true));
        let rb = AudioRingBuffer::new(Some(2), flag);
        let (mut prod, _cons) = rb.split();

        assert!(prod.push(AudioFrame::zero()));
        assert!(prod.push(AudioFrame::zero()));
        assert!(!prod.push(AudioFrame::zero()));
        assert_eq!(prod.overruns(), 1);
    }

    #[test]
    fn test_fill_targets() {
        let flag = Arc::new(AtomicBool::new(true));
        let rb = AudioRingBuffer::new(Some(100), flag);
        let (mut prod, _cons) = rb.split();

        assert!(prod.needs_frames());
        for _ in 0..60 {
            prod.push(AudioFrame::zero());
        }
        assert!(!prod.needs_frames());
        assert!(prod.is_fill_optimal());
    }
}
