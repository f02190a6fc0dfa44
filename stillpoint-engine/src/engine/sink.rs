//! Output sinks
//!
//! The engine renders into a frame callback; a sink decides where those
//! frames go. [`DeviceSink`] drives real hardware through cpal on a
//! dedicated thread (cpal streams are not `Send`, so the stream lives and
//! dies on that thread). [`NullSink`] consumes frames at wall-clock rate
//! with no device, for headless hosts and tests.

use crate::audio::output::AudioOutput;
use crate::audio::types::{AudioFrame, STANDARD_SAMPLE_RATE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stillpoint_common::{EngineError, Result};
use tracing::{debug, error, info};

/// Destination for rendered audio frames
pub trait OutputSink: Send {
    /// Begin pulling frames. `next_frame` must be wait-free on the caller's
    /// side; it is invoked once per output frame.
    fn start(&mut self, next_frame: Box<dyn FnMut() -> AudioFrame + Send>) -> Result<()>;

    /// Stop pulling frames and release the device
    fn stop(&mut self) -> Result<()>;
}

/// Hardware sink backed by cpal
pub struct DeviceSink {
    device_name: Option<String>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DeviceSink {
    /// Sink for the named device, or the system default
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl OutputSink for DeviceSink {
    fn start(&mut self, mut next_frame: Box<dyn FnMut() -> AudioFrame + Send>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::Release);

        let stop_flag = Arc::clone(&self.stop_flag);
        let device_name = self.device_name.clone();
        let (startup_tx, startup_rx) = std::sync::mpsc::channel::<Result<()>>();

        // cpal streams are not Send; the output lives entirely on this thread.
        let handle = std::thread::spawn(move || {
            let mut output = match AudioOutput::new(device_name) {
                Ok(output) => output,
                Err(e) => {
                    let _ = startup_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = output.start(move || next_frame()) {
                let _ = startup_tx.send(Err(e));
                return;
            }
            let _ = startup_tx.send(Ok(()));

            while !stop_flag.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(100));
            }
            if let Err(e) = output.stop() {
                error!("failed to stop audio output: {}", e);
            }
        });
        self.thread = Some(handle);

        startup_rx.recv().map_err(|_| EngineError::EngineStart {
            reason: "audio output thread exited during startup".into(),
        })??;

        info!("Device sink started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            debug!("Device sink stopped");
        }
        Ok(())
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Headless sink: consumes frames at real-time rate without a device
///
/// Keeps positions and the ring buffer advancing exactly as a device would,
/// which is what the integration tests and offline hosts need.
pub struct NullSink {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for NullSink {
    fn start(&mut self, mut next_frame: Box<dyn FnMut() -> AudioFrame + Send>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::Release);
        let stop_flag = Arc::clone(&self.stop_flag);

        // Pull one wake's worth of frames every 10ms
        let frames_per_wake = (STANDARD_SAMPLE_RATE / 100) as usize;
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                for _ in 0..frames_per_wake {
                    let _ = next_frame();
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        });
        self.thread = Some(handle);

        info!("Null sink started (headless output)");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_null_sink_pulls_frames() {
        let counter = Arc::new(AtomicU64::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut sink = NullSink::new();
        sink.start(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::Relaxed);
            AudioFrame::zero()
        }))
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        sink.stop().unwrap();

        let pulled = counter.load(Ordering::Relaxed);
        assert!(pulled > 0, "null sink never pulled a frame");
    }

    #[test]
    fn test_null_sink_stop_is_idempotent() {
        let mut sink = NullSink::new();
        sink.start(Box::new(AudioFrame::zero)).unwrap();
        sink.stop().unwrap();
        sink.stop().unwrap();
    }
}
