//! Event types and the event bus
//!
//! A single multiplexed event stream consumed by observers. Events are
//! broadcast via [`EventBus`] and can be serialized for transport.

use crate::state::{OverlayState, PlayerState};
use crate::track::TrackMetadata;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// Engine event stream payload
///
/// All events use this central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A file load began
    FileLoadStarted {
        track_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decode progress for an in-flight load (0.0 - 1.0)
    FileLoadProgress { track_id: Uuid, progress: f32 },

    /// File fully loaded; duration now known
    FileLoadCompleted {
        track_id: Uuid,
        /// Decoded duration in seconds
        duration: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Adaptive load timeout elapsed before the decode finished
    FileLoadTimeout {
        track_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Load failed
    FileLoadError {
        track_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A crossfade began
    CrossfadeStarted {
        /// Outgoing track title
        from: String,
        /// Incoming track title
        to: String,
        /// Total crossfade duration in seconds
        duration: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Normalized crossfade progress (0.0 - 1.0), emitted per tick
    CrossfadeProgress { progress: f64 },

    /// Crossfade ran to completion; the incoming track is now active
    CrossfadeCompleted {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Crossfade was cancelled and rolled back
    CrossfadeCancelled {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Crossfade exceeded its wall-clock bound (1.5x duration)
    CrossfadeTimeout {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// System audio interruption (phone call, alarm)
    AudioSessionInterruption {
        /// True at interruption begin, false at end
        began: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output route changed (headphones unplugged, device switch)
    AudioSessionRouteChange {
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Main-track state machine transition
    StateChanged {
        old_state: PlayerState,
        new_state: PlayerState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Overlay state machine transition
    OverlayStateChanged {
        old_state: OverlayState,
        new_state: OverlayState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The active track changed (crossfade completion, skip, playlist advance)
    TrackChanged {
        track_id: Uuid,
        metadata: TrackMetadata,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic playback position report (about 1 Hz while playing)
    PositionChanged {
        /// Position in seconds
        position: f64,
        /// Track duration in seconds
        duration: f64,
    },

    /// Master volume changed
    VolumeChanged { old_volume: f32, new_volume: f32 },
}

impl PlayerEvent {
    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            PlayerEvent::FileLoadStarted { .. } => "file-load-started",
            PlayerEvent::FileLoadProgress { .. } => "file-load-progress",
            PlayerEvent::FileLoadCompleted { .. } => "file-load-completed",
            PlayerEvent::FileLoadTimeout { .. } => "file-load-timeout",
            PlayerEvent::FileLoadError { .. } => "file-load-error",
            PlayerEvent::CrossfadeStarted { .. } => "crossfade-started",
            PlayerEvent::CrossfadeProgress { .. } => "crossfade-progress",
            PlayerEvent::CrossfadeCompleted { .. } => "crossfade-completed",
            PlayerEvent::CrossfadeCancelled { .. } => "crossfade-cancelled",
            PlayerEvent::CrossfadeTimeout { .. } => "crossfade-timeout",
            PlayerEvent::AudioSessionInterruption { .. } => "audio-session-interruption",
            PlayerEvent::AudioSessionRouteChange { .. } => "audio-session-route-change",
            PlayerEvent::StateChanged { .. } => "state-changed",
            PlayerEvent::OverlayStateChanged { .. } => "overlay-state-changed",
            PlayerEvent::TrackChanged { .. } => "track-changed",
            PlayerEvent::PositionChanged { .. } => "position-changed",
            PlayerEvent::VolumeChanged { .. } => "volume-changed",
        }
    }
}

/// Broadcast fan-out for [`PlayerEvent`]
///
/// Observers subscribe for a receiver (or a `Stream`); they never hold a
/// reference into the engine, so dropping a receiver cannot extend any
/// component's lifetime. Slow observers lag and skip rather than block the
/// emitter.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast an event to all subscribers
    ///
    /// Send errors (no receivers) are ignored; the stream is lazy.
    pub fn emit(&self, event: PlayerEvent) {
        tracing::trace!(event = event.label(), "emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe for a raw broadcast receiver
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as an async `Stream`, silently skipping lagged events
    pub fn stream(&self) -> impl Stream<Item = PlayerEvent> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| item.ok())
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
