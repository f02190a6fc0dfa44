//! Playback coordination
//!
//! Policy above the engine: the state store (single authority on
//! main-track state), the crossfade orchestrator, the prioritized
//! operation queue and the near-end-of-track scheduler.

pub mod operations;
pub mod orchestrator;
pub mod scheduler;
pub mod state_store;

pub use operations::{CancellationHandle, OperationPriority, OperationQueue};
pub use orchestrator::CrossfadeOrchestrator;
pub use scheduler::NearEndScheduler;
pub use state_store::{PausedCrossfadeSnapshot, PlaybackStateStore};
