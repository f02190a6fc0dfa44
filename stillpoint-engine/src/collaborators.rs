//! External collaborator interfaces
//!
//! The engine core delegates OS audio-session lifecycle, lock-screen
//! integration and playlist navigation to its host through these traits.
//! In-process defaults are provided for hosts that need nothing more:
//! [`NullAudioSession`], [`NoopNowPlaying`] and [`TrackList`].

use stillpoint_common::{EngineError, RepeatMode, Result, Track, TrackMetadata};
use tracing::debug;

/// OS audio-session manager (activation, interruptions, route changes)
///
/// The engine calls these around lifecycle edges; the host implementation
/// notifies the player of interruption begin/end and route changes through
/// [`crate::Player::handle_interruption`] and
/// [`crate::Player::handle_route_change`].
pub trait AudioSessionManager: Send + Sync {
    /// Activate the session before audio starts
    fn activate(&self) -> Result<()>;

    /// Re-assert an active session (cheap when already active)
    fn ensure_active(&self) -> Result<()>;

    /// Release the session when playback stops
    fn deactivate(&self) -> Result<()>;

    /// Tear down and reconfigure after a media-services reset
    fn force_reconfigure(&self) -> Result<()>;
}

/// No-op session for hosts without an OS audio session concept
pub struct NullAudioSession;

impl AudioSessionManager for NullAudioSession {
    fn activate(&self) -> Result<()> {
        debug!("null audio session: activate");
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        debug!("null audio session: deactivate");
        Ok(())
    }

    fn force_reconfigure(&self) -> Result<()> {
        Ok(())
    }
}

/// Lock-screen / "now playing" sink
pub trait NowPlayingSink: Send + Sync {
    fn update_now_playing(&self, metadata: &TrackMetadata);
    fn update_playback_rate(&self, rate: f64);
    fn update_playback_position(&self, position: f64);
    fn clear_now_playing(&self);
}

/// Sink that drops all updates
pub struct NoopNowPlaying;

impl NowPlayingSink for NoopNowPlaying {
    fn update_now_playing(&self, _metadata: &TrackMetadata) {}
    fn update_playback_rate(&self, _rate: f64) {}
    fn update_playback_position(&self, _position: f64) {}
    fn clear_now_playing(&self) {}
}

/// Playlist navigation seam
pub trait PlaylistNavigator: Send + Sync {
    fn current(&self) -> Option<Track>;
    fn next(&self) -> Option<Track>;
    fn previous(&self) -> Option<Track>;
    fn has_next(&self) -> bool;
    fn has_previous(&self) -> bool;
    fn move_to_next(&mut self) -> Option<Track>;
    fn move_to_previous(&mut self) -> Option<Track>;
}

/// In-memory playlist with repeat-mode-aware navigation
///
/// `RepeatMode::Single` pins navigation to the current entry;
/// `RepeatMode::Playlist` wraps at the edges, bounded by the optional
/// repeat count.
#[derive(Debug, Clone, Default)]
pub struct TrackList {
    tracks: Vec<Track>,
    index: usize,
    repeat_mode: RepeatMode,
    repeat_count: Option<u32>,
    completed_cycles: u32,
}

impl TrackList {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            index: 0,
            repeat_mode: RepeatMode::Off,
            repeat_count: None,
            completed_cycles: 0,
        }
    }

    /// Replace the whole list, resetting position and cycle bookkeeping
    pub fn replace(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.index = 0;
        self.completed_cycles = 0;
    }

    pub fn append(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn set_repeat(&mut self, mode: RepeatMode, count: Option<u32>) {
        self.repeat_mode = mode;
        self.repeat_count = count;
        self.completed_cycles = 0;
    }

    /// Jump to an absolute index
    pub fn move_to(&mut self, index: usize) -> Result<Track> {
        if index >= self.tracks.len() {
            return Err(EngineError::InvalidPlaylistIndex {
                index,
                len: self.tracks.len(),
            });
        }
        self.index = index;
        Ok(self.tracks[index].clone())
    }

    /// True when playlist repeat still has cycles left
    fn may_wrap(&self) -> bool {
        if self.repeat_mode != RepeatMode::Playlist {
            return false;
        }
        match self.repeat_count {
            None => true,
            Some(count) => self.completed_cycles + 1 < count,
        }
    }
}

impl PlaylistNavigator for TrackList {
    fn current(&self) -> Option<Track> {
        self.tracks.get(self.index).cloned()
    }

    fn next(&self) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.repeat_mode {
            RepeatMode::Single => self.current(),
            _ if self.index + 1 < self.tracks.len() => {
                self.tracks.get(self.index + 1).cloned()
            }
            _ if self.may_wrap() => self.tracks.first().cloned(),
            _ => None,
        }
    }

    fn previous(&self) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.repeat_mode {
            RepeatMode::Single => self.current(),
            _ if self.index > 0 => self.tracks.get(self.index - 1).cloned(),
            _ if self.may_wrap() => self.tracks.last().cloned(),
            _ => None,
        }
    }

    fn has_next(&self) -> bool {
        self.next().is_some()
    }

    fn has_previous(&self) -> bool {
        self.previous().is_some()
    }

    fn move_to_next(&mut self) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.repeat_mode {
            RepeatMode::Single => self.current(),
            _ => {
                if self.index + 1 < self.tracks.len() {
                    self.index += 1;
                } else if self.may_wrap() {
                    self.completed_cycles += 1;
                    self.index = 0;
                } else {
                    return None;
                }
                self.current()
            }
        }
    }

    fn move_to_previous(&mut self) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.repeat_mode {
            RepeatMode::Single => self.current(),
            _ => {
                if self.index > 0 {
                    self.index -= 1;
                } else if self.may_wrap() {
                    self.index = self.tracks.len() - 1;
                } else {
                    return None;
                }
                self.current()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stillpoint_common::TrackLocator;
    use uuid::Uuid;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                id: Uuid::new_v4(),
                locator: TrackLocator::Url {
                    url: format!("test://{i}"),
                },
                metadata: None,
            })
            .collect()
    }

    #[test]
    fn test_linear_navigation() {
        let mut list = TrackList::new(tracks(3));
        assert!(list.has_next());
        assert!(!list.has_previous());

        let second = list.move_to_next().unwrap();
        assert_eq!(second.id, list.current().unwrap().id);
        list.move_to_next().unwrap();
        assert!(!list.has_next());
        assert!(list.move_to_next().is_none());
    }

    #[test]
    fn test_repeat_single_pins_navigation() {
        let mut list = TrackList::new(tracks(3));
        list.set_repeat(RepeatMode::Single, None);
        let current = list.current().unwrap();
        assert_eq!(list.next().unwrap().id, current.id);
        assert_eq!(list.move_to_next().unwrap().id, current.id);
    }

    #[test]
    fn test_repeat_playlist_wraps() {
        let mut list = TrackList::new(tracks(2));
        list.set_repeat(RepeatMode::Playlist, None);
        let first = list.current().unwrap();

        list.move_to_next().unwrap();
        let wrapped = list.move_to_next().unwrap();
        assert_eq!(wrapped.id, first.id);
        assert!(list.has_previous());
    }

    #[test]
    fn test_repeat_count_bounds_wrapping() {
        let mut list = TrackList::new(tracks(2));
        list.set_repeat(RepeatMode::Playlist, Some(2));

        // First cycle
        list.move_to_next().unwrap();
        // Wrap into second (final) cycle
        assert!(list.move_to_next().is_some());
        list.move_to_next().unwrap();
        // No third cycle
        assert!(list.move_to_next().is_none());
    }

    #[test]
    fn test_move_to_bounds() {
        let mut list = TrackList::new(tracks(2));
        assert!(list.move_to(1).is_ok());
        assert!(matches!(
            list.move_to(5),
            Err(EngineError::InvalidPlaylistIndex { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_empty_list() {
        let mut list = TrackList::default();
        assert!(list.current().is_none());
        assert!(!list.has_next());
        assert!(list.move_to_next().is_none());
    }
}
