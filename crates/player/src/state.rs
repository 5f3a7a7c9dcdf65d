use std::collections::VecDeque;

use tracing::debug;

use crate::types::Track;

pub const DEFAULT_VOLUME: u8 = 50;
pub const MAX_VOLUME: u8 = 100;
/// Tracks remembered for `play_previous`; the oldest are dropped first.
pub const HISTORY_LIMIT: usize = 50;

/// Local playback state. Mutations only touch this struct; issuing the
/// matching remote call is up to the caller.
#[derive(Debug, Clone)]
pub struct PlayerState {
    current_track: Option<Track>,
    is_playing: bool,
    volume: u8,
    progress_ms: u64,
    queue: VecDeque<Track>,
    history: VecDeque<Track>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            current_track: None,
            is_playing: false,
            volume: DEFAULT_VOLUME,
            progress_ms: 0,
            queue: VecDeque::new(),
            history: VecDeque::new(),
        }
    }
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_track.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn progress_ms(&self) -> u64 {
        self.progress_ms
    }

    pub fn queue(&self) -> impl Iterator<Item = &Track> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Replace the current track. The outgoing track is remembered for
    /// `play_previous`; progress restarts.
    pub fn set_current_track(&mut self, track: Option<Track>) {
        if let Some(previous) = self.current_track.take() {
            if self.history.len() == HISTORY_LIMIT {
                self.history.pop_front();
            }
            self.history.push_back(previous);
        }
        self.current_track = track;
        self.progress_ms = 0;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
    }

    /// Set volume in percent, clamped to `0..=100`.
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(MAX_VOLUME);
    }

    /// Seek position; clamped to the current track's duration.
    pub fn set_progress(&mut self, progress_ms: u64) {
        self.progress_ms = match &self.current_track {
            Some(track) => progress_ms.min(track.duration_ms),
            None => 0,
        };
    }

    pub fn add_to_queue(&mut self, track: Track) {
        debug!(track = %track.id, "queued track");
        self.queue.push_back(track);
    }

    /// Drop every queued entry with the given id.
    pub fn remove_from_queue(&mut self, track_id: &str) {
        self.queue.retain(|t| t.id != track_id);
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Advance to the head of the queue. Returns false when the queue is empty.
    pub fn play_next(&mut self) -> bool {
        let Some(next) = self.queue.pop_front() else {
            return false;
        };
        self.set_current_track(Some(next));
        true
    }

    /// Go back to the most recently played track, putting the current one
    /// back at the front of the queue. Returns false when there is no history.
    pub fn play_previous(&mut self) -> bool {
        let Some(previous) = self.history.pop_back() else {
            return false;
        };
        if let Some(current) = self.current_track.replace(previous) {
            self.queue.push_front(current);
        }
        self.progress_ms = 0;
        true
    }
}
