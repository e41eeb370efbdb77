//! Track queue
//!
//! Ordered or shuffled walk through a list of tracks. The queue only decides
//! *which* track plays; the engine fetches and installs it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{Notification, Notifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    /// Where the loader fetches the parsed track from
    pub url: String,
}

impl Track {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Every method that returns `Some(track)` has made that track current and
/// expects the caller to start loading it.
pub struct Queue {
    tracks: Vec<Track>,
    current_index: usize,
    shuffle: bool,
    /// Cleared by an explicit stop so a track ending doesn't auto-advance
    playing: bool,
    rng: StdRng,
    notifier: Notifier,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_rng(&mut rand::rng()))
    }

    /// Deterministic shuffle order.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current_index: 0,
            shuffle: false,
            playing: false,
            rng,
            notifier: Notifier::new(),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.notifier.subscribe(listener);
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The track an ordered `advance(Next)` would pick. None under shuffle,
    /// where the next pick is random.
    pub fn next_track(&self) -> Option<&Track> {
        if self.shuffle || self.tracks.is_empty() {
            return None;
        }
        self.tracks.get((self.current_index + 1) % self.tracks.len())
    }

    /// Replaces the whole queue.
    pub fn load(&mut self, tracks: Vec<Track>, play_immediately: bool) -> Option<Track> {
        if tracks.is_empty() {
            warn!("Ignoring queue load: no tracks");
            return None;
        }
        info!(tracks = tracks.len(), shuffle = self.shuffle, "Queue loaded");
        self.tracks = tracks;
        self.current_index = 0;
        self.emit_updated();

        if !play_immediately {
            self.playing = false;
            return None;
        }
        if self.shuffle {
            self.current_index = self.random_index();
        }
        self.start_current()
    }

    pub fn advance(&mut self, direction: Direction) -> Option<Track> {
        if self.tracks.is_empty() {
            warn!(?direction, "Ignoring advance: queue is empty");
            return None;
        }
        let len = self.tracks.len();
        self.current_index = if self.shuffle {
            // May pick the current track again.
            self.random_index()
        } else {
            match direction {
                Direction::Next => (self.current_index + 1) % len,
                Direction::Previous => (self.current_index + len - 1) % len,
            }
        };
        self.start_current()
    }

    /// Inserts `tracks` right after the current one and jumps to the first
    /// of them.
    pub fn enqueue_next(&mut self, tracks: Vec<Track>) -> Option<Track> {
        if tracks.is_empty() {
            warn!("Ignoring enqueue: no tracks");
            return None;
        }
        let at = if self.tracks.is_empty() {
            0
        } else {
            self.current_index + 1
        };
        debug!(count = tracks.len(), at, "Enqueueing next");
        self.tracks.splice(at..at, tracks);
        self.emit_updated();

        self.current_index = at;
        self.start_current()
    }

    /// Adds `tracks` to the end. An empty queue starts playing the first of
    /// them; otherwise only listeners hear about it.
    pub fn append(&mut self, tracks: Vec<Track>) -> Option<Track> {
        if tracks.is_empty() {
            warn!("Ignoring append: no tracks");
            return None;
        }
        let was_empty = self.tracks.is_empty();
        let previous_next = self.next_track().cloned();
        debug!(count = tracks.len(), "Appending to queue");
        self.tracks.extend(tracks);

        if was_empty {
            self.current_index = 0;
            self.emit_updated();
            return self.start_current();
        }

        self.emit_updated();
        if self.next_track() != previous_next.as_ref() {
            self.emit_changed();
        }
        None
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        info!(shuffle = self.shuffle, "Shuffle toggled");
        if !self.tracks.is_empty() {
            self.emit_changed();
        }
        self.shuffle
    }

    pub fn play_index(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            warn!(index, len = self.tracks.len(), "Ignoring play_index: out of range");
            return None;
        }
        self.current_index = index;
        self.start_current()
    }

    /// Resumes auto-advance after [`Queue::stop`].
    pub fn resume(&mut self) {
        if !self.tracks.is_empty() {
            self.playing = true;
        }
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// The scheduler ran out of events. Advances only while playing.
    pub fn on_track_ended(&mut self) -> Option<Track> {
        if !self.playing {
            debug!("Track ended while stopped; not advancing");
            return None;
        }
        self.advance(Direction::Next)
    }

    fn random_index(&mut self) -> usize {
        self.rng.random_range(0..self.tracks.len())
    }

    fn start_current(&mut self) -> Option<Track> {
        let track = self.tracks.get(self.current_index)?.clone();
        self.playing = true;
        info!(index = self.current_index, title = %track.title, "Track changed");
        self.emit_changed();
        Some(track)
    }

    fn emit_updated(&mut self) {
        self.notifier.emit(Notification::QueueUpdated {
            tracks: self.tracks.clone(),
            current_index: self.current_index,
        });
    }

    fn emit_changed(&mut self) {
        if let Some(track) = self.current().cloned() {
            let next_track = self.next_track().cloned();
            self.notifier
                .emit(Notification::TrackChanged { track, next_track });
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("tracks", &self.tracks.len())
            .field("current_index", &self.current_index)
            .field("shuffle", &self.shuffle)
            .field("playing", &self.playing)
            .finish()
    }
}
