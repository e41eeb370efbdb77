use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Monotonic time source in seconds.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Virtual time for tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    pub fn set(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// Maps wall-clock time to a logical playback position.
///
/// While playing the position is derived from `origin` on every read and
/// never stored, so repeated reads don't accumulate drift. `playhead` is
/// only meaningful while paused.
pub struct PlaybackClock {
    source: Box<dyn Clock>,
    playing: bool,
    origin: f64,
    playhead: f64,
}

impl PlaybackClock {
    pub fn new(source: Box<dyn Clock>) -> Self {
        Self {
            source,
            playing: false,
            origin: 0.0,
            playhead: 0.0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Returns false if the clock was already running.
    pub fn start(&mut self) -> bool {
        if self.playing {
            return false;
        }
        self.origin = self.source.now() - self.playhead;
        self.playing = true;
        true
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.playhead = self.source.now() - self.origin;
        self.playing = false;
    }

    pub fn seek(&mut self, position: f64) {
        self.playhead = position;
        if self.playing {
            self.origin = self.source.now() - position;
        }
    }

    pub fn position(&self) -> f64 {
        if self.playing {
            self.source.now() - self.origin
        } else {
            self.playhead
        }
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("playing", &self.playing)
            .field("position", &self.position())
            .finish()
    }
}
