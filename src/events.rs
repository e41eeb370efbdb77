use crate::queue::Track;

/// An event on a track's timeline, positioned in seconds from track start.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub time: f64,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NoteOn {
        pitch: u8,
        velocity: u8,
        /// Seconds until the matching note-off, when the parser knew it
        duration: Option<f64>,
    },
    NoteOff {
        pitch: u8,
    },
    ControlChange {
        controller: u8,
        value: u8,
    },
}

impl ScheduledEvent {
    pub fn note_on(time: f64, pitch: u8, velocity: u8) -> Self {
        Self {
            time,
            event: Event::NoteOn {
                pitch,
                velocity,
                duration: None,
            },
        }
    }

    pub fn note_off(time: f64, pitch: u8) -> Self {
        Self {
            time,
            event: Event::NoteOff { pitch },
        }
    }

    pub fn control_change(time: f64, controller: u8, value: u8) -> Self {
        Self {
            time,
            event: Event::ControlChange { controller, value },
        }
    }
}

/// Signals emitted by the scheduler and the queue for UI and visualisation.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Velocity is the value actually sent to the sink, after volume scaling
    NoteStarted {
        pitch: u8,
        velocity: u8,
        duration: Option<f64>,
    },
    ControlChanged {
        controller: u8,
        value: u8,
    },
    TrackEnded,
    QueueUpdated {
        tracks: Vec<Track>,
        current_index: usize,
    },
    TrackChanged {
        track: Track,
        next_track: Option<Track>,
    },
}

type Listener = Box<dyn FnMut(&Notification) + Send>;

/// Typed callback registry. Listeners run synchronously on the thread that
/// emits, in subscription order.
#[derive(Default)]
pub struct Notifier {
    listeners: Vec<Listener>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&mut self, notification: Notification) {
        for listener in &mut self.listeners {
            listener(&notification);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
