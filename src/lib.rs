pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod queue;
pub mod timing;

pub use config::Config;
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{Error, Result, SinkError};
pub use events::{Event, Notification, ScheduledEvent};
pub use library::{Catalog, FileLoader, ParsedMidi, Playlist, TrackLoader};
pub use queue::{Direction, Queue, Track};
pub use timing::{PlaybackState, Scheduler, Timeline};
