mod clock;
mod scheduler;
mod sustain;
mod timeline;

pub use clock::{Clock, ManualClock, PlaybackClock, SystemClock};
pub use scheduler::{
    DEFAULT_LOOKAHEAD_INTERVAL, DEFAULT_SCHEDULE_AHEAD, PlaybackState, Scheduler,
    SchedulerConfig, Tick,
};
pub use sustain::{ActiveNotes, SustainController};
pub use timeline::{SUSTAIN_CONTROLLER, Timeline, TimelineOptions};
