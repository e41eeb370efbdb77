use std::time::Duration;

use tracing::{debug, info, warn};

use super::clock::{Clock, PlaybackClock};
use super::sustain::{ActiveNotes, SustainController};
use super::timeline::{SUSTAIN_CONTROLLER, Timeline};
use crate::audio::{NoteTiming, OutputSink, SinkCapabilities, Volume};
use crate::error::SinkError;
use crate::events::{Event, Notification, Notifier};

pub const DEFAULT_LOOKAHEAD_INTERVAL: Duration = Duration::from_millis(25);
pub const DEFAULT_SCHEDULE_AHEAD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Paused,
    Finished,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loaded => write!(f, "loaded"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Finished => write!(f, "finished"),
        }
    }
}

/// What the owner of the scheduler should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Not playing; nothing was dispatched and no further tick is needed
    Idle,
    /// Call `tick` again after this long
    Continue(Duration),
    /// The timeline ran out during this tick
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub lookahead_interval: Duration,
    /// Events closer than this many seconds to the playhead are handed to
    /// the sink early, with a delay
    pub schedule_ahead: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_interval: DEFAULT_LOOKAHEAD_INTERVAL,
            schedule_ahead: DEFAULT_SCHEDULE_AHEAD,
        }
    }
}

/// Lookahead dispatcher for one track at a time.
///
/// The scheduler never sleeps. Its owner calls [`Scheduler::tick`] whenever
/// the previous tick asked for it; each tick hands every event due within
/// the schedule-ahead window to the sink along with a delay, so the sink
/// can place it precisely while the polling stays coarse.
///
/// Every interruption (pause, stop, seek, sink switch, reload while
/// playing) first silences the sink so no note is left hanging.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: PlaybackClock,
    timeline: Timeline,
    cursor: usize,
    /// Timeline time of the last event handed to the sink
    dispatched_until: f64,
    state: PlaybackState,
    sink: Option<Box<dyn OutputSink>>,
    capabilities: SinkCapabilities,
    active: ActiveNotes,
    sustain: SustainController,
    volume: Volume,
    notifier: Notifier,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            clock: PlaybackClock::new(clock),
            timeline: Timeline::empty(),
            cursor: 0,
            dispatched_until: 0.0,
            state: PlaybackState::Idle,
            sink: None,
            capabilities: SinkCapabilities::default(),
            active: ActiveNotes::default(),
            sustain: SustainController::default(),
            volume: Volume::default(),
            notifier: Notifier::new(),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.notifier.subscribe(listener);
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    pub fn duration(&self) -> f64 {
        self.timeline.duration()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Index of the next event to dispatch.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    pub fn active_notes(&self) -> &ActiveNotes {
        &self.active
    }

    pub fn sustained_notes(&self) -> &[u8] {
        self.sustain.deferred()
    }

    pub fn sink_name(&self) -> Option<&str> {
        self.sink.as_deref().map(|s| s.name())
    }

    /// Installs a new timeline, rewound to the start. A track that is still
    /// sounding is silenced first.
    pub fn load(&mut self, timeline: Timeline) {
        if self.state == PlaybackState::Playing {
            self.silence();
        } else {
            self.active.drain();
            self.sustain.reset();
        }
        self.clock.pause();
        self.clock.seek(0.0);
        self.cursor = 0;
        self.dispatched_until = 0.0;
        info!(
            events = timeline.len(),
            duration = timeline.duration(),
            "Loaded timeline"
        );
        self.timeline = timeline;
        self.state = PlaybackState::Loaded;
    }

    /// Starts or resumes playback. Returns false when there is nothing to
    /// play, no sink, or playback is already running.
    pub fn play(&mut self) -> bool {
        if self.sink.is_none() {
            warn!("Ignoring play: no output sink attached");
            return false;
        }
        if self.timeline.is_empty() {
            warn!("Ignoring play: nothing loaded");
            return false;
        }
        match self.state {
            PlaybackState::Playing => return false,
            PlaybackState::Finished => {
                self.clock.seek(0.0);
                self.cursor = 0;
            }
            _ => {}
        }

        self.clock.start();
        self.state = PlaybackState::Playing;
        debug!(position = self.clock.position(), "Playback started");
        true
    }

    /// Freezes the position and silences the sink.
    ///
    /// A sink with the panic capability drops the events it was handed
    /// ahead of time, so the cursor is re-anchored at the paused position
    /// for the resume. Any other sink still plays them, and the cursor
    /// stays put so they are not sent twice.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.silence();
        self.clock.pause();
        if self.capabilities.panic {
            self.cursor = self.timeline.first_at_or_after(self.clock.position());
        }
        self.state = PlaybackState::Paused;
        debug!(position = self.clock.position(), "Playback paused");
    }

    pub fn stop(&mut self) {
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.silence();
        }
        self.clock.pause();
        self.clock.seek(0.0);
        self.cursor = 0;
        self.state = PlaybackState::Idle;
        debug!("Playback stopped");
    }

    /// Moves the playhead. Notes that started before `seconds` and are
    /// still meant to be sounding there are not re-struck.
    pub fn jump_to(&mut self, seconds: f64) {
        let target = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };

        self.silence();
        self.clock.seek(target);
        self.cursor = self.timeline.first_at_or_after(target);

        if self.state != PlaybackState::Playing {
            self.state = if target == 0.0 {
                PlaybackState::Idle
            } else {
                PlaybackState::Paused
            };
        }
        debug!(position = target, cursor = self.cursor, "Jumped");
    }

    pub fn set_volume(&mut self, level: u8) {
        self.volume = Volume::new(level);
        debug!(level = self.volume.level(), "Volume changed");
    }

    /// Swaps the output backend, silencing the outgoing one first. Returns
    /// the previous sink.
    pub fn set_sink(&mut self, sink: Box<dyn OutputSink>) -> Option<Box<dyn OutputSink>> {
        self.silence();
        let capabilities = sink.capabilities();
        info!(sink = sink.name(), ?capabilities, "Attached output sink");
        self.capabilities = capabilities;
        self.sink.replace(sink)
    }

    pub fn take_sink(&mut self) -> Option<Box<dyn OutputSink>> {
        self.silence();
        self.capabilities = SinkCapabilities::default();
        self.sink.take()
    }

    /// Dispatches everything due inside the schedule-ahead window.
    ///
    /// A tick that fires after a pause or stop finds the scheduler not
    /// playing and returns [`Tick::Idle`] without touching the sink.
    pub fn tick(&mut self) -> Tick {
        if self.state != PlaybackState::Playing {
            return Tick::Idle;
        }

        let elapsed = self.clock.position();
        let horizon = elapsed + self.config.schedule_ahead;

        while let Some(scheduled) = self.timeline.get(self.cursor) {
            if scheduled.time >= horizon {
                break;
            }
            let time = scheduled.time;
            let event = scheduled.event.clone();
            self.dispatch(&event, (time - elapsed).max(0.0));
            self.dispatched_until = time;
            self.cursor += 1;
        }

        if self.cursor < self.timeline.len() {
            Tick::Continue(self.config.lookahead_interval)
        } else {
            self.finish(elapsed);
            Tick::Finished
        }
    }

    fn dispatch(&mut self, event: &Event, delay: f64) {
        match *event {
            Event::NoteOn {
                pitch,
                velocity,
                duration,
            } => {
                self.sustain.cancel(pitch);
                if self.active.insert(pitch) {
                    // Struck again before its release: the old strike ends
                    // where the new one begins.
                    self.send("note off", |sink| sink.note_off(pitch, delay));
                }
                let velocity = self.volume.scale(velocity);
                self.send("note on", |sink| {
                    sink.note_on(pitch, velocity, NoteTiming { delay, duration })
                });
                self.notifier.emit(Notification::NoteStarted {
                    pitch,
                    velocity,
                    duration,
                });
            }
            Event::NoteOff { pitch } => {
                match self.active.remove(pitch) {
                    Some(0) => {}
                    Some(left) => {
                        debug!(pitch, left, "Note-off for an earlier strike");
                        return;
                    }
                    None => {
                        debug!(pitch, "Note-off for a note that isn't sounding");
                        return;
                    }
                }
                if self.sustain.is_held() {
                    self.sustain.defer(pitch);
                } else {
                    self.send("note off", |sink| sink.note_off(pitch, delay));
                }
            }
            Event::ControlChange {
                controller: SUSTAIN_CONTROLLER,
                value,
            } => {
                for pitch in self.sustain.apply(value) {
                    self.send("note off", |sink| sink.note_off(pitch, delay));
                }
                self.notifier.emit(Notification::ControlChanged {
                    controller: SUSTAIN_CONTROLLER,
                    value,
                });
            }
            Event::ControlChange { controller, value } => {
                if self.capabilities.control_change {
                    self.send("control change", |sink| {
                        sink.control_change(controller, value, delay)
                    });
                }
                self.notifier
                    .emit(Notification::ControlChanged { controller, value });
            }
        }
    }

    /// Releases whatever the track left behind (pedal still down, notes
    /// without a note-off) at the time of the last event, then signals the
    /// end of the track.
    fn finish(&mut self, elapsed: f64) {
        let tail = (self.timeline.duration() - elapsed).max(0.0);
        let mut leftover = self.sustain.reset();
        for pitch in self.active.drain() {
            if !leftover.contains(&pitch) {
                leftover.push(pitch);
            }
        }
        for pitch in leftover {
            self.send("note off", |sink| sink.note_off(pitch, tail));
        }

        self.clock.pause();
        self.dispatched_until = 0.0;
        self.state = PlaybackState::Finished;
        info!("Track finished");
        self.notifier.emit(Notification::TrackEnded);
    }

    /// Panic clear: every sounding or pedal-held note gets a note-off,
    /// then the sink is told to drop sustain and anything it still has
    /// queued.
    ///
    /// A sink without panic keeps the note-ons it was handed ahead of
    /// time, so its note-offs are placed after the last of them instead
    /// of immediately.
    fn silence(&mut self) {
        let mut released = self.active.drain();
        for pitch in self.sustain.reset() {
            if !released.contains(&pitch) {
                released.push(pitch);
            }
        }
        let delay = if self.capabilities.panic {
            0.0
        } else {
            (self.dispatched_until - self.clock.position()).max(0.0)
        };
        self.dispatched_until = 0.0;
        if self.sink.is_none() {
            return;
        }

        for pitch in released {
            self.send("note off", |sink| sink.note_off(pitch, delay));
        }
        if self.capabilities.control_change {
            self.send("sustain off", |sink| {
                sink.control_change(SUSTAIN_CONTROLLER, 0, 0.0)
            });
        }
        if self.capabilities.panic {
            self.send("panic", |sink| sink.panic());
        }
    }

    fn send<F>(&mut self, what: &'static str, op: F)
    where
        F: FnOnce(&mut dyn OutputSink) -> Result<(), SinkError>,
    {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(e) = op(&mut *sink) {
                warn!(sink = sink.name(), error = %e, "Sink {} failed", what);
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("clock", &self.clock)
            .field("cursor", &self.cursor)
            .field("events", &self.timeline.len())
            .field("sink", &self.sink_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingSink, SinkCall};
    use crate::events::ScheduledEvent;
    use crate::timing::ManualClock;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Rig {
        time: ManualClock,
        scheduler: Scheduler,
        calls: Arc<Mutex<Vec<SinkCall>>>,
    }

    fn rig(capabilities: SinkCapabilities, events: Vec<ScheduledEvent>) -> Rig {
        let time = ManualClock::new();
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), Box::new(time.clone()));
        let sink = RecordingSink::with_capabilities("rec", capabilities);
        let calls = sink.log();
        scheduler.set_sink(Box::new(sink));
        scheduler.load(Timeline::from_events(events));
        Rig {
            time,
            scheduler,
            calls,
        }
    }

    fn run_until_done(rig: &mut Rig) {
        for _ in 0..10_000 {
            match rig.scheduler.tick() {
                Tick::Continue(step) => rig.time.advance(step.as_secs_f64()),
                _ => return,
            }
        }
        panic!("scheduler never finished");
    }

    #[test]
    fn play_without_sink_is_ignored() {
        let time = ManualClock::new();
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), Box::new(time));
        scheduler.load(Timeline::from_events(vec![ScheduledEvent::note_on(0.0, 60, 100)]));
        assert!(!scheduler.play());
        assert_eq!(scheduler.state(), PlaybackState::Loaded);
        assert_eq!(scheduler.tick(), Tick::Idle);
    }

    #[test]
    fn play_on_empty_timeline_is_ignored() {
        let mut rig = rig(SinkCapabilities::default(), vec![]);
        assert!(!rig.scheduler.play());
        assert_eq!(rig.scheduler.tick(), Tick::Idle);
    }

    #[test]
    fn dispatches_window_with_delays() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::note_on(0.05, 64, 100),
                ScheduledEvent::note_on(0.2, 67, 100),
            ],
        );
        assert!(rig.scheduler.play());
        assert_eq!(rig.scheduler.tick(), Tick::Continue(DEFAULT_LOOKAHEAD_INTERVAL));

        let calls = rig.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        match &calls[1] {
            SinkCall::NoteOn { pitch, timing, .. } => {
                assert_eq!(*pitch, 64);
                assert_relative_eq!(timing.delay, 0.05);
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(rig.scheduler.cursor(), 2);
    }

    #[test]
    fn volume_scales_dispatched_velocity_only() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![ScheduledEvent::note_on(0.0, 60, 100)],
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        rig.scheduler.subscribe(move |n| sink_seen.lock().push(n.clone()));

        rig.scheduler.set_volume(6);
        rig.scheduler.play();
        rig.scheduler.tick();

        assert!(matches!(
            rig.calls.lock()[0],
            SinkCall::NoteOn { velocity: 50, .. }
        ));
        assert!(matches!(
            seen.lock()[0],
            Notification::NoteStarted { velocity: 50, .. }
        ));
        assert_eq!(
            rig.scheduler.timeline().events()[0].event,
            Event::NoteOn {
                pitch: 60,
                velocity: 100,
                duration: None
            }
        );
    }

    #[test]
    fn sustain_defers_note_off_until_pedal_up() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::control_change(0.1, 64, 127),
                ScheduledEvent::note_off(0.3, 60),
                ScheduledEvent::control_change(0.6, 64, 0),
                ScheduledEvent::note_on(1.0, 72, 100),
            ],
        );
        rig.scheduler.play();
        run_until_done(&mut rig);

        let calls = rig.calls.lock().clone();
        let note_offs: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, SinkCall::NoteOff { pitch: 60, .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(note_offs.len(), 1);

        // The release goes out in the tick that reaches the pedal-up event,
        // after the note-on for 60 and before the note-on for 72.
        let last_on = calls
            .iter()
            .position(|c| matches!(c, SinkCall::NoteOn { pitch: 72, .. }))
            .unwrap();
        assert!(note_offs[0] < last_on);
    }

    #[test]
    fn pause_silences_and_resumes_from_paused_position() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::note_off(1.0, 60),
                ScheduledEvent::note_on(2.0, 62, 100),
                ScheduledEvent::note_off(3.0, 62),
            ],
        );
        rig.scheduler.play();
        rig.scheduler.tick();
        rig.time.advance(0.5);
        rig.scheduler.tick();
        rig.scheduler.pause();

        assert_eq!(rig.scheduler.state(), PlaybackState::Paused);
        assert_relative_eq!(rig.scheduler.position(), 0.5);
        assert!(rig.scheduler.active_notes().is_empty());
        assert!(matches!(
            rig.calls.lock().last(),
            Some(SinkCall::NoteOff { pitch: 60, delay }) if *delay == 0.0
        ));

        rig.time.advance(30.0);
        assert_relative_eq!(rig.scheduler.position(), 0.5);

        rig.scheduler.play();
        assert_relative_eq!(rig.scheduler.position(), 0.5);
        assert_eq!(rig.scheduler.cursor(), 1);
    }

    #[test]
    fn pause_keeps_cursor_for_sinks_without_panic() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![ScheduledEvent::note_on(0.05, 60, 100), ScheduledEvent::note_off(1.0, 60)],
        );
        rig.scheduler.play();
        rig.scheduler.tick();
        assert_eq!(rig.scheduler.cursor(), 1);

        rig.scheduler.pause();
        assert_eq!(rig.scheduler.cursor(), 1);
        rig.scheduler.play();
        run_until_done(&mut rig);

        // The release lands with the note-on the sink still holds, and the
        // note is never struck twice.
        let calls = rig.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        match (&calls[0], &calls[1]) {
            (SinkCall::NoteOn { pitch: 60, timing, .. }, SinkCall::NoteOff { pitch: 60, delay }) => {
                assert_relative_eq!(timing.delay, 0.05);
                assert_relative_eq!(*delay, 0.05);
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[test]
    fn pause_rewinds_for_panic_capable_sinks() {
        let mut rig = rig(
            SinkCapabilities {
                control_change: false,
                panic: true,
            },
            vec![ScheduledEvent::note_on(0.05, 60, 100), ScheduledEvent::note_off(1.0, 60)],
        );
        rig.scheduler.play();
        rig.scheduler.tick();
        rig.scheduler.pause();
        assert_eq!(rig.scheduler.cursor(), 0);

        rig.scheduler.play();
        rig.scheduler.tick();
        let calls = rig.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                SinkCall::NoteOn {
                    pitch: 60,
                    velocity: 100,
                    timing: NoteTiming {
                        delay: 0.05,
                        duration: None
                    }
                },
                SinkCall::NoteOff {
                    pitch: 60,
                    delay: 0.0
                },
                SinkCall::Panic,
                SinkCall::NoteOn {
                    pitch: 60,
                    velocity: 100,
                    timing: NoteTiming {
                        delay: 0.05,
                        duration: None
                    }
                },
            ]
        );
    }

    #[test]
    fn restrike_sharing_a_release_time_keeps_the_new_note() {
        // The second strike sorts ahead of the first strike's note-off.
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(1.0, 60, 90),
                ScheduledEvent::note_off(2.0, 60),
                ScheduledEvent::note_on(0.0, 60, 80),
                ScheduledEvent::note_off(1.0, 60),
            ],
        );
        rig.scheduler.play();
        run_until_done(&mut rig);

        let calls = rig.calls.lock().clone();
        let kinds: Vec<&str> = calls
            .iter()
            .map(|c| match c {
                SinkCall::NoteOn { pitch: 60, .. } => "on",
                SinkCall::NoteOff { pitch: 60, .. } => "off",
                other => panic!("unexpected call {other:?}"),
            })
            .collect();
        assert_eq!(kinds, ["on", "off", "on", "off"]);

        // The old strike is cut exactly where the new one starts.
        match (&calls[1], &calls[2]) {
            (SinkCall::NoteOff { delay, .. }, SinkCall::NoteOn { timing, .. }) => {
                assert_relative_eq!(*delay, timing.delay);
            }
            other => panic!("unexpected calls {other:?}"),
        }
        assert!(rig.scheduler.active_notes().is_empty());
    }

    #[test]
    fn stop_clears_state_and_stale_ticks_do_nothing() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::control_change(0.01, 64, 127),
                ScheduledEvent::note_on(0.02, 62, 100),
                ScheduledEvent::note_off(0.03, 62),
                ScheduledEvent::note_off(5.0, 60),
            ],
        );
        rig.scheduler.play();
        rig.scheduler.tick();
        assert_eq!(rig.scheduler.sustained_notes(), &[62]);
        assert!(rig.scheduler.active_notes().contains(60));

        rig.scheduler.stop();
        assert!(rig.scheduler.active_notes().is_empty());
        assert!(rig.scheduler.sustained_notes().is_empty());
        assert_eq!(rig.scheduler.position(), 0.0);
        assert_eq!(rig.scheduler.state(), PlaybackState::Idle);

        let before = rig.calls.lock().len();
        rig.time.advance(1.0);
        assert_eq!(rig.scheduler.tick(), Tick::Idle);
        assert_eq!(rig.calls.lock().len(), before);
    }

    #[test]
    fn panic_capable_sink_gets_panic_and_sustain_off() {
        let mut rig = rig(
            SinkCapabilities {
                control_change: true,
                panic: true,
            },
            vec![ScheduledEvent::note_on(0.0, 60, 100), ScheduledEvent::note_off(2.0, 60)],
        );
        rig.scheduler.play();
        rig.scheduler.tick();
        rig.scheduler.stop();

        let calls = rig.calls.lock().clone();
        assert_eq!(
            &calls[1..],
            &[
                SinkCall::NoteOff {
                    pitch: 60,
                    delay: 0.0
                },
                SinkCall::ControlChange {
                    controller: 64,
                    value: 0,
                    delay: 0.0
                },
                SinkCall::Panic,
            ]
        );
    }

    #[test]
    fn jump_to_while_paused_sets_exact_position() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::note_on(1.0, 62, 100),
                ScheduledEvent::note_on(2.0, 64, 100),
            ],
        );
        rig.scheduler.jump_to(1.5);
        assert_eq!(rig.scheduler.position(), 1.5);
        assert_eq!(rig.scheduler.cursor(), 2);
        assert_eq!(rig.scheduler.state(), PlaybackState::Paused);

        rig.scheduler.jump_to(99.0);
        assert_eq!(rig.scheduler.cursor(), 3);

        rig.scheduler.jump_to(-4.0);
        assert_eq!(rig.scheduler.position(), 0.0);
        assert_eq!(rig.scheduler.state(), PlaybackState::Idle);
    }

    #[test]
    fn seek_into_a_note_never_strikes_it() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::note_off(2.0, 60),
                ScheduledEvent::note_on(3.0, 62, 100),
            ],
        );
        rig.scheduler.jump_to(1.0);
        rig.scheduler.play();
        run_until_done(&mut rig);

        let calls = rig.calls.lock().clone();
        assert!(!calls
            .iter()
            .any(|c| matches!(c, SinkCall::NoteOn { pitch: 60, .. } | SinkCall::NoteOff { pitch: 60, .. })));
        assert!(calls.iter().any(|c| matches!(c, SinkCall::NoteOn { pitch: 62, .. })));
    }

    #[test]
    fn switching_sinks_silences_the_outgoing_one() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![ScheduledEvent::note_on(0.0, 60, 100), ScheduledEvent::note_off(2.0, 60)],
        );
        rig.scheduler.play();
        rig.scheduler.tick();

        let replacement = RecordingSink::new("second");
        let second = replacement.log();
        let old = rig.scheduler.set_sink(Box::new(replacement));
        assert_eq!(old.map(|s| s.name().to_string()), Some("rec".to_string()));

        assert!(matches!(
            rig.calls.lock().last(),
            Some(SinkCall::NoteOff { pitch: 60, .. })
        ));
        assert!(second.lock().is_empty());
        assert_eq!(rig.scheduler.state(), PlaybackState::Playing);

        // The note-off at 2.0 has no sounding note left and is dropped.
        run_until_done(&mut rig);
        assert!(second.lock().is_empty());
    }

    #[test]
    fn finishing_emits_track_ended_once() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![ScheduledEvent::note_on(0.0, 60, 100), ScheduledEvent::note_off(0.05, 60)],
        );
        let ended = Arc::new(Mutex::new(0));
        let counter = ended.clone();
        rig.scheduler.subscribe(move |n| {
            if *n == Notification::TrackEnded {
                *counter.lock() += 1;
            }
        });

        rig.scheduler.play();
        assert_eq!(rig.scheduler.tick(), Tick::Finished);
        assert_eq!(rig.scheduler.state(), PlaybackState::Finished);
        assert_eq!(rig.scheduler.tick(), Tick::Idle);
        assert_eq!(*ended.lock(), 1);

        // Playing again from Finished starts over.
        assert!(rig.scheduler.play());
        assert_eq!(rig.scheduler.cursor(), 0);
        assert_eq!(rig.scheduler.tick(), Tick::Finished);
        assert_eq!(*ended.lock(), 2);
    }

    #[test]
    fn pedal_held_at_end_is_released() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![
                ScheduledEvent::control_change(0.0, 64, 127),
                ScheduledEvent::note_on(0.0, 60, 100),
                ScheduledEvent::note_off(0.05, 60),
            ],
        );
        rig.scheduler.play();
        assert_eq!(rig.scheduler.tick(), Tick::Finished);

        let calls = rig.calls.lock().clone();
        match calls.last() {
            Some(SinkCall::NoteOff { pitch: 60, delay }) => assert_relative_eq!(*delay, 0.05),
            other => panic!("expected a trailing note-off, got {other:?}"),
        }
        assert!(rig.scheduler.sustained_notes().is_empty());
    }

    #[test]
    fn stray_note_off_is_a_no_op() {
        let mut rig = rig(
            SinkCapabilities::default(),
            vec![ScheduledEvent::note_off(0.0, 60), ScheduledEvent::note_on(0.5, 62, 90)],
        );
        rig.scheduler.play();
        rig.scheduler.tick();
        assert!(rig.calls.lock().is_empty());
    }

    #[test]
    fn other_controllers_need_the_capability() {
        let events = vec![
            ScheduledEvent::control_change(0.0, 7, 100),
            ScheduledEvent::note_on(0.5, 60, 100),
        ];

        let mut plain = rig(SinkCapabilities::default(), events.clone());
        plain.scheduler.play();
        plain.scheduler.tick();
        assert!(plain.calls.lock().is_empty());

        let mut capable = rig(
            SinkCapabilities {
                control_change: true,
                panic: false,
            },
            events,
        );
        capable.scheduler.play();
        capable.scheduler.tick();
        assert_eq!(
            capable.calls.lock().as_slice(),
            &[SinkCall::ControlChange {
                controller: 7,
                value: 100,
                delay: 0.0
            }]
        );
    }
}
