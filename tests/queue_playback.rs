//! Queue and scheduler wired together the way the engine wires them: a
//! finished tick asks the queue for the next track and the result is
//! loaded straight back into the scheduler.

use std::sync::Arc;

use parking_lot::Mutex;

use pianola::audio::{NullSink, RecordingSink, SinkCall};
use pianola::events::ScheduledEvent;
use pianola::queue::{Direction, Queue, Track};
use pianola::timing::{ManualClock, PlaybackState, Scheduler, SchedulerConfig, Tick, Timeline};
use pianola::{Notification, TrackLoader};

/// Each track is a single one-second note at the pitch in its url.
struct PitchLoader;

impl TrackLoader for PitchLoader {
    fn load(&self, track: &Track) -> pianola::Result<Timeline> {
        let pitch: u8 = track.url.parse().map_err(|_| pianola::Error::Load {
            url: track.url.clone(),
            reason: "unknown track".into(),
        })?;
        Ok(Timeline::from_events(vec![
            ScheduledEvent::note_on(0.0, pitch, 100),
            ScheduledEvent::note_off(1.0, pitch),
        ]))
    }
}

struct Jukebox {
    time: ManualClock,
    scheduler: Scheduler,
    queue: Queue,
    played: Vec<String>,
}

impl Jukebox {
    fn new(queue: Queue) -> Self {
        let time = ManualClock::new();
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), Box::new(time.clone()));
        scheduler.set_sink(Box::new(NullSink));
        Self {
            time,
            scheduler,
            queue,
            played: Vec::new(),
        }
    }

    fn start(&mut self, track: Option<Track>) {
        let Some(track) = track else { return };
        let timeline = PitchLoader.load(&track).unwrap();
        self.scheduler.load(timeline);
        self.scheduler.play();
        self.played.push(track.url);
    }

    /// Runs until the scheduler stops producing ticks, handing track ends
    /// to the queue, for at most `tracks` track changes.
    fn run(&mut self, tracks: usize) {
        let limit = self.played.len() + tracks;
        for _ in 0..100_000 {
            match self.scheduler.tick() {
                Tick::Continue(step) => self.time.advance(step.as_secs_f64()),
                Tick::Finished => {
                    if self.played.len() >= limit {
                        return;
                    }
                    let next = self.queue.on_track_ended();
                    if next.is_none() {
                        return;
                    }
                    self.start(next);
                }
                Tick::Idle => return,
            }
        }
        panic!("jukebox never settled");
    }
}

fn tracks(urls: &[&str]) -> Vec<Track> {
    urls.iter()
        .map(|url| Track::new(format!("Track {url}"), *url))
        .collect()
}

#[test]
fn ordered_queue_auto_advances_and_wraps() {
    let mut jukebox = Jukebox::new(Queue::with_seed(3));
    let first = jukebox.queue.load(tracks(&["60", "62", "64"]), true);
    jukebox.start(first);
    jukebox.run(3);

    assert_eq!(jukebox.played, ["60", "62", "64", "60"]);
    assert_eq!(jukebox.queue.current_index(), 0);
    assert_eq!(jukebox.scheduler.state(), PlaybackState::Finished);
}

#[test]
fn previous_from_first_track_wraps_to_last() {
    let mut queue = Queue::with_seed(3);
    queue.load(tracks(&["60", "62", "64"]), true);
    assert_eq!(queue.advance(Direction::Previous).unwrap().url, "64");
    assert_eq!(queue.current_index(), 2);
    assert_eq!(queue.advance(Direction::Next).unwrap().url, "60");
}

#[test]
fn stopped_queue_does_not_advance_on_track_end() {
    let mut jukebox = Jukebox::new(Queue::with_seed(3));
    let first = jukebox.queue.load(tracks(&["60", "62"]), true);
    jukebox.start(first);
    jukebox.queue.stop();
    jukebox.run(5);

    assert_eq!(jukebox.played, ["60"]);
    assert_eq!(jukebox.scheduler.state(), PlaybackState::Finished);
}

#[test]
fn shuffled_queue_keeps_playing_valid_tracks() {
    let mut queue = Queue::with_seed(11);
    queue.toggle_shuffle();
    let mut jukebox = Jukebox::new(queue);
    let first = jukebox.queue.load(tracks(&["60", "62", "64", "65"]), true);
    jukebox.start(first);
    jukebox.run(12);

    assert_eq!(jukebox.played.len(), 13);
    assert!(
        jukebox
            .played
            .iter()
            .all(|url| ["60", "62", "64", "65"].contains(&url.as_str()))
    );
}

#[test]
fn enqueue_next_interrupts_with_the_inserted_track() {
    let time = ManualClock::new();
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), Box::new(time.clone()));
    let sink = RecordingSink::new("recording");
    let calls = sink.log();
    scheduler.set_sink(Box::new(sink));

    let mut queue = Queue::with_seed(3);
    let changes = Arc::new(Mutex::new(Vec::new()));
    let seen = changes.clone();
    queue.subscribe(move |n| {
        if let Notification::TrackChanged { track, .. } = n {
            seen.lock().push(track.url.clone());
        }
    });

    let first = queue.load(tracks(&["60", "62"]), true).unwrap();
    scheduler.load(PitchLoader.load(&first).unwrap());
    scheduler.play();
    scheduler.tick();

    let inserted = queue.enqueue_next(tracks(&["72"])).unwrap();
    scheduler.load(PitchLoader.load(&inserted).unwrap());
    scheduler.play();
    scheduler.tick();

    // Loading over a sounding track silenced it before the new note.
    let calls = calls.lock().clone();
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[0], SinkCall::NoteOn { pitch: 60, .. }));
    assert!(matches!(calls[1], SinkCall::NoteOff { pitch: 60, delay } if delay == 0.0));
    assert!(matches!(calls[2], SinkCall::NoteOn { pitch: 72, .. }));

    assert_eq!(*changes.lock(), ["60", "72"]);
    let urls: Vec<_> = queue.tracks().iter().map(|t| t.url.as_str()).collect();
    assert_eq!(urls, ["60", "72", "62"]);
}

#[test]
fn loader_failure_leaves_current_timeline() {
    let time = ManualClock::new();
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), Box::new(time));
    scheduler.set_sink(Box::new(NullSink));
    scheduler.load(PitchLoader.load(&Track::new("ok", "60")).unwrap());

    let result = PitchLoader.load(&Track::new("broken", "not-a-track"));
    assert!(matches!(result, Err(pianola::Error::Load { .. })));
    assert_eq!(scheduler.state(), PlaybackState::Loaded);
    assert_eq!(scheduler.timeline().len(), 2);
}
