//! The engine thread.
//!
//! Scheduler and queue live on one thread and are only touched from there.
//! Callers talk to it through [`EngineCommand`]s and hear back through
//! [`EngineUpdate`]s. Between commands the thread sleeps until the next
//! scheduler tick is due.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, select};
use tracing::{debug, error, info, warn};

use crate::audio::OutputSink;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::Notification;
use crate::library::TrackLoader;
use crate::queue::{Direction, Queue, Track};
use crate::timing::{Clock, PlaybackState, Scheduler, Tick, Timeline};

const IDLE_WAIT: Duration = Duration::from_secs(3600);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

pub enum EngineCommand {
    LoadQueue {
        tracks: Vec<Track>,
        play_immediately: bool,
    },
    /// Installs an already-built timeline, bypassing the queue and loader
    LoadTimeline(Timeline),
    Play,
    Pause,
    Stop,
    JumpTo(f64),
    /// Relative seek from the current position
    SeekBy(f64),
    SetVolume(u8),
    SetSink(Box<dyn OutputSink>),
    Next,
    Previous,
    EnqueueNext(Vec<Track>),
    Append(Vec<Track>),
    ToggleShuffle,
    PlayIndex(usize),
    Shutdown,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::LoadQueue {
                tracks,
                play_immediately,
            } => f
                .debug_struct("LoadQueue")
                .field("tracks", &tracks.len())
                .field("play_immediately", play_immediately)
                .finish(),
            EngineCommand::LoadTimeline(timeline) => {
                f.debug_tuple("LoadTimeline").field(&timeline.len()).finish()
            }
            EngineCommand::Play => write!(f, "Play"),
            EngineCommand::Pause => write!(f, "Pause"),
            EngineCommand::Stop => write!(f, "Stop"),
            EngineCommand::JumpTo(t) => f.debug_tuple("JumpTo").field(t).finish(),
            EngineCommand::SeekBy(d) => f.debug_tuple("SeekBy").field(d).finish(),
            EngineCommand::SetVolume(v) => f.debug_tuple("SetVolume").field(v).finish(),
            EngineCommand::SetSink(sink) => f.debug_tuple("SetSink").field(&sink.name()).finish(),
            EngineCommand::Next => write!(f, "Next"),
            EngineCommand::Previous => write!(f, "Previous"),
            EngineCommand::EnqueueNext(t) => f.debug_tuple("EnqueueNext").field(&t.len()).finish(),
            EngineCommand::Append(t) => f.debug_tuple("Append").field(&t.len()).finish(),
            EngineCommand::ToggleShuffle => write!(f, "ToggleShuffle"),
            EngineCommand::PlayIndex(i) => f.debug_tuple("PlayIndex").field(i).finish(),
            EngineCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    Notification(Notification),
    PlaybackState {
        state: PlaybackState,
        position: f64,
        duration: f64,
    },
    Volume {
        level: u8,
    },
    Shuffle {
        enabled: bool,
    },
    Error {
        message: String,
    },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("Engine thread has exited");
        }
    }

    /// Stops playback, silences the sink and waits for the thread to exit.
    pub fn shutdown(mut self) {
        self.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_engine(
    config: &EngineConfig,
    loader: Arc<dyn TrackLoader>,
    clock: Box<dyn Clock>,
) -> Result<EngineHandle> {
    let (command_tx, command_rx) = channel::unbounded();
    let (update_tx, update_rx) = channel::unbounded();

    let mut scheduler = Scheduler::new(config.scheduler_config(), clock);
    scheduler.set_volume(config.initial_volume);
    let queue = Queue::new();

    let thread = std::thread::Builder::new()
        .name("pianola-engine".into())
        .spawn(move || {
            let state = EngineState::new(scheduler, queue, loader, update_tx);
            engine_thread(state, command_rx);
        })?;

    Ok(EngineHandle {
        command_tx,
        update_rx,
        thread: Some(thread),
    })
}

struct LoadResult {
    generation: u64,
    track: Track,
    result: Result<Timeline>,
}

struct EngineState {
    scheduler: Scheduler,
    queue: Queue,
    loader: Arc<dyn TrackLoader>,
    update_tx: Sender<EngineUpdate>,
    loaded_tx: Sender<LoadResult>,
    loaded_rx: Receiver<LoadResult>,
    /// Bumped on every track request; loads carrying an older number are stale
    generation: u64,
    play_when_loaded: bool,
    next_tick: Option<Instant>,
    last_progress: Instant,
}

impl EngineState {
    fn new(
        mut scheduler: Scheduler,
        mut queue: Queue,
        loader: Arc<dyn TrackLoader>,
        update_tx: Sender<EngineUpdate>,
    ) -> Self {
        let forward = update_tx.clone();
        scheduler.subscribe(move |n| {
            let _ = forward.send(EngineUpdate::Notification(n.clone()));
        });
        let forward = update_tx.clone();
        queue.subscribe(move |n| {
            let _ = forward.send(EngineUpdate::Notification(n.clone()));
        });

        let (loaded_tx, loaded_rx) = channel::unbounded();
        Self {
            scheduler,
            queue,
            loader,
            update_tx,
            loaded_tx,
            loaded_rx,
            generation: 0,
            play_when_loaded: false,
            next_tick: None,
            last_progress: Instant::now(),
        }
    }

    fn handle(&mut self, command: EngineCommand) {
        debug!(?command, "Engine command");
        match command {
            EngineCommand::LoadQueue {
                tracks,
                play_immediately,
            } => {
                let accepted = !tracks.is_empty();
                match self.queue.load(tracks, play_immediately) {
                    Some(track) => self.request_load(track, true),
                    None if accepted => {
                        // Have the first track ready for a later play.
                        if let Some(track) = self.queue.current().cloned() {
                            self.request_load(track, false);
                        }
                    }
                    None => {}
                }
            }
            EngineCommand::LoadTimeline(timeline) => {
                self.generation += 1;
                self.scheduler.load(timeline);
            }
            EngineCommand::Play => {
                if self.scheduler.play() {
                    self.queue.resume();
                }
            }
            EngineCommand::Pause => self.scheduler.pause(),
            EngineCommand::Stop => {
                self.scheduler.stop();
                self.queue.stop();
                self.play_when_loaded = false;
            }
            EngineCommand::JumpTo(seconds) => self.scheduler.jump_to(seconds),
            EngineCommand::SeekBy(delta) => {
                let target = (self.scheduler.position() + delta).min(self.scheduler.duration());
                self.scheduler.jump_to(target);
            }
            EngineCommand::SetVolume(level) => {
                self.scheduler.set_volume(level);
                self.publish(EngineUpdate::Volume {
                    level: self.scheduler.volume().level(),
                });
            }
            EngineCommand::SetSink(sink) => {
                self.scheduler.set_sink(sink);
            }
            EngineCommand::Next => self.advance(Direction::Next),
            EngineCommand::Previous => self.advance(Direction::Previous),
            EngineCommand::EnqueueNext(tracks) => {
                if let Some(track) = self.queue.enqueue_next(tracks) {
                    self.request_load(track, true);
                }
            }
            EngineCommand::Append(tracks) => {
                if let Some(track) = self.queue.append(tracks) {
                    self.request_load(track, true);
                }
            }
            EngineCommand::ToggleShuffle => {
                let enabled = self.queue.toggle_shuffle();
                self.publish(EngineUpdate::Shuffle { enabled });
            }
            EngineCommand::PlayIndex(index) => {
                if let Some(track) = self.queue.play_index(index) {
                    self.request_load(track, true);
                }
            }
            EngineCommand::Shutdown => {}
        }
        self.publish_state();
    }

    fn advance(&mut self, direction: Direction) {
        if let Some(track) = self.queue.advance(direction) {
            self.request_load(track, true);
        }
    }

    /// Fetches `track` on a worker thread. Whatever was requested before
    /// and hasn't arrived yet is superseded.
    fn request_load(&mut self, track: Track, play: bool) {
        self.generation += 1;
        self.play_when_loaded = play;
        let generation = self.generation;
        info!(title = %track.title, url = %track.url, generation, "Loading track");

        let loader = self.loader.clone();
        let loaded_tx = self.loaded_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("pianola-loader".into())
            .spawn(move || {
                let result = loader.load(&track);
                let _ = loaded_tx.send(LoadResult {
                    generation,
                    track,
                    result,
                });
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to start loader thread");
            self.publish(EngineUpdate::Error {
                message: format!("Failed to start loading: {e}"),
            });
        }
    }

    fn finish_load(&mut self, loaded: LoadResult) {
        if loaded.generation != self.generation {
            debug!(
                title = %loaded.track.title,
                generation = loaded.generation,
                current = self.generation,
                "Discarding stale load"
            );
            return;
        }
        match loaded.result {
            Ok(timeline) => {
                self.scheduler.load(timeline);
                if self.play_when_loaded {
                    self.scheduler.play();
                }
            }
            Err(e) => {
                error!(title = %loaded.track.title, error = %e, "Track failed to load");
                self.publish(EngineUpdate::Error {
                    message: e.to_string(),
                });
            }
        }
        self.publish_state();
    }

    /// Runs a scheduler tick if one is due.
    fn poll(&mut self) {
        if self.scheduler.state() != PlaybackState::Playing {
            self.next_tick = None;
            return;
        }
        if self.next_tick.is_some_and(|at| Instant::now() < at) {
            return;
        }

        match self.scheduler.tick() {
            Tick::Continue(wait) => {
                self.next_tick = Some(Instant::now() + wait);
                if self.last_progress.elapsed() >= PROGRESS_INTERVAL {
                    self.publish_state();
                }
            }
            Tick::Idle => self.next_tick = None,
            Tick::Finished => {
                self.next_tick = None;
                self.publish_state();
                if let Some(track) = self.queue.on_track_ended() {
                    self.request_load(track, true);
                }
            }
        }
    }

    fn wait_time(&self) -> Duration {
        match self.next_tick {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None if self.scheduler.state() == PlaybackState::Playing => Duration::ZERO,
            None => IDLE_WAIT,
        }
    }

    fn publish_state(&mut self) {
        self.last_progress = Instant::now();
        self.publish(EngineUpdate::PlaybackState {
            state: self.scheduler.state(),
            position: self.scheduler.position(),
            duration: self.scheduler.duration(),
        });
    }

    fn publish(&self, update: EngineUpdate) {
        let _ = self.update_tx.send(update);
    }

    fn shutdown(&mut self) {
        self.scheduler.stop();
        self.queue.stop();
        self.scheduler.take_sink();
        info!("Engine stopped");
    }
}

fn engine_thread(mut state: EngineState, command_rx: Receiver<EngineCommand>) {
    let loaded_rx = state.loaded_rx.clone();

    loop {
        let wait = state.wait_time();
        select! {
            recv(command_rx) -> command => match command {
                Ok(EngineCommand::Shutdown) | Err(_) => break,
                Ok(command) => state.handle(command),
            },
            recv(loaded_rx) -> loaded => {
                if let Ok(loaded) = loaded {
                    state.finish_load(loaded);
                }
            },
            default(wait) => {},
        }
        state.poll();
    }

    state.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingSink, SinkCall};
    use crate::error::Error;
    use crate::events::ScheduledEvent;
    use crate::timing::ManualClock;

    struct MemoryLoader;

    /// `url` is "<pitch>" or "slow:<pitch>"; anything else fails.
    impl TrackLoader for MemoryLoader {
        fn load(&self, track: &Track) -> Result<Timeline> {
            let (slow, pitch) = match track.url.strip_prefix("slow:") {
                Some(rest) => (true, rest),
                None => (false, track.url.as_str()),
            };
            let pitch: u8 = pitch.parse().map_err(|_| Error::Load {
                url: track.url.clone(),
                reason: "not found".into(),
            })?;
            if slow {
                std::thread::sleep(Duration::from_millis(150));
            }
            Ok(Timeline::from_events(vec![
                ScheduledEvent::note_on(0.0, pitch, 100),
                ScheduledEvent::note_off(1.0, pitch),
            ]))
        }
    }

    fn start() -> (EngineHandle, ManualClock, RecordingSink) {
        let clock = ManualClock::new();
        let sink = RecordingSink::new("recording");
        let engine = spawn_engine(
            &EngineConfig::default(),
            Arc::new(MemoryLoader),
            Box::new(clock.clone()),
        )
        .unwrap();
        engine.send(EngineCommand::SetSink(Box::new(sink.clone())));
        (engine, clock, sink)
    }

    fn wait_for<F>(engine: &EngineHandle, mut found: F) -> EngineUpdate
    where
        F: FnMut(&EngineUpdate) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match engine.update_rx.recv_timeout(left) {
                Ok(update) if found(&update) => return update,
                Ok(_) => {}
                Err(_) => panic!("timed out waiting for engine update"),
            }
        }
    }

    fn track_changed_to(url: &'static str) -> impl FnMut(&EngineUpdate) -> bool {
        move |u| {
            matches!(
                u,
                EngineUpdate::Notification(Notification::TrackChanged { track, .. }) if track.url == url
            )
        }
    }

    fn is_playing(u: &EngineUpdate) -> bool {
        matches!(
            u,
            EngineUpdate::PlaybackState {
                state: PlaybackState::Playing,
                ..
            }
        )
    }

    #[test]
    fn plays_queue_and_advances_when_track_ends() {
        let (engine, clock, sink) = start();
        engine.send(EngineCommand::LoadQueue {
            tracks: vec![Track::new("One", "60"), Track::new("Two", "62")],
            play_immediately: true,
        });
        wait_for(&engine, is_playing);
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::Notification(Notification::NoteStarted { pitch: 60, .. }))
        });

        clock.advance(2.0);
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::Notification(Notification::TrackEnded))
        });
        wait_for(&engine, track_changed_to("62"));
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::Notification(Notification::NoteStarted { pitch: 62, .. }))
        });

        engine.shutdown();
        assert!(sink.calls().iter().any(|c| matches!(c, SinkCall::NoteOff { pitch: 60, .. })));
    }

    #[test]
    fn stop_suppresses_auto_advance() {
        let (engine, clock, _sink) = start();
        engine.send(EngineCommand::LoadQueue {
            tracks: vec![Track::new("One", "60"), Track::new("Two", "62")],
            play_immediately: true,
        });
        wait_for(&engine, is_playing);
        engine.send(EngineCommand::Stop);
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::PlaybackState { state: PlaybackState::Idle, .. })
        });

        clock.advance(2.0);
        std::thread::sleep(Duration::from_millis(100));
        let changed = engine.update_rx.try_iter().any(|u| {
            matches!(u, EngineUpdate::Notification(Notification::TrackChanged { .. }))
        });
        assert!(!changed);
        engine.shutdown();
    }

    #[test]
    fn failed_load_reports_error_and_keeps_timeline() {
        let (engine, _clock, _sink) = start();
        engine.send(EngineCommand::LoadQueue {
            tracks: vec![Track::new("Good", "60"), Track::new("Bad", "missing")],
            play_immediately: false,
        });
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::PlaybackState { state: PlaybackState::Loaded, duration, .. } if *duration == 1.0)
        });

        engine.send(EngineCommand::PlayIndex(1));
        let error = wait_for(&engine, |u| matches!(u, EngineUpdate::Error { .. }));
        assert!(matches!(error, EngineUpdate::Error { message } if message.contains("missing")));

        engine.send(EngineCommand::Play);
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::PlaybackState { state: PlaybackState::Playing, duration, .. } if *duration == 1.0)
        });
        engine.shutdown();
    }

    #[test]
    fn stale_load_is_discarded() {
        let (engine, _clock, sink) = start();
        engine.send(EngineCommand::LoadQueue {
            tracks: vec![Track::new("Slow", "slow:60"), Track::new("Fast", "72")],
            play_immediately: true,
        });
        engine.send(EngineCommand::PlayIndex(1));
        wait_for(&engine, |u| {
            matches!(u, EngineUpdate::Notification(Notification::NoteStarted { pitch: 72, .. }))
        });
        std::thread::sleep(Duration::from_millis(300));
        engine.shutdown();

        let struck: Vec<u8> = sink
            .calls()
            .iter()
            .filter_map(|c| match c {
                SinkCall::NoteOn { pitch, .. } => Some(*pitch),
                _ => None,
            })
            .collect();
        assert_eq!(struck, vec![72]);
    }

    #[test]
    fn volume_updates_are_clamped() {
        let (engine, _clock, _sink) = start();
        engine.send(EngineCommand::SetVolume(99));
        let update = wait_for(&engine, |u| matches!(u, EngineUpdate::Volume { .. }));
        assert_eq!(update, EngineUpdate::Volume { level: 11 });
        engine.shutdown();
    }
}
