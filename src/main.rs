use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pianola::audio::{
    MidiOutSink, NullSink, OutputSink, PatchHandle, SynthSink, list_output_ports,
};
use pianola::timing::{SystemClock, TimelineOptions};
use pianola::{
    Catalog, Config, EngineCommand, EngineHandle, EngineUpdate, Error, FileLoader, Notification,
    PlaybackState, Playlist, Result, spawn_engine,
};

const SEEK_STEP: f64 = 5.0;

#[derive(Parser, Debug)]
#[command(name = "pianola")]
#[command(about = "Plays queued MIDI tracks through a software piano or a MIDI port")]
#[command(version)]
struct Args {
    /// Playlist file: a RON list of (title, url) tracks
    #[arg(required_unless_present_any = ["list_ports", "library"])]
    playlist: Option<PathBuf>,

    /// Directory of `.mid.ron` tracks to build the queue from instead
    #[arg(long, conflicts_with = "playlist")]
    library: Option<PathBuf>,

    /// Queue only this composer's tracks from the library
    #[arg(long, requires = "library", conflicts_with = "performer")]
    composer: Option<String>,

    /// Queue only this performer's tracks from the library
    #[arg(long, requires = "library")]
    performer: Option<String>,

    /// Print the library's composer and performer playlists and exit
    #[arg(long, requires = "library")]
    list_playlists: bool,

    #[arg(long, value_enum, default_value_t = SinkKind::Synth)]
    sink: SinkKind,

    /// MIDI output port name, or part of it
    #[arg(long)]
    port: Option<String>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    shuffle: bool,

    /// Print the MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    Synth,
    Midi,
    Null,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pianola=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.list_ports {
        for (i, name) in list_output_ports()?.iter().enumerate() {
            println!("{i}: {name}");
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.port.is_some() {
        config.midi.port = args.port.clone();
    }

    let (playlist, base) = match (&args.library, &args.playlist) {
        (Some(root), _) => {
            let catalog = Catalog::scan(root)?;
            if args.list_playlists {
                for (key, playlist) in catalog.playlists() {
                    println!("{key}: {} tracks", playlist.tracks.len());
                }
                return Ok(());
            }
            (select_from_library(&catalog, &args)?, root.clone())
        }
        (None, Some(path)) => {
            let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            (Playlist::load(path)?, base)
        }
        (None, None) => return Ok(()),
    };
    let loader = FileLoader::with_base(
        base,
        TimelineOptions {
            retain_controllers: config.engine.forward_controllers,
        },
    );

    let (sink, patch) = open_sink(args.sink, &config)?;
    let engine = spawn_engine(&config.engine, Arc::new(loader), Box::new(SystemClock::new()))?;
    engine.send(EngineCommand::SetSink(sink));
    if args.shuffle {
        engine.send(EngineCommand::ToggleShuffle);
    }
    engine.send(EngineCommand::LoadQueue {
        tracks: playlist.tracks,
        play_immediately: true,
    });

    info!("space play/pause, s stop, n/p next/previous, arrows seek, +/- volume, r shuffle, w waveform, q quit");
    let result = control_loop(&engine, config.engine.initial_volume, patch.as_ref());
    engine.shutdown();
    result
}

fn select_from_library(catalog: &Catalog, args: &Args) -> Result<Playlist> {
    let missing = |name: &str, what: &str| Error::Load {
        url: name.to_string(),
        reason: format!("no {what} by that name in the library"),
    };
    match (&args.composer, &args.performer) {
        (Some(name), _) => catalog
            .composer_playlist(name)
            .ok_or_else(|| missing(name.as_str(), "composer")),
        (None, Some(name)) => catalog
            .performer_playlist(name)
            .ok_or_else(|| missing(name.as_str(), "performer")),
        (None, None) => Ok(catalog.all()),
    }
}

/// The patch handle comes back only for the software instrument.
fn open_sink(kind: SinkKind, config: &Config) -> Result<(Box<dyn OutputSink>, Option<PatchHandle>)> {
    let sink: Box<dyn OutputSink> = match kind {
        SinkKind::Synth => {
            let synth = SynthSink::open(&config.synth)?;
            let patch = synth.patch_handle();
            let sink: Box<dyn OutputSink> = Box::new(synth);
            return Ok((sink, Some(patch)));
        }
        SinkKind::Midi => Box::new(MidiOutSink::connect(&config.midi)?),
        SinkKind::Null => Box::new(NullSink),
    };
    Ok((sink, None))
}

/// Leaves raw mode however the control loop exits.
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn control_loop(engine: &EngineHandle, mut volume: u8, patch: Option<&PatchHandle>) -> Result<()> {
    let _raw = RawMode::enable()?;
    let mut state = PlaybackState::Idle;

    loop {
        for update in engine.update_rx.try_iter() {
            if let EngineUpdate::PlaybackState { state: s, .. } = &update {
                state = *s;
            }
            print_update(&update);
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let command = match key.code {
            KeyCode::Char(' ') if state == PlaybackState::Playing => EngineCommand::Pause,
            KeyCode::Char(' ') => EngineCommand::Play,
            KeyCode::Char('s') => EngineCommand::Stop,
            KeyCode::Char('n') => EngineCommand::Next,
            KeyCode::Char('p') => EngineCommand::Previous,
            KeyCode::Left => EngineCommand::SeekBy(-SEEK_STEP),
            KeyCode::Right => EngineCommand::SeekBy(SEEK_STEP),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                volume = (volume + 1).min(pianola::audio::MAX_VOLUME);
                EngineCommand::SetVolume(volume)
            }
            KeyCode::Char('-') => {
                volume = volume.saturating_sub(1).max(pianola::audio::MIN_VOLUME);
                EngineCommand::SetVolume(volume)
            }
            KeyCode::Char('r') => EngineCommand::ToggleShuffle,
            KeyCode::Char('w') => {
                if let Some(patch) = patch {
                    next_waveform(patch);
                }
                continue;
            }
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            _ => continue,
        };
        engine.send(command);
    }
}

/// Steps every oscillator of the running synth to the next waveform.
fn next_waveform(patch: &PatchHandle) {
    let mut next = (*patch.current()).clone();
    for osc in &mut next.instrument.oscillators {
        osc.wave = osc.wave.next();
    }
    let waves: Vec<String> = next
        .instrument
        .oscillators
        .iter()
        .map(|osc| format!("{:?}", osc.wave))
        .collect();
    patch.set(next);
    print!("Waveform: {}\r\n", waves.join(" + "));
    let _ = std::io::stdout().flush();
}

fn print_update(update: &EngineUpdate) {
    let line = match update {
        EngineUpdate::Notification(Notification::TrackChanged { track, next_track }) => {
            match next_track {
                Some(next) => format!("Now playing: {} (next: {})", track.title, next.title),
                None => format!("Now playing: {}", track.title),
            }
        }
        EngineUpdate::Notification(Notification::QueueUpdated { tracks, .. }) => {
            format!("Queue: {} tracks", tracks.len())
        }
        EngineUpdate::Notification(_) => return,
        EngineUpdate::PlaybackState {
            state,
            position,
            duration,
        } => format!(
            "[{state}] {} / {}",
            format_time(*position),
            format_time(*duration)
        ),
        EngineUpdate::Volume { level } => format!("Volume {level}/11"),
        EngineUpdate::Shuffle { enabled } => {
            format!("Shuffle {}", if *enabled { "on" } else { "off" })
        }
        EngineUpdate::Error { message } => format!("Error: {message}"),
    };
    // Raw mode needs the explicit carriage return.
    print!("{line}\r\n");
    let _ = std::io::stdout().flush();
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
