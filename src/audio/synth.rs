use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{self, Sender};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use tracing::{debug, error, info};

use super::instrument::Instrument;
use super::midi_to_freq;
use super::sink::{NoteTiming, OutputSink, SinkCapabilities};
use super::voice::{ADSRConfig, NoteState};
use crate::config::SynthConfig;
use crate::error::{Error, Result, SinkError};

/// Upper bound on simultaneous voices; the oldest released voice is
/// stolen first, then the oldest overall.
const MAX_VOICES: usize = 64;

#[derive(Debug, Clone)]
enum VoiceCommand {
    Start { voice: u64, pitch: u8, velocity: u8 },
    Release { voice: u64 },
}

#[derive(Debug, Clone)]
struct VoiceEvent {
    sample_timestamp: u64,
    epoch: u64,
    command: VoiceCommand,
}

/// Instrument and envelope, swapped atomically while the stream runs.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub instrument: Instrument,
    pub adsr: ADSRConfig,
}

/// Reads and replaces the patch of a running synth.
#[derive(Clone)]
pub struct PatchHandle(Arc<ArcSwap<Patch>>);

impl PatchHandle {
    pub fn current(&self) -> Arc<Patch> {
        self.0.load_full()
    }

    /// Swaps the instrument without interrupting playback. Voices already
    /// sounding pick up the new oscillators on their next frame.
    pub fn set(&self, patch: Patch) {
        self.0.store(Arc::new(patch));
    }
}

#[derive(Debug, Default)]
struct SharedClock {
    /// Frames rendered so far; the device's time base
    sample_counter: AtomicU64,
    /// Bumped by `panic`; events stamped with an older epoch are dropped
    epoch: AtomicU64,
}

/// Software instrument rendered through the default audio output.
///
/// The scheduler's delays are translated into sample timestamps against
/// the frame counter the audio callback advances, and the callback starts
/// and releases voices exactly on those frames.
pub struct SynthSink {
    producer: HeapProd<VoiceEvent>,
    shared: Arc<SharedClock>,
    patch: Arc<ArcSwap<Patch>>,
    sample_rate: f32,
    /// Voices started per pitch, oldest first
    stop_handles: HashMap<u8, Vec<u64>>,
    next_voice: u64,
    _shutdown: Option<Sender<()>>,
}

impl SynthSink {
    /// Opens the default output device. The cpal stream lives on its own
    /// thread and is closed when the sink is dropped.
    pub fn open(config: &SynthConfig) -> Result<Self> {
        let (sink, renderer) = Self::detached(config, 0.0);
        let (ready_tx, ready_rx) = channel::bounded::<Result<f32>>(1);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        std::thread::Builder::new()
            .name("pianola-synth".into())
            .spawn(move || match start_stream(renderer) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Blocks until the sink (and its sender) is dropped.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Synth stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("synth thread exited before starting".into()))??;

        Ok(Self {
            sample_rate,
            _shutdown: Some(shutdown_tx),
            ..sink
        })
    }

    /// A sink and renderer pair with no device behind them. The caller
    /// drives the renderer; used by tests and offline rendering.
    pub fn detached(config: &SynthConfig, sample_rate: f32) -> (Self, SynthRenderer) {
        let ring = HeapRb::<VoiceEvent>::new(config.ring_capacity.max(16));
        let (producer, consumer) = ring.split();
        let shared = Arc::new(SharedClock::default());
        let patch = Arc::new(ArcSwap::from_pointee(Patch {
            instrument: config.instrument.clone(),
            adsr: config.adsr.clone(),
        }));

        let renderer = SynthRenderer {
            consumer,
            pending: Vec::with_capacity(64),
            voices: Vec::with_capacity(MAX_VOICES),
            shared: shared.clone(),
            patch: patch.clone(),
            seen_epoch: 0,
            sample_rate,
            channels: 2,
            master_gain: config.master_gain,
        };

        let sink = Self {
            producer,
            shared,
            patch,
            sample_rate,
            stop_handles: HashMap::new(),
            next_voice: 1,
            _shutdown: None,
        };

        (sink, renderer)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// A handle that keeps working after the sink is moved into the engine.
    pub fn patch_handle(&self) -> PatchHandle {
        PatchHandle(self.patch.clone())
    }

    /// Voices this sink believes are held, per pitch.
    pub fn held_voices(&self, pitch: u8) -> usize {
        self.stop_handles.get(&pitch).map_or(0, Vec::len)
    }

    fn timestamp(&self, delay: f64) -> u64 {
        let now = self.shared.sample_counter.load(Ordering::Relaxed);
        now + (delay.max(0.0) * self.sample_rate as f64).round() as u64
    }

    fn push(&mut self, sample_timestamp: u64, command: VoiceCommand) -> std::result::Result<(), SinkError> {
        let event = VoiceEvent {
            sample_timestamp,
            epoch: self.shared.epoch.load(Ordering::Relaxed),
            command,
        };
        self.producer
            .try_push(event)
            .map_err(|_| SinkError::BufferFull)
    }
}

impl OutputSink for SynthSink {
    fn name(&self) -> &str {
        "synth"
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            control_change: false,
            panic: true,
        }
    }

    /// The duration hint is not used: releases always follow an explicit
    /// note-off, which keeps the scheduler's sustain emulation in charge.
    fn note_on(&mut self, pitch: u8, velocity: u8, timing: NoteTiming) -> std::result::Result<(), SinkError> {
        let voice = self.next_voice;
        self.next_voice += 1;
        let at = self.timestamp(timing.delay);
        self.push(
            at,
            VoiceCommand::Start {
                voice,
                pitch,
                velocity,
            },
        )?;
        self.stop_handles.entry(pitch).or_default().push(voice);
        Ok(())
    }

    fn note_off(&mut self, pitch: u8, delay: f64) -> std::result::Result<(), SinkError> {
        let Some(voices) = self.stop_handles.remove(&pitch) else {
            return Ok(());
        };
        let at = self.timestamp(delay);
        for voice in voices {
            self.push(at, VoiceCommand::Release { voice })?;
        }
        Ok(())
    }

    fn panic(&mut self) -> std::result::Result<(), SinkError> {
        self.stop_handles.clear();
        self.shared.epoch.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Audio-callback side of the synth: pulls voice events off the ring and
/// renders interleaved frames.
pub struct SynthRenderer {
    consumer: HeapCons<VoiceEvent>,
    pending: Vec<VoiceEvent>,
    voices: Vec<NoteState>,
    shared: Arc<SharedClock>,
    patch: Arc<ArcSwap<Patch>>,
    seen_epoch: u64,
    sample_rate: f32,
    channels: usize,
    master_gain: f32,
}

impl SynthRenderer {
    pub fn set_format(&mut self, sample_rate: f32, channels: usize) {
        self.sample_rate = sample_rate;
        self.channels = channels.max(1);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Frames rendered so far.
    pub fn position(&self) -> u64 {
        self.shared.sample_counter.load(Ordering::Relaxed)
    }

    pub fn render(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        let num_frames = data.len() / channels;
        let current_sample = self.shared.sample_counter.load(Ordering::Relaxed);

        let epoch = self.shared.epoch.load(Ordering::Relaxed);
        if epoch != self.seen_epoch {
            self.voices.clear();
            self.seen_epoch = epoch;
        }

        while let Some(event) = self.consumer.try_pop() {
            self.pending.push(event);
        }
        self.pending.retain(|e| e.epoch >= epoch);
        self.pending.sort_by_key(|e| e.sample_timestamp);

        data.fill(0.0);
        let patch = self.patch.load();
        let dt = 1.0 / self.sample_rate;

        let mut consumed = 0;
        for frame in 0..num_frames {
            let now = current_sample + frame as u64;
            while consumed < self.pending.len() && self.pending[consumed].sample_timestamp <= now {
                let command = self.pending[consumed].command.clone();
                self.apply(command, &patch.instrument);
                consumed += 1;
            }

            let sample = self.render_frame(&patch, dt) * self.master_gain;
            for out in &mut data[frame * channels..(frame + 1) * channels] {
                *out = sample;
            }
        }
        self.pending.drain(..consumed);

        self.voices.retain(|v| !v.is_finished(&patch.adsr));
        self.shared
            .sample_counter
            .fetch_add(num_frames as u64, Ordering::Relaxed);
    }

    fn apply(&mut self, command: VoiceCommand, instrument: &Instrument) {
        match command {
            VoiceCommand::Start {
                voice,
                pitch,
                velocity,
            } => {
                if self.voices.len() >= MAX_VOICES {
                    let victim = self
                        .voices
                        .iter()
                        .position(NoteState::is_released)
                        .unwrap_or(0);
                    self.voices.remove(victim);
                }
                self.voices.push(NoteState::new(
                    voice,
                    pitch,
                    velocity,
                    instrument.num_oscillators(),
                ));
            }
            VoiceCommand::Release { voice } => {
                if let Some(v) = self.voices.iter_mut().find(|v| v.voice == voice) {
                    v.release();
                }
            }
        }
    }

    fn render_frame(&mut self, patch: &Patch, dt: f32) -> f32 {
        let mut mix = 0.0;
        for voice in &mut self.voices {
            let envelope = voice.advance(&patch.adsr, dt);
            let velocity_scale = voice.velocity as f32 / 127.0;

            for (i, osc) in patch.instrument.oscillators.iter().enumerate() {
                let Some(phase) = voice.oscillator_phases.get_mut(i) else {
                    continue;
                };
                let note = (voice.pitch as i16 + osc.semitone as i16).clamp(0, 127) as u8;
                mix += osc.wave.sample(*phase) * envelope * velocity_scale * osc.gain;

                *phase += midi_to_freq(note) * dt;
                if *phase >= 1.0 {
                    *phase -= 1.0;
                }
            }
        }
        mix
    }
}

fn start_stream(mut renderer: SynthRenderer) -> Result<(cpal::Stream, f32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device".into()))?;
    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate() as f32;
    let stream_config: cpal::StreamConfig = config.into();
    let channels = stream_config.channels as usize;

    info!(channels, sample_rate, "Synth audio output");
    renderer.set_format(sample_rate, channels);

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data),
        |err| error!(error = %err, "Audio stream error"),
        None,
    )?;
    stream.play()?;

    Ok((stream, sample_rate))
}
