use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use midir::{MidiOutput, MidiOutputConnection};
use tracing::{debug, info, warn};

use super::sink::{NoteTiming, OutputSink, SinkCapabilities};
use crate::config::MidiOutConfig;
use crate::error::{Error, Result, SinkError};

const CLIENT_NAME: &str = "pianola";
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Somewhere raw MIDI bytes can be written to.
pub trait MidiPort: Send {
    fn send(&mut self, message: &[u8]) -> std::result::Result<(), SinkError>;
}

impl MidiPort for MidiOutputConnection {
    fn send(&mut self, message: &[u8]) -> std::result::Result<(), SinkError> {
        MidiOutputConnection::send(self, message).map_err(|e| SinkError::Send(e.to_string()))
    }
}

#[derive(Debug)]
enum Command {
    /// `due` is in device time, microseconds since the port was opened
    Send { due: u64, message: [u8; 3] },
    Panic,
}

/// Names of the MIDI output ports currently visible.
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_default())
        .collect())
}

/// Forwards to a hardware or virtual MIDI port.
///
/// The port has its own clock, counted from the moment it was opened. A
/// delay from the scheduler becomes an absolute due time on that clock, and
/// a dispatcher thread owning the connection writes each message when its
/// due time comes up.
pub struct MidiOutSink {
    name: String,
    channel: u8,
    origin: Instant,
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl MidiOutSink {
    /// Connects to the first port whose name contains `config.port`, or
    /// the first port at all when no filter is set.
    pub fn connect(config: &MidiOutConfig) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| match &config.port {
                Some(filter) => midi_out
                    .port_name(p)
                    .map(|name| name.contains(filter.as_str()))
                    .unwrap_or(false),
                None => true,
            })
            .ok_or_else(|| match &config.port {
                Some(filter) => Error::SinkUnavailable(format!("no MIDI output matching '{filter}'")),
                None => Error::SinkUnavailable("no MIDI output ports".into()),
            })?;

        let name = midi_out
            .port_name(port)
            .map_err(|e| Error::MidiOutput(e.to_string()))?;
        let connection = midi_out.connect(port, "pianola-out")?;
        info!(port = %name, channel = config.channel, "Connected MIDI output");

        Self::with_port(name, connection, config.channel)
    }

    pub fn with_port<P: MidiPort + 'static>(name: String, port: P, channel: u8) -> Result<Self> {
        let origin = Instant::now();
        let channel = channel & 0x0F;
        let (tx, rx) = channel::unbounded();

        let worker = std::thread::Builder::new()
            .name("pianola-midi-out".into())
            .spawn(move || dispatcher(port, origin, rx, channel))?;

        Ok(Self {
            name,
            channel,
            origin,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Current device time in microseconds.
    pub fn device_now(&self) -> u64 {
        micros_since(self.origin)
    }

    fn schedule(&self, delay: f64, message: [u8; 3]) -> std::result::Result<(), SinkError> {
        let due = self.device_now() + (delay.max(0.0) * 1_000_000.0).round() as u64;
        self.command(Command::Send { due, message })
    }

    fn command(&self, command: Command) -> std::result::Result<(), SinkError> {
        self.tx
            .as_ref()
            .ok_or(SinkError::Disconnected)?
            .send(command)
            .map_err(|_| SinkError::Disconnected)
    }
}

impl OutputSink for MidiOutSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            control_change: true,
            panic: true,
        }
    }

    fn note_on(&mut self, pitch: u8, velocity: u8, timing: NoteTiming) -> std::result::Result<(), SinkError> {
        self.schedule(
            timing.delay,
            [0x90 | self.channel, pitch & 0x7F, velocity & 0x7F],
        )
    }

    fn note_off(&mut self, pitch: u8, delay: f64) -> std::result::Result<(), SinkError> {
        self.schedule(delay, [0x80 | self.channel, pitch & 0x7F, 0])
    }

    fn control_change(&mut self, controller: u8, value: u8, delay: f64) -> std::result::Result<(), SinkError> {
        self.schedule(delay, [0xB0 | self.channel, controller & 0x7F, value & 0x7F])
    }

    fn panic(&mut self) -> std::result::Result<(), SinkError> {
        self.command(Command::Panic)
    }
}

impl Drop for MidiOutSink {
    fn drop(&mut self) {
        // Closing the channel makes the dispatcher silence the port and exit.
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn micros_since(origin: Instant) -> u64 {
    origin.elapsed().as_micros() as u64
}

fn silence<P: MidiPort>(port: &mut P, channel: u8) {
    for message in [
        [0xB0 | channel, 64, 0],
        [0xB0 | channel, 123, 0],
        [0xB0 | channel, 120, 0],
    ] {
        if let Err(e) = port.send(&message) {
            warn!(error = %e, "Failed to send MIDI panic");
        }
    }
}

fn dispatcher<P: MidiPort>(mut port: P, origin: Instant, rx: Receiver<Command>, channel: u8) {
    // Min-heap on (due, arrival order) so equal due times keep send order.
    let mut queue: BinaryHeap<Reverse<(u64, u64, [u8; 3])>> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let now = micros_since(origin);
        while let Some(Reverse((due, _, _))) = queue.peek() {
            if *due > now {
                break;
            }
            if let Some(Reverse((_, _, message))) = queue.pop() {
                if let Err(e) = port.send(&message) {
                    warn!(error = %e, ?message, "Failed to send MIDI message");
                }
            }
        }

        let wait = queue
            .peek()
            .map(|Reverse((due, _, _))| Duration::from_micros(due.saturating_sub(now)))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(wait) {
            Ok(Command::Send { due, message }) => {
                seq += 1;
                queue.push(Reverse((due, seq, message)));
            }
            Ok(Command::Panic) => {
                debug!(dropped = queue.len(), "MIDI panic");
                queue.clear();
                silence(&mut port, channel);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                silence(&mut port, channel);
                break;
            }
        }
    }
}
