mod instrument;
mod midi_out;
mod null;
mod sink;
mod synth;
mod voice;
mod volume;

pub use instrument::{Instrument, OscConfig, Wave};
pub use midi_out::{MidiOutSink, MidiPort, list_output_ports};
pub use null::{NullSink, RecordingSink, SinkCall};
pub use sink::{NoteTiming, OutputSink, SinkCapabilities};
pub use synth::{Patch, PatchHandle, SynthRenderer, SynthSink};
pub use voice::{ADSRConfig, EnvelopeState, NoteState};
pub use volume::{MAX_VOLUME, MIN_VOLUME, Volume};

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Scientific pitch name, `C4` = 60.
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[pitch as usize % 12], octave)
}

/// Parses names like `C4`, `F#3`, `Bb2` or `c-1`. Returns None for anything
/// outside 0..=127.
pub fn note_name_to_pitch(name: &str) -> Option<u8> {
    let mut chars = name.trim().chars().peekable();
    let step = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut accidental = 0i32;
    while let Some(&c) = chars.peek() {
        match c {
            '#' | '♯' => accidental += 1,
            'b' | '♭' => accidental -= 1,
            _ => break,
        }
        chars.next();
    }

    let octave: i32 = chars.collect::<String>().parse().ok()?;
    let pitch = (octave + 1) * 12 + step + accidental;
    u8::try_from(pitch).ok().filter(|p| *p <= 127)
}

/// Parser values arrive as 0.0..=1.0; the wire format wants 0..=127.
pub fn unit_to_midi(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value * 127.0).round().clamp(0.0, 127.0) as u8
}
