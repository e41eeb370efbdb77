use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Square,
    Saw,
    Triangle,
}

impl Wave {
    /// One sample of the waveform at `phase` in 0.0..1.0.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * 2.0 * std::f32::consts::PI).sin(),
            Wave::Square => {
                if phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            Wave::Saw => phase * 2.0 - 1.0,
            Wave::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }

    pub fn next(self) -> Self {
        match self {
            Wave::Sine => Wave::Triangle,
            Wave::Triangle => Wave::Square,
            Wave::Square => Wave::Saw,
            Wave::Saw => Wave::Sine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscConfig {
    pub wave: Wave,
    pub gain: f32,
    pub semitone: i8,
}

/// Oscillator stack the software instrument plays every note with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub oscillators: Vec<OscConfig>,
}

impl Instrument {
    pub fn num_oscillators(&self) -> usize {
        self.oscillators.len()
    }
}

impl Default for Instrument {
    /// A soft electric-piano-ish stack: fundamental plus a quiet octave.
    fn default() -> Self {
        Self {
            oscillators: vec![
                OscConfig {
                    wave: Wave::Sine,
                    gain: 0.7,
                    semitone: 0,
                },
                OscConfig {
                    wave: Wave::Triangle,
                    gain: 0.2,
                    semitone: 12,
                },
            ],
        }
    }
}
