use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

impl Default for ADSRConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.8,
            sustain: 0.3,
            release: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    /// `from` is the level the release started at
    Release { time: f32, from: f32 },
}

/// One sounding voice of the software instrument.
#[derive(Debug, Clone)]
pub struct NoteState {
    pub voice: u64,
    pub pitch: u8,
    pub velocity: u8,
    pub envelope_state: EnvelopeState,
    pub envelope_level: f32,
    pub oscillator_phases: Vec<f32>,
}

impl NoteState {
    pub fn new(voice: u64, pitch: u8, velocity: u8, num_oscillators: usize) -> Self {
        Self {
            voice,
            pitch,
            velocity,
            envelope_state: EnvelopeState::Attack { time: 0.0 },
            envelope_level: 0.0,
            oscillator_phases: vec![0.0; num_oscillators],
        }
    }

    pub fn release(&mut self) {
        if !matches!(self.envelope_state, EnvelopeState::Release { .. }) {
            self.envelope_state = EnvelopeState::Release {
                time: 0.0,
                from: self.envelope_level,
            };
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self.envelope_state, EnvelopeState::Release { .. })
    }

    pub fn is_finished(&self, adsr: &ADSRConfig) -> bool {
        matches!(self.envelope_state, EnvelopeState::Release { time, .. } if time >= adsr.release)
    }

    /// Moves the envelope forward by `dt` seconds and returns the new level.
    pub fn advance(&mut self, adsr: &ADSRConfig, dt: f32) -> f32 {
        match &mut self.envelope_state {
            EnvelopeState::Attack { time } => {
                *time += dt;
                if *time >= adsr.attack {
                    self.envelope_state = EnvelopeState::Decay { time: 0.0 };
                    self.envelope_level = 1.0;
                } else {
                    self.envelope_level = *time / adsr.attack;
                }
            }
            EnvelopeState::Decay { time } => {
                *time += dt;
                if *time >= adsr.decay {
                    self.envelope_state = EnvelopeState::Sustain;
                    self.envelope_level = adsr.sustain;
                } else {
                    let progress = *time / adsr.decay;
                    self.envelope_level = 1.0 - (1.0 - adsr.sustain) * progress;
                }
            }
            EnvelopeState::Sustain => {
                self.envelope_level = adsr.sustain;
            }
            EnvelopeState::Release { time, from } => {
                *time += dt;
                let progress = if adsr.release == 0.0 {
                    1.0
                } else {
                    (*time / adsr.release).min(1.0)
                };
                self.envelope_level = *from * (1.0 - progress);
            }
        }
        self.envelope_level
    }
}
