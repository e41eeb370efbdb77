use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{ADSRConfig, Instrument, MAX_VOLUME, MIN_VOLUME};
use crate::error::{Error, Result};
use crate::timing::SchedulerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub synth: SynthConfig,
    pub midi: MidiOutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lookahead_interval_ms: u64,
    pub schedule_ahead_secs: f64,
    /// 1 (silent) to 11 (unscaled)
    pub initial_volume: u8,
    /// Keep controllers other than the sustain pedal in loaded timelines
    pub forward_controllers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_interval_ms: 25,
            schedule_ahead_secs: 0.1,
            initial_volume: MAX_VOLUME,
            forward_controllers: false,
        }
    }
}

impl EngineConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            lookahead_interval: Duration::from_millis(self.lookahead_interval_ms),
            schedule_ahead: self.schedule_ahead_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub instrument: Instrument,
    pub adsr: ADSRConfig,
    /// Voice commands the audio callback can fall behind by
    pub ring_capacity: usize,
    pub master_gain: f32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            instrument: Instrument::default(),
            adsr: ADSRConfig::default(),
            ring_capacity: 4096,
            master_gain: 0.25,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiOutConfig {
    /// Substring of the output port name; first port when unset
    pub port: Option<String>,
    pub channel: u8,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config: Config = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.midi.channel > 15 {
            return Err(Error::Config(format!(
                "midi channel must be 0-15, got {}",
                self.midi.channel
            )));
        }
        if self.engine.lookahead_interval_ms == 0 {
            return Err(Error::Config("lookahead_interval_ms must be positive".into()));
        }
        if !self.engine.schedule_ahead_secs.is_finite() || self.engine.schedule_ahead_secs < 0.0 {
            return Err(Error::Config("schedule_ahead_secs must be a non-negative number".into()));
        }
        self.engine.initial_volume = self.engine.initial_volume.clamp(MIN_VOLUME, MAX_VOLUME);
        Ok(())
    }
}
