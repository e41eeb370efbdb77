use std::sync::Arc;

use parking_lot::Mutex;

use super::sink::{NoteTiming, OutputSink, SinkCapabilities};
use crate::error::SinkError;

/// Accepts everything and plays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn note_on(&mut self, _pitch: u8, _velocity: u8, _timing: NoteTiming) -> Result<(), SinkError> {
        Ok(())
    }

    fn note_off(&mut self, _pitch: u8, _delay: f64) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    NoteOn {
        pitch: u8,
        velocity: u8,
        timing: NoteTiming,
    },
    NoteOff {
        pitch: u8,
        delay: f64,
    },
    ControlChange {
        controller: u8,
        value: u8,
        delay: f64,
    },
    Panic,
}

/// Records every call into a log shared with the test that created it.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    name: String,
    capabilities: SinkCapabilities,
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self::with_capabilities(name, SinkCapabilities::default())
    }

    pub fn with_capabilities(name: &str, capabilities: SinkCapabilities) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle onto the call log that stays valid after the sink is handed
    /// to the scheduler.
    pub fn log(&self) -> Arc<Mutex<Vec<SinkCall>>> {
        self.calls.clone()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }
}

impl OutputSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> SinkCapabilities {
        self.capabilities
    }

    fn note_on(&mut self, pitch: u8, velocity: u8, timing: NoteTiming) -> Result<(), SinkError> {
        self.calls.lock().push(SinkCall::NoteOn {
            pitch,
            velocity,
            timing,
        });
        Ok(())
    }

    fn note_off(&mut self, pitch: u8, delay: f64) -> Result<(), SinkError> {
        self.calls.lock().push(SinkCall::NoteOff { pitch, delay });
        Ok(())
    }

    fn control_change(&mut self, controller: u8, value: u8, delay: f64) -> Result<(), SinkError> {
        self.calls.lock().push(SinkCall::ControlChange {
            controller,
            value,
            delay,
        });
        Ok(())
    }

    fn panic(&mut self) -> Result<(), SinkError> {
        self.calls.lock().push(SinkCall::Panic);
        Ok(())
    }
}
