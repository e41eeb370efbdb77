use crate::error::SinkError;

/// Optional operations a sink supports. Read once when the sink is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCapabilities {
    pub control_change: bool,
    pub panic: bool,
}

/// When a note should sound, relative to the moment of the call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoteTiming {
    /// Seconds from now, never negative
    pub delay: f64,
    /// How long the note is expected to last, when known
    pub duration: Option<f64>,
}

impl NoteTiming {
    pub fn after(delay: f64) -> Self {
        Self {
            delay: delay.max(0.0),
            duration: None,
        }
    }
}

/// An output backend the scheduler drives. Calls must return immediately;
/// any precise timing happens inside the sink using the supplied delay.
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::default()
    }

    fn note_on(&mut self, pitch: u8, velocity: u8, timing: NoteTiming) -> Result<(), SinkError>;

    fn note_off(&mut self, pitch: u8, delay: f64) -> Result<(), SinkError>;

    /// Only called when `capabilities().control_change` is set.
    fn control_change(&mut self, _controller: u8, _value: u8, _delay: f64) -> Result<(), SinkError> {
        Ok(())
    }

    /// Silence everything at once, including anything already queued.
    /// Only called when `capabilities().panic` is set.
    fn panic(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
