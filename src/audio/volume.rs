pub const MIN_VOLUME: u8 = 1;
pub const MAX_VOLUME: u8 = 11;

/// User volume control, 1 (silent) to 11 (unscaled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    pub fn new(level: u8) -> Self {
        Self(level.clamp(MIN_VOLUME, MAX_VOLUME))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn factor(self) -> f32 {
        (self.0 - MIN_VOLUME) as f32 / (MAX_VOLUME - MIN_VOLUME) as f32
    }

    /// Applied at dispatch time; the stored event is never touched.
    pub fn scale(self, velocity: u8) -> u8 {
        (velocity.min(127) as f32 * self.factor()).round() as u8
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(MAX_VOLUME)
    }
}
