/// Pitches currently sounding on the sink, in the order they started.
///
/// A pitch can be struck again before its previous note-off arrives, so
/// each pitch carries a strike count and only the last matching note-off
/// silences it.
#[derive(Debug, Clone, Default)]
pub struct ActiveNotes {
    pitches: Vec<(u8, u32)>,
}

impl ActiveNotes {
    /// Records a strike. Returns true if the pitch was already sounding.
    pub fn insert(&mut self, pitch: u8) -> bool {
        match self.pitches.iter_mut().find(|(p, _)| *p == pitch) {
            Some((_, strikes)) => {
                *strikes += 1;
                true
            }
            None => {
                self.pitches.push((pitch, 1));
                false
            }
        }
    }

    /// Takes one strike off the pitch. Returns the strikes left, or None
    /// if the pitch wasn't sounding.
    pub fn remove(&mut self, pitch: u8) -> Option<u32> {
        let i = self.pitches.iter().position(|(p, _)| *p == pitch)?;
        self.pitches[i].1 -= 1;
        let left = self.pitches[i].1;
        if left == 0 {
            self.pitches.remove(i);
        }
        Some(left)
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.pitches.iter().any(|(p, _)| *p == pitch)
    }

    pub fn strikes(&self, pitch: u8) -> u32 {
        self.pitches
            .iter()
            .find(|(p, _)| *p == pitch)
            .map_or(0, |(_, n)| *n)
    }

    /// Forgets every strike, returning each sounding pitch once.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pitches)
            .into_iter()
            .map(|(p, _)| p)
            .collect()
    }

    /// Number of distinct sounding pitches.
    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }
}

/// Sustain pedal emulation. While held, note-offs are parked here instead
/// of reaching the sink; releasing the pedal hands them back in the order
/// they were parked.
#[derive(Debug, Clone, Default)]
pub struct SustainController {
    held: bool,
    deferred: Vec<u8>,
}

impl SustainController {
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Applies a pedal value. Returns the notes to release when this change
    /// lifts the pedal, empty otherwise.
    pub fn apply(&mut self, value: u8) -> Vec<u8> {
        if value >= 64 {
            self.held = true;
            Vec::new()
        } else {
            self.held = false;
            self.drain()
        }
    }

    pub fn defer(&mut self, pitch: u8) {
        if !self.deferred.contains(&pitch) {
            self.deferred.push(pitch);
        }
    }

    /// Drops a parked release, for a pitch struck again under the pedal.
    pub fn cancel(&mut self, pitch: u8) -> bool {
        match self.deferred.iter().position(|&p| p == pitch) {
            Some(i) => {
                self.deferred.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn deferred(&self) -> &[u8] {
        &self.deferred
    }

    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.deferred)
    }

    /// Lifts the pedal and returns everything that was parked.
    pub fn reset(&mut self) -> Vec<u8> {
        self.held = false;
        self.drain()
    }
}
