use std::collections::BTreeMap;

use crate::audio::{note_name_to_pitch, unit_to_midi};
use crate::events::{Event, ScheduledEvent};
use crate::library::{RawControlChange, RawNote};

pub const SUSTAIN_CONTROLLER: u8 = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineOptions {
    /// Keep controllers other than the sustain pedal so they can be
    /// forwarded to sinks that accept arbitrary control changes.
    pub retain_controllers: bool,
}

/// Time-sorted events for one track. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<ScheduledEvent>,
}

impl Timeline {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Expands parsed notes into note-on/note-off pairs and keeps the
    /// sustain pedal changes. Notes whose name can't be read are skipped.
    pub fn build(
        notes: &[RawNote],
        control_changes: &BTreeMap<u8, Vec<RawControlChange>>,
        options: TimelineOptions,
    ) -> Self {
        let mut events: Vec<ScheduledEvent> =
            Vec::with_capacity(notes.len() * 2 + control_changes.len());

        for note in notes {
            let Some(pitch) = note_name_to_pitch(&note.name) else {
                tracing::warn!(name = %note.name, "Skipping note with unreadable name");
                continue;
            };
            let start = sanitize_time(note.start);
            let duration = sanitize_time(note.duration);

            events.push(ScheduledEvent {
                time: start,
                event: Event::NoteOn {
                    pitch,
                    velocity: unit_to_midi(note.velocity),
                    duration: Some(duration),
                },
            });
            events.push(ScheduledEvent::note_off(start + duration, pitch));
        }

        for (&controller, changes) in control_changes {
            if controller != SUSTAIN_CONTROLLER && !options.retain_controllers {
                continue;
            }
            if controller > 127 {
                tracing::warn!(controller, "Skipping out of range controller");
                continue;
            }
            for change in changes {
                events.push(ScheduledEvent::control_change(
                    sanitize_time(change.time),
                    controller,
                    unit_to_midi(change.value),
                ));
            }
        }

        Self::from_events(events)
    }

    /// Stable sort by time: events sharing a timestamp keep their input order.
    pub fn from_events(mut events: Vec<ScheduledEvent>) -> Self {
        for event in &mut events {
            event.time = sanitize_time(event.time);
        }
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { events }
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&ScheduledEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the last event, 0 for an empty timeline.
    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.time)
    }

    /// Index of the first event at or after `time`, or `len()` if none.
    pub fn first_at_or_after(&self, time: f64) -> usize {
        self.events.partition_point(|e| e.time < time)
    }
}

fn sanitize_time(t: f64) -> f64 {
    if t.is_finite() { t.max(0.0) } else { 0.0 }
}
