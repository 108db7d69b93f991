use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Highest value a MIDI data byte can carry.
pub const MIDI_MAX: u8 = 127;

/// A single sounding note with absolute timing in seconds.
///
/// Notes carry no identity of their own: every query and transform in this
/// crate addresses a note by its position in an ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub start: f64,
    pub end: f64,
    pub pitch: u8,
    pub velocity: u8,
}

impl Note {
    pub fn new(start: f64, end: f64, pitch: u8, velocity: u8) -> Self {
        Self {
            start,
            end,
            pitch,
            velocity,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Octave-stripped pitch, 0 = C.
    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }

    /// True when the two time intervals touch or overlap.
    pub fn overlaps(&self, other: &Note) -> bool {
        other.start <= self.end && other.end >= self.start
    }
}

/// Check that a sequence is non-empty and well formed.
///
/// Relation queries rely on the sort order to stop scanning early, so an
/// unsorted sequence is rejected here rather than producing silently wrong
/// neighbours later.
pub fn validate_notes(notes: &[Note]) -> Result<()> {
    if notes.is_empty() {
        return Err(Error::EmptySequence);
    }
    validate_part(notes)
}

/// Like [`validate_notes`] but accepts an empty part.
pub fn validate_part(notes: &[Note]) -> Result<()> {
    let mut previous_start = f64::NEG_INFINITY;

    for (index, note) in notes.iter().enumerate() {
        if !note.start.is_finite() || !note.end.is_finite() || note.end <= note.start {
            return Err(Error::InvalidDuration {
                index,
                start: note.start,
                end: note.end,
            });
        }
        if note.pitch > MIDI_MAX {
            return Err(Error::PitchOutOfRange {
                index,
                pitch: note.pitch,
            });
        }
        if note.velocity > MIDI_MAX {
            return Err(Error::VelocityOutOfRange {
                index,
                velocity: note.velocity,
            });
        }
        if note.start < previous_start {
            return Err(Error::Unsorted {
                index,
                start: note.start,
                previous: previous_start,
            });
        }
        previous_start = note.start;
    }

    Ok(())
}

/// Sort by onset, then pitch for determinism.
pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
}
