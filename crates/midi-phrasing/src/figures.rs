//! Musical figures recognised from note timing and pitch: duration classes,
//! trills, and tonic/dominant cadences.
//!
//! The chord checks are set-membership heuristics against the key's degree
//! sets, not a harmonic analysis. In particular the dominant check accepts any
//! subset of degrees 5/7/2/4, so a bare fifth-degree dyad already counts.

use serde::{Deserialize, Serialize};

use crate::key::{KeyContext, PitchClassSet};
use crate::note::Note;
use crate::relations::IntervalIndex;
use crate::{Error, Result};

/// Duration thresholds, in seconds.
///
/// The defaults assume a quarter note of 0.25s, the tempo of the
/// performance corpus these heuristics were tuned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationProfile {
    /// Duration of a note that is neither extended nor shortened.
    pub standard: f64,
    /// Maximum distance from `standard` to still count as standard.
    pub standard_tolerance: f64,
    /// Distance from `standard` beyond which a note is extended or shortened.
    pub deviation: f64,
    /// Longest note that can take part in a trill.
    pub trill_max: f64,
}

impl Default for DurationProfile {
    fn default() -> Self {
        Self {
            standard: 0.25,
            standard_tolerance: 0.01,
            deviation: 0.05,
            trill_max: 0.05,
        }
    }
}

impl DurationProfile {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("standard", self.standard),
            ("standard_tolerance", self.standard_tolerance),
            ("deviation", self.deviation),
            ("trill_max", self.trill_max),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidParams(format!(
                    "durations.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        // A wider standard band than the deviation band would let a note be
        // both standard and extended.
        if self.standard_tolerance > self.deviation {
            return Err(Error::InvalidParams(format!(
                "durations.standard_tolerance ({}) must not exceed durations.deviation ({})",
                self.standard_tolerance, self.deviation
            )));
        }
        Ok(())
    }

    pub fn is_standard_duration(&self, note: &Note) -> bool {
        (note.duration() - self.standard).abs() < self.standard_tolerance
    }

    pub fn is_extended(&self, note: &Note) -> bool {
        note.duration() > self.standard + self.deviation
    }

    pub fn is_shortened(&self, note: &Note) -> bool {
        note.duration() < self.standard - self.deviation
    }

    pub fn is_trill_duration(&self, note: &Note) -> bool {
        note.duration() <= self.trill_max
    }

    /// At most one class applies; notes between the bands have none.
    pub fn classify(&self, note: &Note) -> Option<DurationClass> {
        if self.is_standard_duration(note) {
            Some(DurationClass::Standard)
        } else if self.is_extended(note) {
            Some(DurationClass::Extended)
        } else if self.is_shortened(note) {
            Some(DurationClass::Shortened)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationClass {
    Standard,
    Extended,
    Shortened,
}

/// Three rapid notes of one pitch and the note that resolves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trill {
    pub notes: [usize; 4],
}

impl Trill {
    pub fn terminal(&self) -> usize {
        self.notes[3]
    }
}

/// Scan left to right for trills. A match consumes all four notes.
pub fn identify_trills(notes: &[Note], profile: &DurationProfile) -> Vec<Trill> {
    let mut trills = Vec::new();
    let mut i = 0;

    while i + 3 < notes.len() {
        let pitch = notes[i].pitch;
        let is_trill = notes[i..i + 3]
            .iter()
            .all(|n| n.pitch == pitch && profile.is_trill_duration(n));

        if is_trill {
            trills.push(Trill {
                notes: [i, i + 1, i + 2, i + 3],
            });
            i += 4;
        } else {
            i += 1;
        }
    }

    trills
}

/// Detected trills with terminal-note lookup by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrillSet {
    trills: Vec<Trill>,
    terminals: Vec<usize>,
}

impl TrillSet {
    pub fn new(trills: Vec<Trill>) -> Self {
        let mut terminals: Vec<usize> = trills.iter().map(Trill::terminal).collect();
        terminals.sort_unstable();
        Self { trills, terminals }
    }

    pub fn detect(notes: &[Note], profile: &DurationProfile) -> Self {
        Self::new(identify_trills(notes, profile))
    }

    /// True when `index` is the fourth note of some trill.
    pub fn is_terminal(&self, index: usize) -> bool {
        self.terminals.binary_search(&index).is_ok()
    }

    pub fn trills(&self) -> &[Trill] {
        &self.trills
    }

    pub fn len(&self) -> usize {
        self.trills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trills.is_empty()
    }
}

pub fn is_tonic_chord(pitch_classes: &PitchClassSet, key: &KeyContext) -> bool {
    pitch_classes.is_subset(&key.tonic_chord)
}

pub fn is_dominant_chord(pitch_classes: &PitchClassSet, key: &KeyContext) -> bool {
    pitch_classes.is_subset(&key.dominant_chord)
}

/// At least two of the sounding notes are the tonic, in any octave.
pub fn is_octave(pitch_classes: &[u8], key: &KeyContext) -> bool {
    let Some(tonic) = key.tonic else {
        return false;
    };
    pitch_classes.len() >= 2 && pitch_classes.iter().filter(|&&pc| pc % 12 == tonic).count() >= 2
}

/// Some note of `group` repeats the pitch of `notes[index]`.
pub fn is_repeated_pitch(index: usize, group: &[usize], notes: &[Note]) -> bool {
    let pitch = notes[index].pitch;
    group.iter().any(|&i| i != index && notes[i].pitch == pitch)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceVerdict {
    /// A dominant group resolves into this extended tonic/octave group.
    Authentic,
    None,
    /// The key context has no chord sets to compare against.
    Indeterminate,
}

impl CadenceVerdict {
    pub fn is_cadence(&self) -> bool {
        matches!(self, CadenceVerdict::Authentic)
    }
}

/// Decide whether the group of simultaneously sounding notes `playing`
/// closes an authentic cadence.
///
/// The group needs at least three notes forming a tonic chord or a tonic
/// octave, one of them extended. Earlier groups of three or more notes are
/// then walked backwards: tonic groups are passed over, a dominant group
/// confirms the cadence, anything else ends the search.
pub fn detect_cadence(
    playing: &[usize],
    index: &IntervalIndex<'_>,
    key: &KeyContext,
    profile: &DurationProfile,
) -> CadenceVerdict {
    if !key.is_determinate() {
        return CadenceVerdict::Indeterminate;
    }
    if playing.len() < 3 {
        return CadenceVerdict::None;
    }

    let notes = index.notes();
    if !is_tonic_group(playing, notes, key) {
        return CadenceVerdict::None;
    }
    if !playing.iter().any(|&i| profile.is_extended(&notes[i])) {
        return CadenceVerdict::None;
    }

    let Some(&first) = playing.iter().min() else {
        return CadenceVerdict::None;
    };

    for earlier in (0..first).rev() {
        let group = index.notes_currently_playing(earlier);
        if group.len() < 3 {
            continue;
        }
        let classes = PitchClassSet::from_notes(group.iter().map(|&i| &notes[i]));
        if is_dominant_chord(&classes, key) {
            return CadenceVerdict::Authentic;
        }
        if is_tonic_group(&group, notes, key) {
            continue;
        }
        break;
    }

    CadenceVerdict::None
}

fn is_tonic_group(group: &[usize], notes: &[Note], key: &KeyContext) -> bool {
    let classes: Vec<u8> = group.iter().map(|&i| notes[i].pitch_class()).collect();
    is_tonic_chord(&PitchClassSet::from_pitch_classes(classes.iter().copied()), key)
        || is_octave(&classes, key)
}
