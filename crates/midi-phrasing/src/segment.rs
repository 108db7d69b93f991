use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::figures::{detect_cadence, DurationProfile, TrillSet};
use crate::key::KeyContext;
use crate::note::{validate_notes, Note};
use crate::relations::IntervalIndex;
use crate::{Error, Result};

/// Thresholds for the phrase boundary triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    /// Rest, in seconds, that ends a phrase on its own.
    pub silence: f64,
    /// Relative change in average velocity that counts as a dynamic jump.
    pub velocity_threshold: f64,
    /// How many neighbouring note groups on each side feed the velocity average.
    pub velocity_window: usize,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            silence: 0.3,
            velocity_threshold: 0.5,
            velocity_window: 5,
        }
    }
}

impl SegmentationParams {
    pub fn validate(&self) -> Result<()> {
        if !self.silence.is_finite() || self.silence < 0.0 {
            return Err(Error::InvalidParams(format!(
                "segmentation.silence must be non-negative, got {}",
                self.silence
            )));
        }
        if !self.velocity_threshold.is_finite() || self.velocity_threshold <= 0.0 {
            return Err(Error::InvalidParams(format!(
                "segmentation.velocity_threshold must be positive, got {}",
                self.velocity_threshold
            )));
        }
        Ok(())
    }
}

/// Which discontinuities closed a phrase. All false for the trailing phrase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryTriggers {
    pub silence: bool,
    pub velocity_change: bool,
    pub cadence: bool,
    pub trill: bool,
}

impl BoundaryTriggers {
    pub fn any(&self) -> bool {
        self.silence || self.velocity_change || self.cadence || self.trill
    }
}

/// A contiguous run of notes, `start..end` in sequence positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub start: usize,
    pub end: usize,
    pub triggers: BoundaryTriggers,
}

impl Phrase {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn notes<'a>(&self, notes: &'a [Note]) -> &'a [Note] {
        &notes[self.range()]
    }

    /// First onset and last release of the phrase, in seconds.
    pub fn time_span(&self, notes: &[Note]) -> (f64, f64) {
        let slice = self.notes(notes);
        let start = slice.first().map(|n| n.start).unwrap_or(0.0);
        let end = slice.iter().map(|n| n.end).fold(start, f64::max);
        (start, end)
    }
}

/// Per-piece state for phrase segmentation.
///
/// Holds the key and the trills detected in the piece, both computed once
/// up front and read while scanning.
#[derive(Debug, Clone)]
pub struct SegmentationContext {
    key: KeyContext,
    profile: DurationProfile,
    params: SegmentationParams,
    trills: TrillSet,
}

impl SegmentationContext {
    pub fn new(
        notes: &[Note],
        key: KeyContext,
        profile: DurationProfile,
        params: SegmentationParams,
    ) -> Result<Self> {
        validate_notes(notes)?;
        profile.validate()?;
        params.validate()?;

        let trills = TrillSet::detect(notes, &profile);
        debug!(trills = trills.len(), key = %key, "segmentation context ready");

        Ok(Self {
            key,
            profile,
            params,
            trills,
        })
    }

    pub fn key(&self) -> &KeyContext {
        &self.key
    }

    pub fn trills(&self) -> &TrillSet {
        &self.trills
    }

    /// Partition `notes` into phrases in a single left-to-right pass.
    ///
    /// A note group (a note and everything concurrent with it) closes a
    /// phrase when it is followed by a long rest, a jump in dynamics, when
    /// it resolves a cadence, or when its last-released note ends a trill.
    /// The returned phrases are non-empty, contiguous and cover the whole
    /// sequence.
    pub fn segment(&self, notes: &[Note]) -> Result<Vec<Phrase>> {
        validate_notes(notes)?;

        let index = IntervalIndex::new(notes);
        let mut visited = vec![false; notes.len()];
        let mut phrases = Vec::new();
        let mut phrase_start = 0;

        for current in 0..notes.len() {
            if visited[current] {
                continue;
            }

            let concurrent = index.concurrent_notes(&notes[current]);
            let next = index.next_notes(current);
            let Some(&next_anchor) = next.first() else {
                continue;
            };
            let last = last_released(current, &concurrent, notes);

            let mut playing = concurrent.clone();
            playing.push(current);

            let triggers = BoundaryTriggers {
                silence: notes[next_anchor].start - notes[last].end >= self.params.silence,
                velocity_change: sudden_velocity_change(current, &next, &index, &self.params),
                cadence: detect_cadence(&playing, &index, &self.key, &self.profile).is_cadence(),
                trill: self.trills.is_terminal(last),
            };
            if !triggers.any() {
                continue;
            }

            visited[current] = true;
            for &i in &concurrent {
                visited[i] = true;
            }

            // A long note that started in an earlier phrase can be the last
            // one released; never move the boundary backwards.
            let boundary = (last + 1).max(phrase_start);
            if boundary > phrase_start {
                debug!(
                    start = phrase_start,
                    end = boundary,
                    silence = triggers.silence,
                    velocity_change = triggers.velocity_change,
                    cadence = triggers.cadence,
                    trill = triggers.trill,
                    "phrase boundary"
                );
                phrases.push(Phrase {
                    start: phrase_start,
                    end: boundary,
                    triggers,
                });
                phrase_start = boundary;
            }
        }

        if phrase_start < notes.len() {
            phrases.push(Phrase {
                start: phrase_start,
                end: notes.len(),
                triggers: BoundaryTriggers::default(),
            });
        }

        info!(notes = notes.len(), phrases = phrases.len(), "segmented note sequence");
        Ok(phrases)
    }
}

/// The note of the group released last. Ties go to the later position so a
/// chord released together stays in one phrase.
fn last_released(current: usize, concurrent: &[usize], notes: &[Note]) -> usize {
    concurrent
        .iter()
        .copied()
        .chain(std::iter::once(current))
        .fold(current, |best, i| {
            let (e, b) = (notes[i].end, notes[best].end);
            if e > b || (e == b && i > best) {
                i
            } else {
                best
            }
        })
}

/// Whether the dynamics jump between the group sounding at `index` and the
/// group `next` that follows it.
///
/// Each side averages its own group with up to `velocity_window` neighbouring
/// groups (backwards for the current side, forwards for the next side),
/// skipping groups that share a note with the reference group. The per-group
/// averages are averaged again and floored before comparing.
pub fn sudden_velocity_change(
    index: usize,
    next: &[usize],
    interval_index: &IntervalIndex<'_>,
    params: &SegmentationParams,
) -> bool {
    let notes = interval_index.notes();

    let Some(&last_next) = next.iter().max() else {
        return false;
    };

    let current = interval_index.notes_currently_playing(index);
    let mut before: Vec<f64> = mean_velocity(&current, notes).into_iter().collect();
    let mut offset = 0;
    let mut taken = 0;
    while taken < params.velocity_window && offset <= index {
        let group = interval_index.notes_currently_playing(index - offset);
        offset += 1;
        if group.iter().any(|i| current.contains(i)) {
            continue;
        }
        before.extend(mean_velocity(&group, notes));
        taken += 1;
    }

    let mut after: Vec<f64> = mean_velocity(next, notes).into_iter().collect();
    offset = 0;
    taken = 0;
    while taken < params.velocity_window && last_next + offset < notes.len() {
        let group = interval_index.notes_currently_playing(last_next + offset);
        offset += 1;
        if group.iter().any(|i| next.contains(i)) {
            continue;
        }
        after.extend(mean_velocity(&group, notes));
        taken += 1;
    }

    let (Some(current_avg), Some(next_avg)) = (floored_mean(&before), floored_mean(&after)) else {
        return false;
    };
    (current_avg - next_avg).abs() >= params.velocity_threshold * current_avg
}

fn mean_velocity(group: &[usize], notes: &[Note]) -> Option<f64> {
    if group.is_empty() {
        return None;
    }
    let sum: f64 = group.iter().map(|&i| f64::from(notes[i].velocity)).sum();
    Some(sum / group.len() as f64)
}

fn floored_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some((values.iter().sum::<f64>() / values.len() as f64).floor())
}
