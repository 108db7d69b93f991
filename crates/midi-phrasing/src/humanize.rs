//! Expressive reshaping of a melody/bass pair.
//!
//! Each stage edits the notes in place and returns how many notes it
//! touched. [`humanize`] runs them in a fixed order; later stages classify
//! durations that earlier stages have already shortened, so the order is
//! part of the result.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::figures::{is_repeated_pitch, DurationProfile};
use crate::note::{validate_notes, validate_part, Note, MIDI_MAX};
use crate::relations::{
    next_onset_notes, notes_playing_together, notes_same_start_larger_end,
    notes_same_start_smaller_end, previous_notes, staggered_overlaps,
};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanizeParams {
    /// Minimum rest after a melody note, in seconds, before it gets a breath.
    pub breath_silence: f64,
    /// Width of the velocity jitter and step of the repeated-note accent.
    pub velocity_variation: u8,
    pub max_velocity: u8,
    pub staccato_multiplier: f64,
    pub shortened_staccato_multiplier: f64,
    /// A rest longer than this before the next onset already reads as detached.
    pub staccato_gap: f64,
    /// Start delay of a breathed note as a fraction of its duration.
    pub breath_start_multiplier: f64,
    pub breath_velocity_multiplier: f64,
    pub breath_min_velocity: u8,
    /// How far below the melody's average velocity the bass sits.
    pub bass_velocity_offset: u8,
}

impl Default for HumanizeParams {
    fn default() -> Self {
        Self {
            breath_silence: 0.15,
            velocity_variation: 5,
            max_velocity: MIDI_MAX,
            staccato_multiplier: 0.75,
            shortened_staccato_multiplier: 0.4,
            staccato_gap: 0.05,
            breath_start_multiplier: 0.1,
            breath_velocity_multiplier: 0.4,
            breath_min_velocity: 5,
            bass_velocity_offset: 20,
        }
    }
}

impl HumanizeParams {
    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("staccato_multiplier", self.staccato_multiplier),
            ("shortened_staccato_multiplier", self.shortened_staccato_multiplier),
            ("breath_start_multiplier", self.breath_start_multiplier),
            ("breath_velocity_multiplier", self.breath_velocity_multiplier),
        ];
        for (name, value) in fractions {
            // 1.0 would collapse a note to zero length.
            if !(0.0..1.0).contains(&value) {
                return Err(Error::InvalidParams(format!(
                    "humanize.{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("breath_silence", self.breath_silence),
            ("staccato_gap", self.staccato_gap),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParams(format!(
                    "humanize.{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.max_velocity == 0 || self.max_velocity > MIDI_MAX {
            return Err(Error::InvalidParams(format!(
                "humanize.max_velocity must be in 1..=127, got {}",
                self.max_velocity
            )));
        }
        if self.breath_min_velocity > self.max_velocity {
            return Err(Error::InvalidParams(format!(
                "humanize.breath_min_velocity {} exceeds max_velocity {}",
                self.breath_min_velocity, self.max_velocity
            )));
        }
        Ok(())
    }
}

/// Notes edited by each stage of [`humanize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HumanizeReport {
    pub bass_velocity: Option<u8>,
    pub repeated_staccato_bass: usize,
    pub repeated_staccato_melody: usize,
    pub melody_staccato: usize,
    pub randomized: usize,
    pub breath_pauses: usize,
    pub final_repeated_staccato: usize,
}

/// Floored mean velocity, `None` for an empty group.
pub fn average_velocity(notes: &[Note]) -> Option<u8> {
    if notes.is_empty() {
        return None;
    }
    let sum: u32 = notes.iter().map(|n| u32::from(n.velocity)).sum();
    // Mean of u8 values always fits.
    Some((sum / notes.len() as u32) as u8)
}

pub fn normalize_velocity(notes: &mut [Note], velocity: u8) -> usize {
    for note in notes.iter_mut() {
        note.velocity = velocity;
    }
    notes.len()
}

/// Pull `end` toward `start` by `multiplier` of the duration.
fn apply_staccato(note: &mut Note, multiplier: f64) {
    note.end -= multiplier * note.duration();
}

fn accent(velocity: u8, increment: u32, max: u8) -> u8 {
    (u32::from(velocity) + increment).min(u32::from(max)) as u8
}

/// Detach and accent notes that repeat a neighbour's pitch.
///
/// The neighbour is looked for in the next onset group first, then in the
/// previous release group. The accent grows by `velocity_variation` for
/// every note of an unbroken run of forward repeats and resets when the run
/// ends. Notes that are already shortened keep their length and velocity.
pub fn add_staccato_to_repeated_notes(
    notes: &mut [Note],
    params: &HumanizeParams,
    profile: &DurationProfile,
) -> usize {
    let step = u32::from(params.velocity_variation);
    let mut increment = step;
    let mut edited = 0;

    for index in 0..notes.len() {
        if is_repeated_pitch(index, &next_onset_notes(index, notes), notes) {
            if !profile.is_shortened(&notes[index]) {
                let note = &mut notes[index];
                apply_staccato(note, params.staccato_multiplier);
                note.velocity = accent(note.velocity, increment, params.max_velocity);
                increment += step;
                edited += 1;
            }
        } else {
            if is_repeated_pitch(index, &previous_notes(index, notes), notes)
                && !profile.is_shortened(&notes[index])
            {
                let note = &mut notes[index];
                apply_staccato(note, params.staccato_multiplier);
                note.velocity = accent(note.velocity, increment, params.max_velocity);
                edited += 1;
            }
            increment = step;
        }
    }

    edited
}

/// True when the rest before the next onset is already longer than
/// `staccato_gap`.
fn detached_from_next(index: usize, notes: &[Note], params: &HumanizeParams) -> bool {
    match next_onset_notes(index, notes).first() {
        Some(&next) => notes[next].start - notes[index].end > params.staccato_gap,
        None => false,
    }
}

/// Shorten legato melody notes: standard notes by `staccato_multiplier`,
/// shortened notes by `shortened_staccato_multiplier`. Extended notes and
/// notes already followed by a rest are left alone.
pub fn add_staccato_to_melody(
    notes: &mut [Note],
    params: &HumanizeParams,
    profile: &DurationProfile,
) -> usize {
    let mut edited = 0;
    for index in 0..notes.len() {
        if detached_from_next(index, notes, params) {
            continue;
        }
        let multiplier = if profile.is_standard_duration(&notes[index]) {
            params.staccato_multiplier
        } else if profile.is_shortened(&notes[index]) {
            params.shortened_staccato_multiplier
        } else {
            continue;
        };
        apply_staccato(&mut notes[index], multiplier);
        edited += 1;
    }
    edited
}

/// Add uniform jitter of up to `velocity_variation` either way, keeping
/// every velocity in `1..=max_velocity`. A `max_velocity` of 0 is treated
/// as 1.
pub fn randomize_velocity<R: Rng + ?Sized>(
    notes: &mut [Note],
    params: &HumanizeParams,
    rng: &mut R,
) -> usize {
    let spread = i16::from(params.velocity_variation);
    for note in notes.iter_mut() {
        let jitter = rng.gen_range(-spread..=spread);
        let velocity =
            (i16::from(note.velocity) + jitter).clamp(1, i16::from(params.max_velocity.max(1)));
        note.velocity = velocity as u8;
    }
    notes.len()
}

fn soften(velocity: u8, params: &HumanizeParams) -> u8 {
    let v = f64::from(velocity);
    let softened = (v - params.breath_velocity_multiplier * v).round();
    (softened as u8).max(params.breath_min_velocity)
}

/// Delay the onset and soften the attack of long melody notes that lead
/// into a rest.
///
/// A note qualifies when it is extended, the next melody onset comes more
/// than `breath_silence` after its release, and nothing in either part
/// sounds across it from a different onset. Every note struck with it, in
/// both parts, gets the same delay and softening so the chord stays aligned
/// and both parts stay sorted by start: chord tones and notes released later
/// keep their end, notes released earlier move as a whole. Returns the
/// number of melody notes that received a breath.
pub fn add_breath_pauses(
    melody: &mut [Note],
    bass: &mut [Note],
    params: &HumanizeParams,
    profile: &DurationProfile,
) -> usize {
    let mut breathed = vec![false; melody.len()];
    let mut pauses = 0;

    for index in 0..melody.len() {
        if breathed[index] {
            continue;
        }
        let current = melody[index];
        let Some(&next) = next_onset_notes(index, melody).first() else {
            continue;
        };

        if melody[next].start - current.end <= params.breath_silence
            || !profile.is_extended(&current)
            || !staggered_overlaps(&current, melody).is_empty()
            || !staggered_overlaps(&current, bass).is_empty()
        {
            continue;
        }

        let delay = params.breath_start_multiplier * current.duration();

        for i in notes_playing_together(&current, melody) {
            melody[i].start += delay;
            melody[i].velocity = soften(melody[i].velocity, params);
            breathed[i] = true;
        }
        for i in notes_playing_together(&current, bass) {
            bass[i].start += delay;
            bass[i].velocity = soften(bass[i].velocity, params);
        }
        for i in notes_same_start_larger_end(&current, melody) {
            melody[i].start += delay;
            melody[i].velocity = soften(melody[i].velocity, params);
            breathed[i] = true;
        }
        for i in notes_same_start_larger_end(&current, bass) {
            bass[i].start += delay;
            bass[i].velocity = soften(bass[i].velocity, params);
        }
        for i in notes_same_start_smaller_end(&current, melody) {
            melody[i].start += delay;
            melody[i].end += delay;
            melody[i].velocity = soften(melody[i].velocity, params);
            breathed[i] = true;
        }
        for i in notes_same_start_smaller_end(&current, bass) {
            bass[i].start += delay;
            bass[i].end += delay;
            bass[i].velocity = soften(bass[i].velocity, params);
        }

        let note = &mut melody[index];
        note.start += delay;
        note.velocity = soften(note.velocity, params);
        breathed[index] = true;
        pauses += 1;

        debug!(index, delay, velocity = note.velocity, "breath pause");
    }

    pauses
}

/// Run every stage over a melody and an optional accompaniment.
///
/// Order: bass velocity normalisation, repeated-note staccato on both
/// parts, melody staccato, melody velocity jitter, breath pauses, and a
/// second repeated-note pass over the melody. The melody must not be empty;
/// the bass may be.
pub fn humanize<R: Rng + ?Sized>(
    melody: &mut [Note],
    bass: &mut [Note],
    params: &HumanizeParams,
    profile: &DurationProfile,
    rng: &mut R,
) -> Result<HumanizeReport> {
    validate_notes(melody)?;
    validate_part(bass)?;
    params.validate()?;
    profile.validate()?;

    let mut report = HumanizeReport::default();

    let average = average_velocity(melody).ok_or(Error::EmptySequence)?;
    let bass_velocity = average.saturating_sub(params.bass_velocity_offset);
    if !bass.is_empty() {
        normalize_velocity(bass, bass_velocity);
        report.bass_velocity = Some(bass_velocity);
    }
    debug!(average, bass_velocity, "normalized accompaniment");

    report.repeated_staccato_melody = add_staccato_to_repeated_notes(melody, params, profile);
    report.repeated_staccato_bass = add_staccato_to_repeated_notes(bass, params, profile);
    report.melody_staccato = add_staccato_to_melody(melody, params, profile);
    report.randomized = randomize_velocity(melody, params, rng);
    report.breath_pauses = add_breath_pauses(melody, bass, params, profile);
    report.final_repeated_staccato = add_staccato_to_repeated_notes(melody, params, profile);

    info!(
        melody = melody.len(),
        bass = bass.len(),
        staccato = report.melody_staccato,
        breaths = report.breath_pauses,
        "humanized performance"
    );
    Ok(report)
}
