//! Neighbour queries over an ordered note sequence.
//!
//! Every query assumes the sequence is sorted by `start` (see
//! [`crate::validate_notes`]) and stops scanning as soon as a note starts
//! after the reference note has ended. Results are positional indices into
//! the sequence that was passed in.

use std::ops::Range;

use crate::note::Note;

/// Indices of notes of a different pitch whose intervals overlap `note`.
///
/// Same-pitch notes are never concurrent, so a note is never concurrent
/// with itself or with a repetition of its own pitch.
pub fn concurrent_notes(note: &Note, notes: &[Note]) -> Vec<usize> {
    concurrent_in(note, notes, 0..notes.len())
}

/// `concurrent_notes(notes[index])` plus `index` itself, in that order.
pub fn notes_currently_playing(index: usize, notes: &[Note]) -> Vec<usize> {
    let mut playing = concurrent_notes(&notes[index], notes);
    playing.push(index);
    playing
}

/// The group of notes that follows `notes[index]` once it has been released.
///
/// The first returned index is the earliest note that starts strictly after
/// the reference note's end and is not concurrent with it. The remaining
/// indices are that note's own concurrent partners, ascending. Empty when
/// nothing starts after the reference note ends.
///
/// Phrase segmentation asks this question. The transform pass asks a
/// different one, see [`next_onset_notes`].
pub fn next_notes(index: usize, notes: &[Note]) -> Vec<usize> {
    let current = &notes[index];
    let concurrent = concurrent_notes(current, notes);

    let anchor = (index + 1..notes.len())
        .filter(|candidate| !concurrent.contains(candidate))
        .find(|&candidate| notes[candidate].start > current.end);

    match anchor {
        Some(anchor) => group_around(anchor, concurrent_notes(&notes[anchor], notes)),
        None => Vec::new(),
    }
}

/// The next onset group after `notes[index]` starts, regardless of whether
/// it has been released yet.
///
/// Collects every later note sharing the first onset strictly after the
/// reference note's onset. Notes struck together with the reference note
/// are skipped.
pub fn next_onset_notes(index: usize, notes: &[Note]) -> Vec<usize> {
    let current = &notes[index];
    let mut following = Vec::new();
    let mut group_start: Option<f64> = None;

    for (candidate, note) in notes.iter().enumerate().skip(index + 1) {
        if note.start <= current.start {
            continue;
        }
        match group_start {
            None => group_start = Some(note.start),
            Some(start) if note.start > start => break,
            Some(_) => {}
        }
        following.push(candidate);
    }

    following
}

/// Backward counterpart of [`next_onset_notes`]: walks towards the start of
/// the sequence collecting notes that end before `notes[index]` starts,
/// stopping at the first one that ends earlier than the first match.
pub fn previous_notes(index: usize, notes: &[Note]) -> Vec<usize> {
    let current = &notes[index];
    let mut preceding = Vec::new();
    let mut group_end: Option<f64> = None;

    for candidate in (0..index).rev() {
        let end = notes[candidate].end;
        if end >= current.start {
            continue;
        }
        match group_end {
            None => group_end = Some(end),
            Some(first_end) if end < first_end => break,
            Some(_) => {}
        }
        preceding.push(candidate);
    }

    preceding
}

/// Chord tones: notes with exactly the same start and end but another pitch.
pub fn notes_playing_together(note: &Note, notes: &[Note]) -> Vec<usize> {
    scan_until_release(note, notes, |other| {
        other.pitch != note.pitch && other.start == note.start && other.end == note.end
    })
}

/// Notes struck with `note` that are released before it.
pub fn notes_same_start_smaller_end(note: &Note, notes: &[Note]) -> Vec<usize> {
    scan_until_release(note, notes, |other| {
        other.pitch != note.pitch && other.start == note.start && other.end < note.end
    })
}

/// Notes struck with `note` that are still sounding after it is released.
pub fn notes_same_start_larger_end(note: &Note, notes: &[Note]) -> Vec<usize> {
    scan_until_release(note, notes, |other| {
        other.pitch != note.pitch && other.start == note.start && other.end > note.end
    })
}

/// Notes overlapping `note` that were not struck at the same instant.
///
/// Used by the breath-pause stage: chord tones sharing the onset move with
/// the breathed note, anything else sounding across it blocks the pause.
pub fn staggered_overlaps(note: &Note, notes: &[Note]) -> Vec<usize> {
    scan_until_release(note, notes, |other| {
        other.start != note.start && note.overlaps(other)
    })
}

fn scan_until_release<F>(note: &Note, notes: &[Note], mut matches: F) -> Vec<usize>
where
    F: FnMut(&Note) -> bool,
{
    let mut found = Vec::new();
    for (index, other) in notes.iter().enumerate() {
        if other.start > note.end {
            break;
        }
        if matches(other) {
            found.push(index);
        }
    }
    found
}

fn concurrent_in(note: &Note, notes: &[Note], range: Range<usize>) -> Vec<usize> {
    let mut found = Vec::new();
    for index in range {
        let other = &notes[index];
        if other.start > note.end {
            break;
        }
        if other.pitch != note.pitch && note.overlaps(other) {
            found.push(index);
        }
    }
    found
}

fn group_around(anchor: usize, partners: Vec<usize>) -> Vec<usize> {
    let mut rest: Vec<usize> = partners.into_iter().filter(|&i| i != anchor).collect();
    rest.sort_unstable();
    rest.dedup();

    let mut group = Vec::with_capacity(rest.len() + 1);
    group.push(anchor);
    group.extend(rest);
    group
}

/// Sorted interval index over a note sequence.
///
/// Keeps a running maximum of note ends so overlap queries can binary-search
/// past the prefix of notes that were all released before the reference
/// note starts. Answers are identical, index for index, to the linear
/// scans above; use it when the same sequence is queried from an outer loop.
#[derive(Debug, Clone)]
pub struct IntervalIndex<'a> {
    notes: &'a [Note],
    max_end: Vec<f64>,
}

impl<'a> IntervalIndex<'a> {
    /// The sequence must already be sorted by start.
    pub fn new(notes: &'a [Note]) -> Self {
        let mut max_end = Vec::with_capacity(notes.len());
        let mut running = f64::NEG_INFINITY;
        for note in notes {
            running = running.max(note.end);
            max_end.push(running);
        }
        Self { notes, max_end }
    }

    pub fn notes(&self) -> &'a [Note] {
        self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Positions that could possibly overlap `note`.
    fn candidates(&self, note: &Note) -> Range<usize> {
        let lo = self.max_end.partition_point(|&end| end < note.start);
        let hi = self.notes.partition_point(|other| other.start <= note.end);
        lo..hi.max(lo)
    }

    pub fn concurrent_notes(&self, note: &Note) -> Vec<usize> {
        concurrent_in(note, self.notes, self.candidates(note))
    }

    pub fn notes_currently_playing(&self, index: usize) -> Vec<usize> {
        let mut playing = self.concurrent_notes(&self.notes[index]);
        playing.push(index);
        playing
    }

    /// Same contract as the free function [`next_notes`].
    pub fn next_notes(&self, index: usize) -> Vec<usize> {
        let current = &self.notes[index];
        let first_after = self.notes.partition_point(|other| other.start <= current.end);
        let anchor = first_after.max(index + 1);
        if anchor >= self.notes.len() {
            return Vec::new();
        }
        group_around(anchor, self.concurrent_notes(&self.notes[anchor]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn note(start: f64, end: f64, pitch: u8) -> Note {
        Note::new(start, end, pitch, 80)
    }

    /// Two-note chord, a 0.5s rest, then a single note.
    fn chord_then_note() -> Vec<Note> {
        vec![note(0.0, 1.0, 60), note(0.0, 1.0, 64), note(1.5, 2.0, 67)]
    }

    #[test]
    fn chord_tones_are_concurrent() {
        let notes = chord_then_note();
        assert_eq!(concurrent_notes(&notes[0], &notes), vec![1]);
        assert_eq!(concurrent_notes(&notes[1], &notes), vec![0]);
        assert_eq!(concurrent_notes(&notes[2], &notes), Vec::<usize>::new());
    }

    #[test]
    fn next_notes_after_chord() {
        let notes = chord_then_note();
        assert_eq!(next_notes(0, &notes), vec![2]);
        assert_eq!(next_notes(1, &notes), vec![2]);
        assert!(next_notes(2, &notes).is_empty());
    }

    #[test]
    fn same_pitch_is_never_concurrent() {
        let notes = vec![note(0.0, 1.0, 60), note(0.5, 1.5, 60), note(0.5, 1.5, 64)];
        for (index, n) in notes.iter().enumerate() {
            for other in concurrent_notes(n, &notes) {
                assert_ne!(notes[other].pitch, n.pitch, "note {} vs {}", index, other);
            }
        }
        assert_eq!(concurrent_notes(&notes[0], &notes), vec![2]);
    }

    #[test]
    fn currently_playing_includes_self_last() {
        let notes = chord_then_note();
        assert_eq!(notes_currently_playing(0, &notes), vec![1, 0]);
    }

    #[test]
    fn next_notes_waits_for_release() {
        // The second note starts while the first is still sounding.
        let notes = vec![note(0.0, 1.0, 60), note(0.5, 0.9, 62), note(1.2, 1.4, 64)];
        assert_eq!(next_notes(0, &notes), vec![2]);
        assert_eq!(next_onset_notes(0, &notes), vec![1]);
    }

    #[test]
    fn next_notes_collects_partners_of_the_next_group() {
        let notes = vec![
            note(0.0, 0.5, 60),
            note(1.0, 1.5, 64),
            note(1.0, 1.5, 67),
            note(1.2, 1.4, 72),
            note(2.0, 2.5, 60),
        ];
        assert_eq!(next_notes(0, &notes), vec![1, 2, 3]);
    }

    #[test]
    fn next_onset_notes_skips_chord_tones_and_stops_at_second_onset() {
        let notes = vec![
            note(0.0, 0.25, 60),
            note(0.0, 0.25, 64),
            note(0.25, 0.5, 62),
            note(0.25, 0.5, 65),
            note(0.5, 0.75, 64),
        ];
        assert_eq!(next_onset_notes(0, &notes), vec![2, 3]);
        assert_eq!(next_onset_notes(2, &notes), vec![4]);
        assert!(next_onset_notes(4, &notes).is_empty());
    }

    #[test]
    fn previous_notes_finds_last_released_group() {
        let notes = vec![
            note(0.0, 0.25, 60),
            note(0.25, 0.45, 62),
            note(0.25, 0.45, 65),
            note(0.5, 0.75, 64),
        ];
        assert_eq!(previous_notes(3, &notes), vec![2, 1]);
        assert!(previous_notes(0, &notes).is_empty());
    }

    #[test]
    fn together_and_same_start_queries() {
        let notes = vec![
            note(1.0, 1.5, 48),
            note(1.0, 1.2, 52),
            note(1.0, 1.5, 55),
            note(1.0, 1.5, 60),
            note(2.0, 2.5, 60),
        ];
        let reference = notes[3];
        assert_eq!(notes_playing_together(&reference, &notes), vec![0, 2]);
        assert_eq!(notes_same_start_smaller_end(&reference, &notes), vec![1]);
        assert!(notes_same_start_larger_end(&reference, &notes).is_empty());
        assert_eq!(notes_same_start_larger_end(&notes[1], &notes), vec![0, 2, 3]);
    }

    #[test]
    fn staggered_overlaps_ignore_shared_onsets() {
        let notes = vec![
            note(0.0, 2.0, 36),
            note(1.0, 1.5, 60),
            note(1.0, 1.5, 64),
            note(1.2, 1.8, 67),
        ];
        assert_eq!(staggered_overlaps(&notes[1], &notes), vec![0, 3]);
    }

    fn random_sequence(seed: u64, len: usize) -> Vec<Note> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut notes = Vec::with_capacity(len);
        let mut onset = 0.0;
        for _ in 0..len {
            // Quantised onsets so simultaneous starts actually occur.
            onset += f64::from(rng.gen_range(0u8..3)) * 0.125;
            let length = f64::from(rng.gen_range(1u8..8)) * 0.125;
            notes.push(note(onset, onset + length, rng.gen_range(55u8..70)));
        }
        notes
    }

    #[test]
    fn interval_index_matches_linear_scans() {
        for seed in 0..20 {
            let notes = random_sequence(seed, 60);
            let index = IntervalIndex::new(&notes);
            for i in 0..notes.len() {
                assert_eq!(
                    index.concurrent_notes(&notes[i]),
                    concurrent_notes(&notes[i], &notes),
                    "seed {} note {}",
                    seed,
                    i
                );
                assert_eq!(
                    index.notes_currently_playing(i),
                    notes_currently_playing(i, &notes)
                );
                assert_eq!(index.next_notes(i), next_notes(i, &notes), "seed {} note {}", seed, i);
            }
        }
    }
}
