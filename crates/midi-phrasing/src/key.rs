use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::note::Note;
use crate::Error;

/// Krumhansl-Kessler major key profile (duration-weighted perception studies).
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

const MAJOR_STEPS: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
const NATURAL_MINOR_STEPS: [u8; 7] = [0, 2, 3, 5, 7, 8, 10];

const NOTE_NAMES_SHARP: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
const NOTE_NAMES_FLAT: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];

/// Pitch classes conventionally spelled with flats.
const FLAT_ROOTS: [u8; 6] = [1, 3, 5, 6, 8, 10]; // Db, Eb, F, Gb, Ab, Bb

pub fn pitch_class_name(pitch_class: u8, use_flats: bool) -> &'static str {
    let idx = (pitch_class % 12) as usize;
    if use_flats {
        NOTE_NAMES_FLAT[idx]
    } else {
        NOTE_NAMES_SHARP[idx]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Major,
    Minor,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Major => write!(f, "major"),
            KeyMode::Minor => write!(f, "minor"),
        }
    }
}

/// A set of octave-stripped pitch classes (bit i = pitch class i).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PitchClassSet(u16);

impl PitchClassSet {
    pub const EMPTY: PitchClassSet = PitchClassSet(0);

    pub fn from_pitch_classes<I: IntoIterator<Item = u8>>(pitch_classes: I) -> Self {
        let mut set = Self::EMPTY;
        for pc in pitch_classes {
            set.insert(pc);
        }
        set
    }

    pub fn from_notes<'a, I: IntoIterator<Item = &'a Note>>(notes: I) -> Self {
        Self::from_pitch_classes(notes.into_iter().map(Note::pitch_class))
    }

    pub fn insert(&mut self, pitch_class: u8) {
        self.0 |= 1 << (pitch_class % 12);
    }

    pub fn contains(&self, pitch_class: u8) -> bool {
        self.0 & (1 << (pitch_class % 12)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_subset(&self, other: &PitchClassSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..12u8).filter(move |pc| self.contains(*pc))
    }
}

/// Tonality of a piece and the chord sets cadence detection compares against.
///
/// Built once per piece, read-only afterwards. An indeterminate context has
/// no tonic and empty chord sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyContext {
    pub tonic: Option<u8>,
    pub mode: KeyMode,
    /// Pearson correlation with the best-matching key profile; 1.0 when the
    /// key was supplied rather than estimated.
    pub confidence: f64,
    /// Scale degrees 1, 3, 5.
    pub tonic_chord: PitchClassSet,
    /// Scale degrees 5, 7, 2, 4 (dominant seventh).
    pub dominant_chord: PitchClassSet,
}

impl KeyContext {
    pub fn new(tonic: u8, mode: KeyMode) -> Self {
        let tonic = tonic % 12;
        let degree = |d: usize| scale_degree(tonic, mode, d);
        Self {
            tonic: Some(tonic),
            mode,
            confidence: 1.0,
            tonic_chord: PitchClassSet::from_pitch_classes([degree(1), degree(3), degree(5)]),
            dominant_chord: PitchClassSet::from_pitch_classes([
                degree(5),
                degree(7),
                degree(2),
                degree(4),
            ]),
        }
    }

    pub fn indeterminate() -> Self {
        Self {
            tonic: None,
            mode: KeyMode::Major,
            confidence: 0.0,
            tonic_chord: PitchClassSet::EMPTY,
            dominant_chord: PitchClassSet::EMPTY,
        }
    }

    pub fn is_determinate(&self) -> bool {
        self.tonic.is_some() && !self.tonic_chord.is_empty() && !self.dominant_chord.is_empty()
    }

    fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn uses_flats(&self) -> bool {
        self.tonic.is_some_and(|t| FLAT_ROOTS.contains(&t))
    }

    /// Names of the pitch classes in `set`, spelled for this key.
    pub fn spell(&self, set: &PitchClassSet) -> Vec<&'static str> {
        let flats = self.uses_flats();
        set.iter().map(|pc| pitch_class_name(pc, flats)).collect()
    }
}

/// Pitch class of a 1-based scale degree (major or natural minor).
fn scale_degree(tonic: u8, mode: KeyMode, degree: usize) -> u8 {
    let steps = match mode {
        KeyMode::Major => &MAJOR_STEPS,
        KeyMode::Minor => &NATURAL_MINOR_STEPS,
    };
    (tonic + steps[(degree - 1) % 7]) % 12
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tonic {
            Some(tonic) => write!(f, "{} {}", pitch_class_name(tonic, self.uses_flats()), self.mode),
            None => write!(f, "indeterminate"),
        }
    }
}

impl FromStr for KeyContext {
    type Err = Error;

    /// Accepts "C", "F#m", "Bb minor", "eb major", "A min".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::KeyName(s.to_string());
        let trimmed = s.trim();
        let mut chars = trimmed.chars();

        let letter = chars.next().ok_or_else(invalid)?;
        let mut tonic: i16 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };

        let mut rest = chars.as_str();
        loop {
            if let Some(stripped) = rest.strip_prefix('#') {
                tonic += 1;
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix('b') {
                tonic -= 1;
                rest = stripped;
            } else {
                break;
            }
        }

        let suffix = rest.trim();
        let mode = if suffix == "M" {
            KeyMode::Major
        } else {
            match suffix.to_ascii_lowercase().as_str() {
                "" | "maj" | "major" => KeyMode::Major,
                "m" | "min" | "minor" => KeyMode::Minor,
                _ => return Err(invalid()),
            }
        };

        Ok(KeyContext::new(tonic.rem_euclid(12) as u8, mode))
    }
}

/// Estimate the key of a piece using the Krumhansl-Schmuckler algorithm.
///
/// Builds a duration-weighted pitch-class histogram and correlates it
/// against all 24 major/minor key profiles. The best Pearson correlation
/// determines the key. Returns an indeterminate context for silence.
pub fn detect_key(notes: &[Note]) -> KeyContext {
    let mut histogram = [0.0_f64; 12];
    for note in notes {
        let duration = note.duration();
        if duration.is_finite() && duration > 0.0 {
            histogram[note.pitch_class() as usize] += duration;
        }
    }

    let total: f64 = histogram.iter().sum();
    if total <= 0.0 {
        return KeyContext::indeterminate();
    }

    for h in &mut histogram {
        *h /= total;
    }

    let mut best_root: u8 = 0;
    let mut best_mode = KeyMode::Major;
    let mut best_corr = -1.0_f64;

    for root in 0..12u8 {
        // Rotate histogram so root = index 0
        let mut rotated = [0.0; 12];
        for (i, slot) in rotated.iter_mut().enumerate() {
            *slot = histogram[(i + root as usize) % 12];
        }

        let major_corr = pearson(&rotated, &MAJOR_PROFILE);
        if major_corr > best_corr {
            best_corr = major_corr;
            best_root = root;
            best_mode = KeyMode::Major;
        }

        let minor_corr = pearson(&rotated, &MINOR_PROFILE);
        if minor_corr > best_corr {
            best_corr = minor_corr;
            best_root = root;
            best_mode = KeyMode::Minor;
        }
    }

    KeyContext::new(best_root, best_mode).with_confidence((best_corr * 10000.0).round() / 10000.0)
}

/// Pearson correlation coefficient between two 12-element arrays.
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> f64 {
    let x_mean: f64 = x.iter().sum::<f64>() / 12.0;
    let y_mean: f64 = y.iter().sum::<f64>() / 12.0;

    let mut num = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;

    for i in 0..12 {
        let xd = x[i] - x_mean;
        let yd = y[i] - y_mean;
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    num / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(pitches: &[u8], beat: f64) -> Vec<Note> {
        pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(i as f64 * beat, (i + 1) as f64 * beat, p, 80))
            .collect()
    }

    #[test]
    fn c_major_chord_sets() {
        let key = KeyContext::new(0, KeyMode::Major);
        assert_eq!(key.tonic_chord, PitchClassSet::from_pitch_classes([0, 4, 7]));
        // G B D F
        assert_eq!(key.dominant_chord, PitchClassSet::from_pitch_classes([7, 11, 2, 5]));
        assert_eq!(key.spell(&key.tonic_chord), vec!["C", "E", "G"]);
    }

    #[test]
    fn a_minor_uses_natural_minor_degrees() {
        let key = KeyContext::new(9, KeyMode::Minor);
        // A C E
        assert_eq!(key.tonic_chord, PitchClassSet::from_pitch_classes([9, 0, 4]));
        // E G B D
        assert_eq!(key.dominant_chord, PitchClassSet::from_pitch_classes([4, 7, 11, 2]));
    }

    #[test]
    fn parse_key_names() {
        let key: KeyContext = "F#m".parse().unwrap();
        assert_eq!(key.tonic, Some(6));
        assert_eq!(key.mode, KeyMode::Minor);

        let key: KeyContext = "Bb minor".parse().unwrap();
        assert_eq!(key.tonic, Some(10));
        assert_eq!(key.to_string(), "Bb minor");

        let key: KeyContext = " g ".parse().unwrap();
        assert_eq!(key.tonic, Some(7));
        assert_eq!(key.mode, KeyMode::Major);

        let key: KeyContext = "Cb".parse().unwrap();
        assert_eq!(key.tonic, Some(11));

        assert!(matches!("H".parse::<KeyContext>(), Err(Error::KeyName(_))));
        assert!(matches!("C dorian".parse::<KeyContext>(), Err(Error::KeyName(_))));
        assert!("".parse::<KeyContext>().is_err());
    }

    #[test]
    fn subset_checks() {
        let triad = PitchClassSet::from_pitch_classes([0, 4, 7]);
        let dyad = PitchClassSet::from_pitch_classes([12, 16]);
        assert!(dyad.is_subset(&triad));
        assert!(!triad.is_subset(&dyad));
        assert!(PitchClassSet::EMPTY.is_subset(&triad));
        assert_eq!(triad.len(), 3);
    }

    #[test]
    fn empty_notes_are_indeterminate() {
        let key = detect_key(&[]);
        assert!(!key.is_determinate());
        assert_eq!(key.to_string(), "indeterminate");
    }

    #[test]
    fn c_major_scale_detected() {
        let notes = scale(&[60, 62, 64, 65, 67, 69, 71], 0.5);
        let key = detect_key(&notes);
        assert_eq!(key.tonic, Some(0));
        assert_eq!(key.mode, KeyMode::Major);
        assert!(key.confidence > 0.7, "confidence {} should be > 0.7", key.confidence);
    }

    #[test]
    fn pearson_identical_arrays() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let r = pearson(&a, &a);
        assert!((r - 1.0).abs() < 1e-10, "self-correlation should be 1.0, got {}", r);
    }
}
