//! Note relations, phrase segmentation and expressive humanization for
//! MIDI performances.
//!
//! Notes are addressed by position in a start-sorted sequence. The
//! [`relations`] module answers "what sounds with / after / before this
//! note", [`segment`] cuts a melody into phrases from those answers, and
//! [`humanize`] reshapes velocities and articulation of a melody/bass pair.

pub mod figures;
pub mod humanize;
pub mod key;
pub mod midi;
pub mod note;
pub mod relations;
pub mod segment;

pub use figures::{
    detect_cadence, identify_trills, CadenceVerdict, DurationClass, DurationProfile, Trill,
    TrillSet,
};
pub use humanize::{humanize, HumanizeParams, HumanizeReport};
pub use key::{detect_key, KeyContext, KeyMode, PitchClassSet};
pub use midi::{phrase_file_name, read_parts, write_parts, Part};
pub use note::{sort_notes, validate_notes, validate_part, Note, MIDI_MAX};
pub use relations::IntervalIndex;
pub use segment::{BoundaryTriggers, Phrase, SegmentationContext, SegmentationParams};

/// Errors from phrasing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("MIDI write error: {0}")]
    MidiWrite(String),

    #[error("note sequence is empty")]
    EmptySequence,

    #[error("note {index} has invalid duration ({start}..{end})")]
    InvalidDuration { index: usize, start: f64, end: f64 },

    #[error("note {index} has pitch {pitch} outside 0..=127")]
    PitchOutOfRange { index: usize, pitch: u8 },

    #[error("note {index} has velocity {velocity} outside 0..=127")]
    VelocityOutOfRange { index: usize, velocity: u8 },

    #[error("note {index} starts at {start} before the previous note at {previous}")]
    Unsorted {
        index: usize,
        start: f64,
        previous: f64,
    },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("unrecognised key name: {0}")]
    KeyName(String),
}

pub type Result<T> = std::result::Result<T, Error>;
