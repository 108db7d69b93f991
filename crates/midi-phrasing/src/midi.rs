//! Standard MIDI File input and output in seconds.
//!
//! Reading resolves the file's tempo map so every [`Note`] carries absolute
//! times; writing always uses a fixed 480 PPQ grid at 120 BPM, where one
//! second is 960 ticks.

use std::collections::HashMap;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::note::{sort_notes, Note, MIDI_MAX};
use crate::segment::Phrase;
use crate::{Error, Result};

/// Ticks per quarter note in written files.
pub const PPQ: u16 = 480;

/// 120 BPM, the SMF default tempo.
pub const DEFAULT_TEMPO: u32 = 500_000;

const MAX_VLQ: u64 = 0x0FFF_FFFF;

/// The notes of one track, sorted by start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub name: Option<String>,
    pub track_index: usize,
    pub notes: Vec<Note>,
}

impl Part {
    pub fn new(name: impl Into<String>, notes: Vec<Note>) -> Self {
        Self {
            name: Some(name.into()),
            track_index: 0,
            notes,
        }
    }
}

/// Tick to seconds conversion for a parsed file.
enum Clock {
    /// Tempo segments as (start tick, seconds at that tick, microseconds per beat).
    Metrical {
        ppq: f64,
        segments: Vec<(u64, f64, u32)>,
    },
    Timecode {
        ticks_per_second: f64,
    },
}

impl Clock {
    fn from_smf(smf: &Smf) -> Self {
        let ppq = match smf.header.timing {
            Timing::Metrical(ticks) => f64::from(ticks.as_int().max(1)),
            Timing::Timecode(fps, subframes) => {
                return Clock::Timecode {
                    ticks_per_second: f64::from(fps.as_f32()) * f64::from(subframes.max(1)),
                };
            }
        };

        // Tempo events can live on any track in format 1.
        let mut changes = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    changes.push((tick, tempo.as_int()));
                }
            }
        }
        changes.sort_by_key(|&(tick, _)| tick);

        let mut segments = vec![(0u64, 0.0f64, DEFAULT_TEMPO)];
        for (tick, usec) in changes {
            let Some(&(last_tick, last_seconds, last_usec)) = segments.last() else {
                continue;
            };
            let seconds = last_seconds + ticks_to_seconds(tick - last_tick, ppq, last_usec);
            if tick == last_tick {
                segments.pop();
            }
            segments.push((tick, seconds, usec));
        }

        Clock::Metrical { ppq, segments }
    }

    fn seconds(&self, tick: u64) -> f64 {
        match self {
            Clock::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
            Clock::Metrical { ppq, segments } => {
                let at = segments.partition_point(|&(start, _, _)| start <= tick);
                let (start, seconds, usec) = segments[at.saturating_sub(1)];
                seconds + ticks_to_seconds(tick - start, *ppq, usec)
            }
        }
    }
}

fn ticks_to_seconds(ticks: u64, ppq: f64, usec_per_beat: u32) -> f64 {
    ticks as f64 / ppq * f64::from(usec_per_beat) / 1_000_000.0
}

fn seconds_to_ticks(seconds: f64) -> u64 {
    (seconds * f64::from(PPQ) * 1_000_000.0 / f64::from(DEFAULT_TEMPO)).round() as u64
}

/// Parse a Standard MIDI File into one [`Part`] per track that has notes.
///
/// Note-on/note-off pairs are matched per (channel, pitch), most recent
/// onset first. Notes still sounding at the end of a track are closed
/// there. Zero-length notes are dropped.
pub fn read_parts(bytes: &[u8]) -> Result<Vec<Part>> {
    let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
    let clock = Clock::from_smf(&smf);
    let mut parts = Vec::new();

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        let mut name: Option<String> = None;
        let mut pending: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
        let mut spans: Vec<(u64, u64, u8, u8)> = Vec::new();

        for event in track {
            tick += u64::from(event.delta.as_int());

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_none() => {
                    name = Some(String::from_utf8_lossy(raw).trim().to_string());
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            pending
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push((tick, vel.as_int()));
                        }
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            let slot = (ch, key.as_int());
                            if let Some((onset, velocity)) =
                                pending.get_mut(&slot).and_then(|stack| stack.pop())
                            {
                                spans.push((onset, tick, slot.1, velocity));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        for ((_, pitch), stack) in pending {
            for (onset, velocity) in stack {
                spans.push((onset, tick, pitch, velocity));
            }
        }

        let mut notes: Vec<Note> = spans
            .into_iter()
            .filter(|&(onset, offset, _, _)| offset > onset)
            .map(|(onset, offset, pitch, velocity)| {
                Note::new(clock.seconds(onset), clock.seconds(offset), pitch, velocity)
            })
            .collect();
        if notes.is_empty() {
            continue;
        }
        sort_notes(&mut notes);

        debug!(track_index, notes = notes.len(), name = ?name, "read part");
        parts.push(Part {
            name: name.filter(|n| !n.is_empty()),
            track_index,
            notes,
        });
    }

    Ok(parts)
}

/// Serialise parts as a format-1 file: a tempo track followed by one track
/// per part, each on its own channel (the percussion channel is skipped).
pub fn write_parts(parts: &[Part]) -> Result<Vec<u8>> {
    let track_count = u16::try_from(parts.len() + 1)
        .map_err(|_| Error::MidiWrite(format!("too many parts: {}", parts.len())))?;

    let mut tracks = vec![tempo_track()];
    for (i, part) in parts.iter().enumerate() {
        tracks.push(part_track(part, i)?);
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&track_count.to_be_bytes());
    buf.extend_from_slice(&PPQ.to_be_bytes());

    for track in &tracks {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track.len() as u32).to_be_bytes());
        buf.extend_from_slice(track);
    }

    Ok(buf)
}

fn tempo_track() -> Vec<u8> {
    let mut track = Vec::new();
    write_vlq(&mut track, 0);
    track.extend_from_slice(&[
        0xFF,
        0x51,
        0x03,
        (DEFAULT_TEMPO >> 16) as u8,
        (DEFAULT_TEMPO >> 8) as u8,
        DEFAULT_TEMPO as u8,
    ]);
    write_vlq(&mut track, 0);
    track.extend_from_slice(&[0xFF, 0x2F, 0x00]);
    track
}

fn channel_for(part_index: usize) -> u8 {
    const CHANNELS: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12, 13, 14, 15];
    CHANNELS[part_index % CHANNELS.len()]
}

fn part_track(part: &Part, part_index: usize) -> Result<Vec<u8>> {
    let channel = channel_for(part_index);
    let mut events: Vec<(u64, Vec<u8>)> = Vec::new();

    let name = part
        .name
        .clone()
        .unwrap_or_else(|| format!("Part {}", part_index));
    let mut name_event = vec![0xFF, 0x03];
    write_vlq(&mut name_event, name.len() as u32);
    name_event.extend_from_slice(name.as_bytes());
    events.push((0, name_event));

    for (index, note) in part.notes.iter().enumerate() {
        if !note.start.is_finite()
            || !note.end.is_finite()
            || note.start < 0.0
            || note.end < note.start
        {
            return Err(Error::MidiWrite(format!(
                "part {} note {} has unwritable times {}..{}",
                part_index, index, note.start, note.end
            )));
        }
        if note.pitch > MIDI_MAX || note.velocity > MIDI_MAX {
            return Err(Error::MidiWrite(format!(
                "part {} note {} has pitch {} velocity {}",
                part_index, index, note.pitch, note.velocity
            )));
        }
        let on = seconds_to_ticks(note.start);
        // Keep at least one tick so the note survives a round trip.
        let off = seconds_to_ticks(note.end).max(on + 1);
        if off > MAX_VLQ {
            return Err(Error::MidiWrite(format!(
                "part {} note {} ends beyond the writable range",
                part_index, index
            )));
        }
        // A note-on with velocity 0 would read back as a note-off.
        events.push((on, vec![0x90 | channel, note.pitch, note.velocity.max(1)]));
        events.push((off, vec![0x80 | channel, note.pitch, 0]));
    }

    // Note-offs before note-ons at the same tick.
    events.sort_by(|a, b| {
        a.0.cmp(&b.0).then_with(|| {
            let a_off = a.1.first().is_some_and(|s| s & 0xF0 == 0x80);
            let b_off = b.1.first().is_some_and(|s| s & 0xF0 == 0x80);
            b_off.cmp(&a_off)
        })
    });

    let mut track = Vec::new();
    let mut last_tick = 0u64;
    for (tick, data) in events {
        write_vlq(&mut track, (tick - last_tick) as u32);
        track.extend_from_slice(&data);
        last_tick = tick;
    }
    write_vlq(&mut track, 0);
    track.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    Ok(track)
}

fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    buf.extend_from_slice(&bytes);
}

/// `{stem}_phrase_{index}_start_{s}_end_{e}.mid`, with the phrase's first
/// onset and last release truncated to whole seconds.
pub fn phrase_file_name(stem: &str, index: usize, phrase: &Phrase, notes: &[Note]) -> String {
    let (start, end) = phrase.time_span(notes);
    format!(
        "{}_phrase_{}_start_{}_end_{}.mid",
        stem,
        index,
        start.trunc() as u64,
        end.trunc() as u64
    )
}
