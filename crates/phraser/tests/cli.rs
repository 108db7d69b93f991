//! Tests for the phraser command line
//!
//! Each test writes a small MIDI file into a temporary directory and runs
//! the binary there, so no config file from the developer's checkout leaks in.

use assert_cmd::Command;
use midi_phrasing::{read_parts, write_parts, Note, Part};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn phraser(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("phraser").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("PHRASING_LOG_LEVEL")
        .env_remove("PHRASING_SEED");
    cmd
}

fn write_midi(dir: &TempDir, name: &str, parts: &[Part]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, write_parts(parts).unwrap()).unwrap();
    path
}

/// Two groups of three detached notes separated by half a second of rest.
fn two_phrase_melody() -> Vec<Note> {
    (0..6)
        .map(|i| {
            let start = i as f64 * 0.25 + if i >= 3 { 0.5 } else { 0.0 };
            Note::new(start, start + 0.2, if i % 2 == 0 { 60 } else { 62 }, 80)
        })
        .collect()
}

#[test]
fn segment_writes_one_file_per_phrase() {
    let dir = TempDir::new().unwrap();
    let input = write_midi(&dir, "piece.mid", &[Part::new("melody", two_phrase_melody())]);

    phraser(dir.path())
        .arg("segment")
        .arg(&input)
        .arg("phrases")
        .arg("--key")
        .arg("C")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 phrases"))
        .stdout(predicate::str::contains("Key: C major"));

    let first = dir.path().join("phrases/piece_phrase_0_start_0_end_0.mid");
    let second = dir.path().join("phrases/piece_phrase_1_start_1_end_1.mid");
    let parts = read_parts(&fs::read(first).unwrap()).unwrap();
    assert_eq!(parts[0].notes.len(), 3);
    let parts = read_parts(&fs::read(second).unwrap()).unwrap();
    assert_eq!(parts[0].notes.len(), 3);
}

#[test]
fn segment_rejects_unknown_key() {
    let dir = TempDir::new().unwrap();
    let input = write_midi(&dir, "piece.mid", &[Part::new("melody", two_phrase_melody())]);

    phraser(dir.path())
        .args(["segment", "--key", "H"])
        .arg(&input)
        .arg("out")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognised key name"));
}

#[test]
fn segment_rejects_missing_track() {
    let dir = TempDir::new().unwrap();
    let input = write_midi(&dir, "piece.mid", &[Part::new("melody", two_phrase_melody())]);

    phraser(dir.path())
        .arg("segment")
        .arg(&input)
        .arg("out")
        .args(["--track", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("part 3 does not exist"));
}

#[test]
fn humanize_writes_both_parts() {
    let dir = TempDir::new().unwrap();
    let melody = vec![
        Note::new(0.0, 0.25, 72, 90),
        Note::new(0.25, 0.5, 74, 90),
        Note::new(0.5, 1.0, 76, 90),
        Note::new(1.2, 1.45, 77, 90),
    ];
    let bass = vec![Note::new(0.0, 0.45, 48, 40), Note::new(1.2, 1.7, 43, 100)];
    let input = write_midi(
        &dir,
        "duet.mid",
        &[Part::new("melody", melody), Part::new("bass", bass)],
    );
    let output = dir.path().join("duet_human.mid");

    phraser(dir.path())
        .arg("humanize")
        .arg(&input)
        .arg(&output)
        .args(["--seed", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("seed 5"))
        .stdout(predicate::str::contains("1 breath pauses"));

    let parts = read_parts(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(parts.len(), 2);
    assert!(parts[1].notes.iter().all(|n| n.velocity == 70));
}

#[test]
fn trills_are_listed() {
    let dir = TempDir::new().unwrap();
    let notes = vec![
        Note::new(0.0, 0.05, 60, 80),
        Note::new(0.05, 0.1, 60, 80),
        Note::new(0.1, 0.15, 60, 80),
        Note::new(0.15, 0.55, 64, 80),
    ];
    let input = write_midi(&dir, "trill.mid", &[Part::new("melody", notes)]);

    phraser(dir.path())
        .arg("trills")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 trill(s)"))
        .stdout(predicate::str::contains("-> pitch 64 [3]"));
}

#[test]
fn key_reports_chords() {
    let dir = TempDir::new().unwrap();
    let mut notes: Vec<Note> = [60u8, 62, 64, 65, 67, 69, 71, 72]
        .iter()
        .enumerate()
        .map(|(i, &p)| Note::new(i as f64 * 0.5, i as f64 * 0.5 + 0.45, p, 80))
        .collect();
    notes.extend([
        Note::new(4.0, 6.0, 48, 80),
        Note::new(4.0, 6.0, 52, 80),
        Note::new(4.0, 6.0, 55, 80),
    ]);
    let input = write_midi(&dir, "scale.mid", &[Part::new("scale", notes)]);

    phraser(dir.path())
        .arg("key")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("C major"))
        .stdout(predicate::str::contains("tonic chord: C E G"));
}

#[test]
fn config_shows_file_and_env_sources() {
    let dir = TempDir::new().unwrap();
    let custom = dir.path().join("custom.toml");
    fs::write(&custom, "[segmentation]\nsilence = 0.4\n").unwrap();

    phraser(dir.path())
        .arg("--config")
        .arg(&custom)
        .arg("config")
        .env("PHRASING_SEED", "7")
        .assert()
        .success()
        .stdout(predicate::str::contains("# Loaded:"))
        .stdout(predicate::str::contains("# Overridden by: PHRASING_SEED"))
        .stdout(predicate::str::contains("seed = 7"))
        .stdout(predicate::str::contains("silence = 0.4"));
}

#[test]
fn local_config_file_is_picked_up() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("phrasing.toml"), "[logging]\nlevel = \"warn\"\n").unwrap();

    phraser(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("level = \"warn\""));
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().unwrap();

    phraser(dir.path())
        .args(["--config", "nope.toml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
