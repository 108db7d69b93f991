//! CLI command implementations

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use midi_phrasing::{
    detect_key, humanize as humanize_parts, identify_trills, phrase_file_name, read_parts,
    sort_notes, write_parts, KeyContext, Note, Part, SegmentationContext,
};
use phrasingconf::{ConfigSources, PhrasingConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

fn load_parts(input: &Path) -> Result<Vec<Part>> {
    let bytes =
        fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let parts = read_parts(&bytes)
        .with_context(|| format!("Failed to parse {} as MIDI", input.display()))?;
    if parts.is_empty() {
        bail!("{} contains no notes", input.display());
    }
    Ok(parts)
}

fn select_part(parts: Vec<Part>, track: usize, input: &Path) -> Result<Part> {
    let count = parts.len();
    parts.into_iter().nth(track).with_context(|| {
        format!(
            "{} has {} part(s) with notes; part {} does not exist",
            input.display(),
            count,
            track
        )
    })
}

fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "phrase".to_string())
}

/// Split one part into phrases and write a file per phrase
pub fn segment(
    config: &PhrasingConfig,
    input: &Path,
    output_dir: &Path,
    track: usize,
    key_name: Option<&str>,
) -> Result<()> {
    let part = select_part(load_parts(input)?, track, input)?;
    let notes = &part.notes;

    let key = match key_name {
        Some(name) => name.parse::<KeyContext>()?,
        None => detect_key(notes),
    };
    info!(key = %key, confidence = key.confidence, "using key");

    let ctx = SegmentationContext::new(
        notes,
        key,
        config.durations.clone(),
        config.segmentation.clone(),
    )?;
    let phrases = ctx.segment(notes)?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let stem = file_stem(input);
    let mut total_length = 0.0;
    for (i, phrase) in phrases.iter().enumerate() {
        let (start, end) = phrase.time_span(notes);
        total_length += end - start;

        let bytes = write_parts(&[Part {
            name: part.name.clone(),
            track_index: part.track_index,
            notes: phrase.notes(notes).to_vec(),
        }])?;
        let path = output_dir.join(phrase_file_name(&stem, i, phrase, notes));
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;

        println!(
            "Phrase {} saved: {} notes, {:.2}s to {:.2}s -> {}",
            i,
            phrase.len(),
            start,
            end,
            path.display()
        );
    }

    println!(
        "Key: {}. {} phrases, average length {:.2}s",
        ctx.key(),
        phrases.len(),
        total_length / phrases.len() as f64
    );
    Ok(())
}

/// Humanize the first two parts and write every part back out
pub fn humanize(
    config: &PhrasingConfig,
    input: &Path,
    output: &Path,
    seed: Option<u64>,
) -> Result<()> {
    let mut parts = load_parts(input)?;
    let seed = seed.or(config.seed).unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let (melody, rest) = parts.split_at_mut(1);
    let mut no_bass = Vec::new();
    let bass = match rest.first_mut() {
        Some(part) => &mut part.notes,
        None => &mut no_bass,
    };

    let report = humanize_parts(
        &mut melody[0].notes,
        bass,
        &config.humanize,
        &config.durations,
        &mut rng,
    )?;

    let bytes = write_parts(&parts)?;
    fs::write(output, bytes).with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Humanized {} (seed {}): {} staccato, {} repeated, {} breath pauses -> {}",
        input.display(),
        seed,
        report.melody_staccato,
        report.repeated_staccato_melody + report.final_repeated_staccato,
        report.breath_pauses,
        output.display()
    );
    Ok(())
}

/// Print the trills of one part
pub fn trills(config: &PhrasingConfig, input: &Path, track: usize) -> Result<()> {
    config.durations.validate()?;
    let part = select_part(load_parts(input)?, track, input)?;
    let notes = &part.notes;

    let found = identify_trills(notes, &config.durations);
    for trill in &found {
        let [a, b, c, d] = trill.notes;
        println!(
            "{:.3}s: pitch {} x3 [{}, {}, {}] -> pitch {} [{}]",
            notes[a].start, notes[a].pitch, a, b, c, notes[d].pitch, d
        );
    }
    println!("{} trill(s)", found.len());
    Ok(())
}

/// Print the estimated key and its chord sets
pub fn key(input: &Path) -> Result<()> {
    let mut notes: Vec<Note> = load_parts(input)?
        .into_iter()
        .flat_map(|part| part.notes)
        .collect();
    sort_notes(&mut notes);

    let key = detect_key(&notes);
    println!("{} (confidence {:.2})", key, key.confidence);
    if key.is_determinate() {
        println!("tonic chord: {}", key.spell(&key.tonic_chord).join(" "));
        println!("dominant chord: {}", key.spell(&key.dominant_chord).join(" "));
    }
    Ok(())
}

/// Print the effective configuration with its sources
pub fn show_config(config: &PhrasingConfig, sources: &ConfigSources) -> Result<()> {
    if sources.files.is_empty() {
        println!("# Sources: defaults only");
    } else {
        for file in &sources.files {
            println!("# Loaded: {}", file.display());
        }
    }
    for var in &sources.env_overrides {
        println!("# Overridden by: {}", var);
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
