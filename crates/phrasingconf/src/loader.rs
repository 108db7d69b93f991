//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PhrasingConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/phrasing/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("phrasing/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("phrasing.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one file as a raw TOML table.
///
/// The table is also checked against [`PhrasingConfig`] on its own so a
/// typo'd value is reported against the file it came from.
pub fn load_table_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_error(e.to_string()))?;
    toml::Value::Table(table.clone())
        .try_into::<PhrasingConfig>()
        .map_err(|e| parse_error(e.to_string()))?;

    Ok(table)
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Load and merge `files` in order, then deserialize the result once.
pub fn load_files(files: &[PathBuf]) -> Result<(PhrasingConfig, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut merged = toml::Table::new();

    for path in files {
        merge_tables(&mut merged, load_table_from_file(path)?);
        sources.files.push(path.clone());
    }

    let config = toml::Value::Table(merged)
        .try_into::<PhrasingConfig>()
        .map_err(|e| ConfigError::Parse {
            path: sources.files.last().cloned().unwrap_or_default(),
            message: e.to_string(),
        })?;

    Ok((config, sources))
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PhrasingConfig, sources: &mut ConfigSources) {
    apply_env_overrides_with(config, sources, |name| env::var(name).ok());
}

/// [`apply_env_overrides`] with an explicit variable lookup.
pub fn apply_env_overrides_with<F>(
    config: &mut PhrasingConfig,
    sources: &mut ConfigSources,
    lookup: F,
) where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PHRASING_LOG_LEVEL") {
        config.logging.level = v;
        sources.env_overrides.push("PHRASING_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins, as everywhere else
    if let Some(v) = lookup("RUST_LOG") {
        config.logging.level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Some(v) = lookup("PHRASING_SEED") {
        if let Ok(seed) = v.trim().parse() {
            config.seed = Some(seed);
            sources.env_overrides.push("PHRASING_SEED".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn cli_path_is_discovered_last() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "custom.toml", "seed = 1\n");
        let files = discover_config_files_with_override(Some(&path));
        assert_eq!(files.last(), Some(&path));
    }

    #[test]
    fn later_files_override_single_keys() {
        let dir = TempDir::new().unwrap();
        let system = write(
            &dir,
            "system.toml",
            r#"
[segmentation]
silence = 0.5
velocity_window = 3

[logging]
level = "warn"
"#,
        );
        let local = write(
            &dir,
            "local.toml",
            r#"
[segmentation]
silence = 0.4
"#,
        );

        let (config, sources) = load_files(&[system.clone(), local.clone()]).unwrap();
        assert_eq!(config.segmentation.silence, 0.4);
        assert_eq!(config.segmentation.velocity_window, 3);
        assert_eq!(config.segmentation.velocity_threshold, 0.5);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(sources.files, vec![system, local]);
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = TempDir::new().unwrap();
        let bad = write(&dir, "bad.toml", "[humanize]\nmax_velocity = \"loud\"\n");
        match load_files(&[bad.clone()]) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn unreadable_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.toml");
        assert!(matches!(
            load_files(&[missing]),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn merge_replaces_non_tables() {
        let mut base: toml::Table = "a = 1\n[t]\nx = 1\ny = 2\n".parse().unwrap();
        let overlay: toml::Table = "a = [1, 2]\n[t]\ny = 3\n".parse().unwrap();
        merge_tables(&mut base, overlay);
        assert_eq!(base["a"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn env_overrides_are_recorded() {
        let env: HashMap<&str, &str> = [
            ("PHRASING_LOG_LEVEL", "debug"),
            ("RUST_LOG", "midi_phrasing=trace"),
            ("PHRASING_SEED", "1234"),
        ]
        .into_iter()
        .collect();

        let mut config = PhrasingConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides_with(&mut config, &mut sources, |name| {
            env.get(name).map(|v| v.to_string())
        });

        assert_eq!(config.logging.level, "midi_phrasing=trace");
        assert_eq!(config.seed, Some(1234));
        assert_eq!(
            sources.env_overrides,
            vec!["PHRASING_LOG_LEVEL", "RUST_LOG", "PHRASING_SEED"]
        );
    }

    #[test]
    fn unparseable_seed_is_ignored() {
        let mut config = PhrasingConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides_with(&mut config, &mut sources, |name| {
            (name == "PHRASING_SEED").then(|| "soon".to_string())
        });
        assert_eq!(config.seed, None);
        assert!(sources.env_overrides.is_empty());
    }
}
