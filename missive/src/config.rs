//! Locating the configuration file

use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "MISSIVE_CONFIG";

/// Searched in order when [`CONFIG_ENV`] is unset
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "./missive.config.ron",
    "/etc/missive/missive.config.ron",
];

/// Find the configuration file using the following precedence:
/// 1. `MISSIVE_CONFIG` environment variable
/// 2. ./missive.config.ron (current working directory)
/// 3. /etc/missive/missive.config.ron (system-wide config)
///
/// # Errors
///
/// When `MISSIVE_CONFIG` names a missing file, or nothing was found.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let defaults: Vec<PathBuf> = DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect();
    locate(std::env::var_os(CONFIG_ENV).map(PathBuf::from), &defaults)
}

/// [`find_config_file`] with the environment and search list supplied.
///
/// # Errors
///
/// When `explicit` names a missing file, or none of `defaults` exist.
pub fn locate(explicit: Option<PathBuf>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(found) = defaults.iter().find(|path| path.exists()) {
        return Ok(found.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a RON file.
///
/// # Errors
///
/// Read or parse failures, naming the file.
pub fn read_ron<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    ron::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))
}
