use std::{fs, path::Path};

use anyhow::Context;
use serde::de::DeserializeOwned;
use toml;

/// Parses a TOML file into a struct that implements `DeserializeOwned`.
///
/// Reads the file contents from disk, deserializes them with
/// `toml::from_str`, and returns the parsed data with contextual error
/// messages for file I/O and parsing failures.
///
/// # Errors
/// Returns an `anyhow::Error` if:
/// - The file cannot be read (e.g., does not exist or permission denied).
/// - The file contents are invalid TOML (deserialization fails).
pub fn parse_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Could not open file {:?}", path.display()))?;

    let data: T = toml::from_str(&contents)
        .with_context(|| format!("Could not parse TOML in file {:?}", path.display()))?;

    Ok(data)
}
