//! Candidate source: the single `*.txt` file in the input directory.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::candidate::Candidate;
use crate::config::ConfigError;

/// Locate the one candidate file in `dir`.
///
/// Zero or several `*.txt` files is a configuration error: the operator
/// has to decide which list to run.
pub fn find_input_file(dir: &Path) -> Result<PathBuf, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            found.push(path);
        }
    }

    match found.len() {
        0 => Err(ConfigError::NoInputFile(dir.to_path_buf())),
        1 => Ok(found.remove(0)),
        count => Err(ConfigError::MultipleInputFiles {
            dir: dir.to_path_buf(),
            count,
        }),
    }
}

/// Split file contents on whitespace. Order and duplicates are kept; the
/// engine deduplicates per pass.
pub fn parse_candidates(text: &str) -> Vec<Candidate> {
    text.split_whitespace().map(Candidate::from).collect()
}

/// Read the candidate list from the single file in `dir`.
pub fn load_candidates(dir: &Path) -> Result<Vec<Candidate>, ConfigError> {
    let path = find_input_file(dir)?;
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Unreadable {
        path: path.clone(),
        source,
    })?;
    let candidates = parse_candidates(&text);
    if candidates.is_empty() {
        return Err(ConfigError::EmptyInput(path));
    }
    info!(file = %path.display(), count = candidates.len(), "📄 Candidates loaded");
    Ok(candidates)
}
