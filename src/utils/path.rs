//! Input path expansion

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Expand command-line inputs into the batch's file list.
///
/// Files are kept in the given order. A directory contributes its regular
/// files one level deep, sorted by name. Paths that do not exist are kept so
/// the batch reports them as missing.
pub fn collect_inputs<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if !input.is_dir() {
            files.push(input.to_path_buf());
            continue;
        }

        let before = files.len();
        for entry in WalkDir::new(input)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => warn!(directory = %input.display(), error = %e, "Skipping unreadable entry"),
            }
        }
        debug!(
            directory = %input.display(),
            files = files.len() - before,
            "Expanded input directory"
        );
    }
    files
}
