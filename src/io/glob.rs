//! File globbing for locating record files in bulk.
//!
//! Used by the index tool's directory mode, and handy for building
//! multi-source configurations from a directory of shards.
//!
//! # Examples
//!
//! ```no_run
//! use tfrecord_loader::io::glob::{expand_glob, files_with_suffix};
//!
//! let shards = expand_glob("data/train-*.tfrecord")?;
//! let same = files_with_suffix("data", ".tfrecord")?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use anyhow::{Context, Result, bail};
use glob::{Pattern, glob};
use std::path::{Path, PathBuf};

/// Expand a glob pattern into a sorted vector of matching file paths.
///
/// Directories are left out. Results are sorted so that every worker sees the
/// same order.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a matched entry cannot be
/// read. No matches is an empty vector, not an error.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }

    result.sort();

    Ok(result)
}

/// All files directly inside `dir` whose names end with `suffix`, sorted.
///
/// Glob metacharacters in `dir` and `suffix` are matched literally.
///
/// # Errors
///
/// Returns an error if `dir` is not a directory or cannot be listed.
pub fn files_with_suffix(dir: impl AsRef<Path>, suffix: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let pattern = format!(
        "{}/*{}",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(suffix)
    );
    expand_glob(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, create_dir};

    #[test]
    fn suffix_match_is_sorted_and_skips_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.tfrecord", "a.tfrecord", "c.idx"] {
            File::create(dir.path().join(name))?;
        }
        create_dir(dir.path().join("d.tfrecord"))?;

        let found = files_with_suffix(dir.path(), ".tfrecord")?;
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tfrecord", "b.tfrecord"]);
        Ok(())
    }

    #[test]
    fn no_match_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.none", dir.path().display());
        assert!(expand_glob(&pattern).unwrap().is_empty());
        assert!(files_with_suffix(dir.path().join("missing"), ".none").is_err());
    }
}
