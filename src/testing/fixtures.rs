//! Temporary record files for tests.

use crate::error::{Error, Result};
use crate::index::IndexFormat;
use crate::io::compression::Compression;
use crate::record::{Example, Feature};
use crate::writer::RecordWriter;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Paths of one record file written by a [`RecordFixture`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFiles {
    pub data: PathBuf,
    pub index: PathBuf,
    pub count: usize,
}

/// A temporary directory of record files, deleted on drop.
///
/// # Example
///
/// ```
/// use tfrecord_loader::testing::RecordFixture;
///
/// # fn main() -> tfrecord_loader::Result<()> {
/// let fixture = RecordFixture::new()?;
/// let files = fixture.write_payloads("raw", [b"a".as_slice(), b"bc".as_slice()])?;
/// assert_eq!(files.count, 2);
/// assert!(files.data.exists() && files.index.exists());
/// # Ok(())
/// # }
/// ```
pub struct RecordFixture {
    dir: TempDir,
    compression: Compression,
    index_format: IndexFormat,
}

impl RecordFixture {
    /// # Errors
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().map_err(|e| Error::io(std::env::temp_dir(), e))?;
        Ok(Self {
            dir,
            compression: Compression::None,
            index_format: IndexFormat::Binary,
        })
    }

    /// Gzip data files written from now on.
    #[must_use]
    pub const fn gzip(mut self) -> Self {
        self.compression = Compression::Gzip;
        self
    }

    #[must_use]
    pub const fn index_format(mut self, format: IndexFormat) -> Self {
        self.index_format = format;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the data file for `name`.
    #[must_use]
    pub fn data_path(&self, name: &str) -> PathBuf {
        let suffix = if self.compression.is_compressed() {
            ".tfrecord.gz"
        } else {
            ".tfrecord"
        };
        self.dir.path().join(format!("{name}{suffix}"))
    }

    /// Path of the index file for `name`.
    #[must_use]
    pub fn index_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.idx"))
    }

    /// Write raw payloads as `name`, plus its index.
    ///
    /// # Errors
    /// Returns an error if either file cannot be written.
    pub fn write_payloads<I, P>(&self, name: &str, payloads: I) -> Result<RecordFiles>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let data = self.data_path(name);
        let index_path = self.index_path(name);
        let mut writer = RecordWriter::create(&data, self.compression)?;
        for payload in payloads {
            writer.write_raw(payload.as_ref())?;
        }
        let (_, index) = writer.finish()?;
        index.save(&index_path, self.index_format)?;
        Ok(RecordFiles {
            data,
            index: index_path,
            count: index.len(),
        })
    }

    /// Write encoded examples as `name`, plus its index.
    ///
    /// # Errors
    /// Returns an error if either file cannot be written.
    pub fn write_examples(&self, name: &str, examples: &[Example]) -> Result<RecordFiles> {
        self.write_payloads(name, examples.iter().map(Example::encode))
    }
}

/// Examples carrying a single int64 feature `id` with the given values.
#[must_use]
pub fn numbered_examples(ids: impl IntoIterator<Item = i64>) -> Vec<Example> {
    ids.into_iter()
        .map(|id| Example::builder().int64("id", [id]).build())
        .collect()
}

/// The first value of an example's `id` feature.
#[must_use]
pub fn example_id(example: &Example) -> Option<i64> {
    example
        .get("id")
        .and_then(Feature::as_int64_list)
        .and_then(|ids| ids.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn written_index_matches_data() {
        let fixture = RecordFixture::new().unwrap().index_format(IndexFormat::Text);
        let files = fixture.write_examples("x", &numbered_examples(0..4)).unwrap();
        let built = Index::build_from_file(&files.data, Compression::None).unwrap();
        let loaded = Index::load(&files.index, IndexFormat::Text).unwrap();
        assert_eq!(built, loaded);
        assert_eq!(files.count, 4);
    }

    #[test]
    fn ids_round_trip() {
        let examples = numbered_examples([7, -3]);
        assert_eq!(example_id(&examples[1]), Some(-3));
        assert_eq!(example_id(&Example::new()), None);
    }
}
