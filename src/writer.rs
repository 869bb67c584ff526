//! Writing record files.
//!
//! [`RecordWriter`] frames payloads and optionally gzip-compresses the whole
//! stream. Call [`finish`](RecordWriter::finish) to flush; it also hands back
//! the [`Index`] of what was written, so a writer can produce the data file
//! and its index in one pass.

use crate::error::{Error, Result};
use crate::frame::FrameWriter;
use crate::index::{Index, IndexEntry};
use crate::io::compression::{CompressedWriter, Compression};
use crate::record::{Example, SequenceExample};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Frame writer over any sink, tracking entry boundaries as it goes.
pub struct RecordWriter<W: Write> {
    frames: FrameWriter<CompressedWriter<W>>,
    entries: Vec<IndexEntry>,
    path: Option<PathBuf>,
}

impl RecordWriter<File> {
    /// Create (or truncate) `path`. [`Compression::Auto`] picks gzip for a
    /// `.gz` extension.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or the compression
    /// scheme is unavailable.
    pub fn create(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let path = path.as_ref();
        let compression = compression.resolve_for_path(path);
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), ?compression, "creating record file");
        let mut writer = Self::new(file, compression)?;
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }
}

impl<W: Write> RecordWriter<W> {
    /// # Errors
    /// Returns [`Error::Configuration`] if the compression scheme is
    /// unavailable.
    pub fn new(inner: W, compression: Compression) -> Result<Self> {
        Ok(Self {
            frames: FrameWriter::new(CompressedWriter::new(inner, compression)?),
            entries: Vec::new(),
            path: None,
        })
    }

    /// Number of frames written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write one raw payload as a frame.
    ///
    /// # Errors
    /// Returns an error if the underlying write fails.
    pub fn write_raw(&mut self, payload: &[u8]) -> Result<()> {
        let offset = self.frames.bytes_written();
        let length = self.frames.write_frame(payload)?;
        self.entries.push(IndexEntry { offset, length });
        Ok(())
    }

    /// # Errors
    /// Returns an error if the underlying write fails.
    pub fn write_example(&mut self, example: &Example) -> Result<()> {
        self.write_raw(&example.encode())
    }

    /// # Errors
    /// Returns an error if the underlying write fails.
    pub fn write_sequence_example(&mut self, example: &SequenceExample) -> Result<()> {
        self.write_raw(&example.encode())
    }

    /// Flush everything and return the sink together with the index of the
    /// frames written. Offsets refer to the uncompressed stream.
    ///
    /// # Errors
    /// Returns an error if flushing or finishing compression fails.
    pub fn finish(self) -> Result<(W, Index)> {
        let sink = self.frames.into_inner().finish()?;
        if let Some(path) = &self.path {
            debug!(path = %path.display(), frames = self.entries.len(), "finished record file");
        }
        Ok((sink, Index::from_entries(self.entries)))
    }
}
