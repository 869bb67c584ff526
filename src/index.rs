//! Frame index: build, persist, load, and shard.
//!
//! An index is the ordered list of `(offset, length)` byte ranges of every
//! frame in a record file, `length` including the 16 bytes of framing. With
//! it a reader can seek straight to any frame, and several workers can split
//! one file between them without talking to each other.
//!
//! # File formats
//!
//! - [`IndexFormat::Binary`] (default): one 16-byte record per frame,
//!   `{offset: u64 LE, length: u64 LE}`, no header.
//! - [`IndexFormat::Text`]: one `"<offset> <length>\n"` line per frame, as
//!   written by older tooling.
//!
//! # Sharding
//!
//! Worker `w` of `W` owns entry `i` iff `i % W == w`. Every worker applying
//! this rule to the same index yields disjoint, collectively exhaustive
//! subsets.
//!
//! An index is not tied to the file it describes: if the record file changes
//! the index must be rebuilt. Staleness is not detected.

use crate::error::{Error, Result};
use crate::frame::FrameReader;
use crate::io::compression::{open_reader, Compression};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Size of one binary index record.
pub const ENTRY_BYTES: usize = 16;

/// Byte range of one full frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub offset: u64,
    pub length: u64,
}

impl IndexEntry {
    /// Offset one past the last byte of the frame.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// On-disk representation of an [`Index`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormat {
    #[default]
    Binary,
    Text,
}

impl std::str::FromStr for IndexFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(Self::Binary),
            "text" => Ok(Self::Text),
            other => Err(Error::config(format!(
                "unknown index format '{other}' (expected binary or text)"
            ))),
        }
    }
}

/// One worker's slice of an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// This worker's id, in `0..count`.
    pub index: usize,
    /// Total number of workers.
    pub count: usize,
}

impl Shard {
    /// # Errors
    /// Returns [`Error::Configuration`] unless `count >= 1` and `index < count`.
    pub fn new(index: usize, count: usize) -> Result<Self> {
        let shard = Self { index, count };
        shard.validate()?;
        Ok(shard)
    }

    /// The whole file as a single shard.
    #[must_use]
    pub const fn whole() -> Self {
        Self { index: 0, count: 1 }
    }

    /// # Errors
    /// Returns [`Error::Configuration`] for an empty or out-of-range shard.
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(Error::config("shard count must be at least 1"));
        }
        if self.index >= self.count {
            return Err(Error::config(format!(
                "shard index {} out of range for {} workers",
                self.index, self.count
            )));
        }
        Ok(())
    }

    /// Whether entry number `i` belongs to this shard.
    #[must_use]
    pub const fn contains(&self, i: usize) -> bool {
        i % self.count == self.index
    }

    /// Entry numbers owned by this shard out of `total` entries, ascending.
    pub fn assigned(&self, total: usize) -> impl Iterator<Item = usize> + use<> {
        (self.index..total).step_by(self.count.max(1))
    }
}

/// In-memory frame index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    #[must_use]
    pub const fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<IndexEntry> {
        self.entries.get(i).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// `(entry number, entry)` pairs owned by `shard`.
    pub fn shard(&self, shard: Shard) -> impl Iterator<Item = (usize, IndexEntry)> + '_ {
        shard.assigned(self.len()).map(|i| (i, self.entries[i]))
    }

    /// Scan a frame stream and record every frame's byte range.
    ///
    /// All-or-nothing: the first corrupt or truncated frame aborts the build.
    ///
    /// # Errors
    /// Any frame or I/O error encountered during the scan.
    pub fn build<R: Read>(reader: R) -> Result<Self> {
        let mut frames = FrameReader::new(reader);
        let mut entries = Vec::new();
        loop {
            let offset = frames.offset();
            match frames.read_frame_with_len()? {
                Some((_, length)) => entries.push(IndexEntry { offset, length }),
                None => break,
            }
        }
        debug!(frames = entries.len(), "built index");
        Ok(Self { entries })
    }

    /// Build the index of a record file on disk.
    ///
    /// For a compressed file the offsets are positions in the decompressed
    /// stream.
    ///
    /// # Errors
    /// Any frame or I/O error encountered during the scan.
    pub fn build_from_file(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), ?compression, "scanning record file");
        Self::build(open_reader(path, compression)?)
    }

    /// Serialize to `writer`.
    ///
    /// # Errors
    /// Returns an error if the writer fails.
    pub fn write_to<W: Write>(&self, mut writer: W, format: IndexFormat) -> Result<()> {
        match format {
            IndexFormat::Binary => {
                let mut buf = Vec::with_capacity(self.entries.len() * ENTRY_BYTES);
                for e in &self.entries {
                    buf.put_u64_le(e.offset);
                    buf.put_u64_le(e.length);
                }
                writer.write_all(&buf)?;
            }
            IndexFormat::Text => {
                for e in &self.entries {
                    writeln!(writer, "{} {}", e.offset, e.length)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the index to `path`.
    ///
    /// The file is written beside its destination and renamed into place, so
    /// a failed write never leaves a partial index behind.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written or renamed.
    pub fn save(&self, path: impl AsRef<Path>, format: IndexFormat) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        self.write_to(BufWriter::new(tmp.as_file_mut()), format)?;
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        debug!(path = %path.display(), entries = self.len(), ?format, "wrote index");
        Ok(())
    }

    /// Parse an index from `reader`.
    ///
    /// # Errors
    /// [`Error::MalformedIndex`] for a trailing partial binary record or an
    /// unparsable text line.
    pub fn read_from<R: Read>(reader: R, format: IndexFormat) -> Result<Self> {
        match format {
            IndexFormat::Binary => read_binary(reader),
            IndexFormat::Text => read_text(reader),
        }
    }

    /// Load a persisted index.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is malformed.
    pub fn load(path: impl AsRef<Path>, format: IndexFormat) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let index = Self::read_from(BufReader::new(file), format)?;
        debug!(path = %path.display(), entries = index.len(), "loaded index");
        Ok(index)
    }
}

fn read_binary<R: Read>(mut reader: R) -> Result<Index> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    if raw.len() % ENTRY_BYTES != 0 {
        return Err(Error::malformed_index(format!(
            "{} bytes is not a whole number of {ENTRY_BYTES}-byte entries",
            raw.len()
        )));
    }
    let mut buf = raw.as_slice();
    let mut entries = Vec::with_capacity(raw.len() / ENTRY_BYTES);
    while buf.has_remaining() {
        let offset = buf.get_u64_le();
        let length = buf.get_u64_le();
        entries.push(IndexEntry { offset, length });
    }
    Ok(Index { entries })
}

fn read_text<R: Read>(reader: R) -> Result<Index> {
    let mut entries = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parse = |field: Option<&str>| -> Result<u64> {
            field
                .and_then(|f| f.parse::<u64>().ok())
                .ok_or_else(|| Error::malformed_index(format!("line {}: '{line}'", n + 1)))
        };
        let mut fields = line.split_whitespace();
        let offset = parse(fields.next())?;
        let length = parse(fields.next())?;
        if fields.next().is_some() {
            return Err(Error::malformed_index(format!(
                "line {}: expected two fields, got '{line}'",
                n + 1
            )));
        }
        entries.push(IndexEntry { offset, length });
    }
    Ok(Index { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameWriter;

    fn frames(payload_sizes: &[usize]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = FrameWriter::new(&mut buf);
        for &n in payload_sizes {
            w.write_frame(&vec![7u8; n]).unwrap();
        }
        buf
    }

    #[test]
    fn build_records_contiguous_ranges() {
        let idx = Index::build(frames(&[0, 5, 100]).as_slice()).unwrap();
        assert_eq!(
            idx.entries(),
            &[
                IndexEntry { offset: 0, length: 16 },
                IndexEntry { offset: 16, length: 21 },
                IndexEntry { offset: 37, length: 116 },
            ]
        );
    }

    #[test]
    fn build_is_all_or_nothing() {
        let mut buf = frames(&[3, 3, 3]);
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(matches!(
            Index::build(buf.as_slice()),
            Err(Error::CorruptFrame { offset: 38, .. })
        ));
        let buf = frames(&[3, 3]);
        assert!(matches!(
            Index::build(&buf[..buf.len() - 2]),
            Err(Error::TruncatedFrame { offset: 19 })
        ));
    }

    #[test]
    fn binary_and_text_formats_agree() {
        let idx = Index::build(frames(&[1, 2, 3, 4]).as_slice()).unwrap();
        for format in [IndexFormat::Binary, IndexFormat::Text] {
            let mut out = Vec::new();
            idx.write_to(&mut out, format).unwrap();
            assert_eq!(Index::read_from(out.as_slice(), format).unwrap(), idx);
        }
        let mut bin = Vec::new();
        idx.write_to(&mut bin, IndexFormat::Binary).unwrap();
        assert_eq!(bin.len(), 4 * ENTRY_BYTES);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(
            Index::read_from(&[0u8; 17][..], IndexFormat::Binary),
            Err(Error::MalformedIndex(_))
        ));
        for text in ["0 16\nabc 3\n", "0\n", "0 16 2\n"] {
            assert!(matches!(
                Index::read_from(text.as_bytes(), IndexFormat::Text),
                Err(Error::MalformedIndex(_))
            ));
        }
        let idx = Index::read_from("0 16\n\n16 20\n".as_bytes(), IndexFormat::Text).unwrap();
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn shards_partition_entries() {
        for total in [0usize, 1, 7, 64] {
            for workers in 1..=9 {
                let mut seen = vec![0u8; total];
                for w in 0..workers {
                    let shard = Shard::new(w, workers).unwrap();
                    for i in shard.assigned(total) {
                        assert!(shard.contains(i));
                        seen[i] += 1;
                    }
                }
                assert!(seen.iter().all(|&c| c == 1), "total={total} workers={workers}");
            }
        }
    }

    #[test]
    fn invalid_shards_are_configuration_errors() {
        assert!(matches!(Shard::new(0, 0), Err(Error::Configuration(_))));
        assert!(matches!(Shard::new(3, 3), Err(Error::Configuration(_))));
        assert_eq!(Shard::new(0, 1).unwrap(), Shard::whole());
    }
}
