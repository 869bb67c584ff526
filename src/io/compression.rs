//! Transparent whole-stream compression for record files.
//!
//! A compressed record file is the ordinary frame stream passed through a
//! single compressor end to end; frames are parsed after decompression and
//! nothing else in the crate needs to know. Gzip is the one supported scheme
//! (feature `compression-gzip`, via `flate2`).
//!
//! ## Detection
//!
//! [`Compression::Auto`] checks the file extension first (`.gz`, `.gzip`) and
//! falls back to sniffing the first bytes. A plain record file can start with
//! the gzip magic by accident (any first payload whose length is `0x8b1f`
//! modulo 65536), so a valid frame header wins over the magic.
//!
//! ## Random access
//!
//! A compressed stream cannot seek. Indexed reads over a compressed file
//! therefore stream sequentially and keep the selected frames; index offsets
//! refer to positions in the decompressed stream.
//!
//! ```no_run
//! use tfrecord_loader::io::compression::{open_reader, Compression};
//! # fn main() -> tfrecord_loader::Result<()> {
//! let reader = open_reader("train.tfrecord.gz", Compression::Auto)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::frame::{masked_crc, CRC_BYTES, LENGTH_BYTES};
use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// ID1, ID2 and the deflate method byte.
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const GZIP_EXTENSIONS: [&str; 2] = [".gz", ".gzip"];

/// How a record file's bytes are wrapped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain frames.
    #[default]
    None,
    /// The whole stream is gzip-compressed.
    Gzip,
    /// Decide from the path extension, then from the leading magic bytes.
    Auto,
}

impl Compression {
    /// Resolve [`Compression::Auto`] from a path's extension alone.
    ///
    /// Used on the write side, where there are no bytes to sniff yet.
    #[must_use]
    pub fn resolve_for_path(self, path: impl AsRef<Path>) -> Self {
        match self {
            Self::Auto if has_gzip_extension(path) => Self::Gzip,
            Self::Auto => Self::None,
            other => other,
        }
    }

    /// True when the stream cannot be seeked and must be read front to back.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Gzip)
    }
}

fn has_gzip_extension(path: impl AsRef<Path>) -> bool {
    let lower = path.as_ref().to_string_lossy().to_lowercase();
    GZIP_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// True when `head` opens with a frame header whose length checksum holds.
fn starts_with_frame_header(head: &[u8]) -> bool {
    if head.len() < LENGTH_BYTES + CRC_BYTES {
        return false;
    }
    let (length, mut crc) = head.split_at(LENGTH_BYTES);
    masked_crc(length) == crc.get_u32_le()
}

/// Classify the start of a stream without consuming it.
fn sniff<R: BufRead>(reader: &mut R) -> Compression {
    match reader.fill_buf() {
        Ok(head) if !starts_with_frame_header(head) && head.starts_with(&GZIP_MAGIC) => {
            Compression::Gzip
        }
        _ => Compression::None,
    }
}

/// Resolve [`Compression::Auto`] for an existing file, sniffing magic bytes
/// if the extension is not conclusive.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn detect(path: impl AsRef<Path>, compression: Compression) -> Result<Compression> {
    let path = path.as_ref();
    if compression != Compression::Auto {
        return Ok(compression);
    }
    if has_gzip_extension(path) {
        return Ok(Compression::Gzip);
    }
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    Ok(sniff(&mut BufReader::new(file)))
}

/// Wrap `reader` so that it yields decompressed bytes.
///
/// # Errors
/// Returns [`Error::Configuration`] if the scheme is not compiled in.
pub fn wrap_reader<R: Read + 'static>(reader: R, compression: Compression) -> Result<Box<dyn Read>> {
    match compression {
        Compression::None => Ok(Box::new(BufReader::new(reader))),
        Compression::Gzip => gzip_reader(reader),
        Compression::Auto => {
            let mut buffered = BufReader::new(reader);
            match sniff(&mut buffered) {
                Compression::Gzip => gzip_reader(buffered),
                _ => Ok(Box::new(buffered)),
            }
        }
    }
}

#[cfg(feature = "compression-gzip")]
fn gzip_reader<R: Read + 'static>(reader: R) -> Result<Box<dyn Read>> {
    // Multi-member so that concatenated gzip files read as one stream.
    Ok(Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(reader))))
}

#[cfg(not(feature = "compression-gzip"))]
fn gzip_reader<R: Read + 'static>(_reader: R) -> Result<Box<dyn Read>> {
    Err(Error::config("gzip support requires the `compression-gzip` feature"))
}

/// Open `path` for reading with the given compression.
///
/// # Errors
/// Returns an error if the file cannot be opened or the scheme is unavailable.
pub fn open_reader(path: impl AsRef<Path>, compression: Compression) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let compression = match compression {
        Compression::Auto if has_gzip_extension(path) => Compression::Gzip,
        other => other,
    };
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    wrap_reader(file, compression)
}

/// Buffered writer that optionally compresses, with an explicit
/// [`finish`](Self::finish) so trailer write errors are not lost on drop.
pub enum CompressedWriter<W: Write> {
    Plain(BufWriter<W>),
    #[cfg(feature = "compression-gzip")]
    Gzip(flate2::write::GzEncoder<BufWriter<W>>),
}

impl<W: Write> CompressedWriter<W> {
    /// # Errors
    /// Returns [`Error::Configuration`] if the scheme is not compiled in.
    pub fn new(inner: W, compression: Compression) -> Result<Self> {
        match compression {
            Compression::None | Compression::Auto => Ok(Self::Plain(BufWriter::new(inner))),
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip => Ok(Self::Gzip(flate2::write::GzEncoder::new(
                BufWriter::new(inner),
                flate2::Compression::default(),
            ))),
            #[cfg(not(feature = "compression-gzip"))]
            Compression::Gzip => Err(Error::config(
                "gzip support requires the `compression-gzip` feature",
            )),
        }
    }

    /// Flush everything, write any compression trailer and return the sink.
    ///
    /// # Errors
    /// Returns an error if flushing or finishing the stream fails.
    pub fn finish(self) -> Result<W> {
        let buffered = match self {
            Self::Plain(w) => w,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(enc) => enc.finish()?,
        };
        buffered.into_inner().map_err(|e| Error::RawIo(e.into_error()))
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.flush(),
        }
    }
}
