//! Checksummed, length-prefixed frames.
//!
//! Every record in a file is stored as one frame, all integers little-endian:
//!
//! ```text
//! [8 bytes: length L] [4 bytes: masked_crc(length bytes)]
//! [L bytes: payload ] [4 bytes: masked_crc(payload)     ]
//! ```
//!
//! The codec knows nothing about what the payload contains. Reading
//! distinguishes a clean end of stream (zero bytes where a frame would start)
//! from a stream that stops mid-frame ([`Error::TruncatedFrame`]), and verifies
//! both checksums ([`Error::CorruptFrame`]).
//!
//! # Example
//!
//! ```
//! use tfrecord_loader::frame::{FrameReader, FrameWriter};
//!
//! let mut buf = Vec::new();
//! let mut w = FrameWriter::new(&mut buf);
//! w.write_frame(b"hello")?;
//! w.write_frame(b"")?;
//!
//! let frames: Vec<Vec<u8>> = FrameReader::new(buf.as_slice()).collect::<Result<_, _>>()?;
//! assert_eq!(frames, vec![b"hello".to_vec(), Vec::new()]);
//! # Ok::<(), tfrecord_loader::Error>(())
//! ```

use crate::error::{Error, FrameSegment, Result};
use bytes::{Buf, BufMut};
use std::io::{ErrorKind, Read, Write};

/// Size of the length prefix.
pub const LENGTH_BYTES: usize = 8;
/// Size of each checksum.
pub const CRC_BYTES: usize = 4;
/// Bytes a frame occupies on disk in addition to its payload.
pub const FRAME_OVERHEAD: u64 = (LENGTH_BYTES + 2 * CRC_BYTES) as u64;

const HEADER_BYTES: usize = LENGTH_BYTES + CRC_BYTES;
const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC-32C of `data`, rotated right by 15 bits and offset by a fixed constant.
///
/// This exact transform is what the on-disk format stores; it must not change.
#[must_use]
pub fn masked_crc(data: &[u8]) -> u32 {
    crc32c::crc32c(data).rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Total on-disk size of a frame carrying `payload_len` bytes.
#[must_use]
pub const fn frame_len(payload_len: u64) -> u64 {
    payload_len + FRAME_OVERHEAD
}

/// Fill `buf` from `r`, stopping early only at end of stream.
///
/// Returns the number of bytes read, which is less than `buf.len()` only if
/// the stream ended.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sequential frame decoder over any byte source.
///
/// Tracks the byte position within the (decompressed) stream so errors and
/// index entries can name where a frame starts. After the first error the
/// iterator yields `None`.
pub struct FrameReader<R> {
    inner: R,
    position: u64,
    failed: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::at_position(inner, 0)
    }

    /// Wrap a source that has already been positioned at byte `position`.
    pub fn at_position(inner: R, position: u64) -> Self {
        Self {
            inner,
            position,
            failed: false,
        }
    }

    /// Byte offset of the next frame in the stream.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.position
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Move to `position` after the caller has repositioned the source.
    pub fn reset_position(&mut self, position: u64) {
        self.position = position;
        self.failed = false;
    }

    /// Read the next frame's payload, or `None` at a clean end of stream.
    ///
    /// # Errors
    /// [`Error::CorruptFrame`] on a checksum mismatch, [`Error::TruncatedFrame`]
    /// if the stream ends inside a frame, or an I/O error from the source.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.read_frame_with_len()?.map(|(payload, _)| payload))
    }

    /// Like [`read_frame`](Self::read_frame), also returning the frame's total
    /// on-disk length including framing overhead.
    ///
    /// # Errors
    /// See [`read_frame`](Self::read_frame).
    pub fn read_frame_with_len(&mut self) -> Result<Option<(Vec<u8>, u64)>> {
        let start = self.position;

        let mut header = [0u8; HEADER_BYTES];
        let n = read_full(&mut self.inner, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_BYTES {
            return Err(Error::TruncatedFrame { offset: start });
        }

        let (length_bytes, mut crc_bytes) = header.split_at(LENGTH_BYTES);
        if masked_crc(length_bytes) != crc_bytes.get_u32_le() {
            return Err(Error::CorruptFrame {
                offset: start,
                segment: FrameSegment::Length,
            });
        }
        let length = (&header[..LENGTH_BYTES]).get_u64_le();

        // Grow the buffer as bytes arrive rather than trusting `length` up front.
        let mut payload = Vec::new();
        (&mut self.inner).take(length).read_to_end(&mut payload)?;
        if payload.len() as u64 != length {
            return Err(Error::TruncatedFrame { offset: start });
        }

        let mut footer = [0u8; CRC_BYTES];
        if read_full(&mut self.inner, &mut footer)? < CRC_BYTES {
            return Err(Error::TruncatedFrame { offset: start });
        }
        if masked_crc(&payload) != (&footer[..]).get_u32_le() {
            return Err(Error::CorruptFrame {
                offset: start,
                segment: FrameSegment::Payload,
            });
        }

        let total = frame_len(length);
        self.position = start + total;
        Ok(Some((payload, total)))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_frame() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Append-only frame encoder.
pub struct FrameWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> FrameWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    /// Write one frame and return its on-disk length.
    ///
    /// # Errors
    /// Returns an error if the underlying writer fails.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<u64> {
        let length = payload.len() as u64;
        let length_bytes = length.to_le_bytes();

        let mut header = Vec::with_capacity(HEADER_BYTES);
        header.put_slice(&length_bytes);
        header.put_u32_le(masked_crc(&length_bytes));

        self.inner.write_all(&header)?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&masked_crc(payload).to_le_bytes())?;

        let total = frame_len(length);
        self.bytes_written += total;
        Ok(total)
    }

    /// Total bytes written through this writer so far.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// # Errors
    /// Returns an error if the underlying writer fails to flush.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
