//! The handful of protobuf wire primitives the record codec needs.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

pub(crate) const WIRE_VARINT: u8 = 0;
pub(crate) const WIRE_FIXED64: u8 = 1;
pub(crate) const WIRE_LEN: u8 = 2;
pub(crate) const WIRE_FIXED32: u8 = 5;

/// Encode an unsigned integer as a base-128 varint.
pub(crate) fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

pub(crate) fn put_tag(buf: &mut impl BufMut, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Write `field` as a length-delimited value.
pub(crate) fn put_len_delimited(buf: &mut impl BufMut, field: u32, bytes: &[u8]) {
    put_tag(buf, field, WIRE_LEN);
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

/// Cursor over an encoded message.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    pub(crate) fn read_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            if !self.buf.has_remaining() {
                return Err(Error::malformed_record("varint runs past end of buffer"));
            }
            let byte = self.buf.get_u8();
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::malformed_record("varint longer than 10 bytes"));
            }
        }
    }

    /// Next `(field number, wire type)` pair.
    pub(crate) fn read_tag(&mut self) -> Result<(u32, u8)> {
        let key = self.read_varint()?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| Error::malformed_record(format!("field number {} out of range", key >> 3)))?;
        if field == 0 {
            return Err(Error::malformed_record("field number 0 is reserved"));
        }
        Ok((field, (key & 0x7) as u8))
    }

    pub(crate) fn read_len_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= self.buf.len())
            .ok_or_else(|| Error::malformed_record(format!("length {len} runs past end of buffer")))?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn read_fixed32(&mut self) -> Result<u32> {
        if self.buf.remaining() < 4 {
            return Err(Error::malformed_record("fixed32 runs past end of buffer"));
        }
        Ok(self.buf.get_u32_le())
    }

    /// Skip a value of the given wire type.
    pub(crate) fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                if self.buf.remaining() < 8 {
                    return Err(Error::malformed_record("fixed64 runs past end of buffer"));
                }
                self.buf.advance(8);
            }
            WIRE_LEN => {
                self.read_len_delimited()?;
            }
            WIRE_FIXED32 => {
                self.read_fixed32()?;
            }
            other => {
                return Err(Error::malformed_record(format!("unsupported wire type {other}")));
            }
        }
        Ok(())
    }
}
