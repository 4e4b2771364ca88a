#![forbid(unsafe_code)]
//! Varint and buffer utilities shared by the page codec.

use crate::types::{PalimpsestError, Result};

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use super::{PalimpsestError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or_else(|| PalimpsestError::Consistency("varint truncated".into()))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(PalimpsestError::Consistency("varint overflow".into()));
            }
            result |= payload << shift;
            if (byte & 0x80) == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(PalimpsestError::Consistency("varint too long".into()))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod buf {
    //! Slice-backed reader and vector-backed writer used by page and record codecs.

    use core::fmt;

    use super::{var, PalimpsestError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or_else(|| PalimpsestError::Consistency("cursor offset overflow".into()))?;
            if end > self.buf.len() {
                return Err(PalimpsestError::Consistency(format!(
                    "cursor take beyond buffer: need {}, remaining {}",
                    n,
                    self.remaining()
                )));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a single byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a boolean stored as one byte.
        pub fn bool(&mut self) -> Result<bool> {
            match self.u8()? {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(PalimpsestError::Consistency(format!(
                    "invalid boolean byte {other}"
                ))),
            }
        }

        /// Reads a fixed-width big-endian u32.
        pub fn u32_be(&mut self) -> Result<u32> {
            let bytes = self.take(4)?;
            Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }

        /// Reads a fixed-width big-endian u64.
        pub fn u64_be(&mut self) -> Result<u64> {
            let bytes = self.take(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok(u64::from_be_bytes(arr))
        }

        /// Reads a fixed-width big-endian u128.
        pub fn u128_be(&mut self) -> Result<u128> {
            let bytes = self.take(16)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(bytes);
            Ok(u128::from_be_bytes(arr))
        }

        /// Reads an unsigned varint.
        pub fn varint(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a ZigZag varint.
        pub fn varint_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads a varint-length-prefixed byte string.
        pub fn bytes(&mut self) -> Result<&'a [u8]> {
            let len = self.varint()? as usize;
            self.take(len)
        }

        /// Reads a varint-length-prefixed UTF-8 string.
        pub fn string(&mut self) -> Result<String> {
            let raw = self.bytes()?;
            String::from_utf8(raw.to_vec())
                .map_err(|_| PalimpsestError::Consistency("string not valid UTF-8".into()))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Fails unless the whole buffer was consumed.
        pub fn finish(&self) -> Result<()> {
            if self.remaining() != 0 {
                return Err(PalimpsestError::Consistency(format!(
                    "{} trailing bytes after decode",
                    self.remaining()
                )));
            }
            Ok(())
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }

    /// Appends a varint-length-prefixed byte string.
    pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        var::encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }

    /// Appends a varint-length-prefixed UTF-8 string.
    pub fn put_str(out: &mut Vec<u8>, s: &str) {
        put_bytes(out, s.as_bytes());
    }

    /// Appends a boolean as one byte.
    pub fn put_bool(out: &mut Vec<u8>, value: bool) {
        out.push(u8::from(value));
    }
}
