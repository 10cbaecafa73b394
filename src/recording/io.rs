//! Primitive encodings used inside a chunk: fixed-width integers in the chunk's byte order, or
//! LEB128-style varints when the chunk has the compressed-integers feature bit set.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use super::ByteOrder;
use crate::error::{Error, Result};

/// Varints never span more than this many bytes; the last one carries a full 8 bits.
const MAX_VARINT_BYTES: usize = 9;

pub(crate) const STRING_NULL: u8 = 0;
pub(crate) const STRING_EMPTY: u8 = 1;
pub(crate) const STRING_CONSTANT_POOL: u8 = 2;
pub(crate) const STRING_UTF8: u8 = 3;
pub(crate) const STRING_CHAR_ARRAY: u8 = 4;
pub(crate) const STRING_LATIN1: u8 = 5;

/// A string as it appears on the wire.
#[derive(Debug, PartialEq)]
pub(crate) enum RawString {
    Null,
    Value(String),
    PoolRef(i64),
}

/// Cursor over the bytes of a single chunk.
///
/// Offsets reported in errors are absolute (relative to the start of the recording).
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
    compressed: bool,
    base: u64,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], order: ByteOrder, compressed: bool, base: u64) -> Self {
        Self {
            data,
            pos: 0,
            order,
            compressed,
            base,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.error(format!("seek past end of chunk to {}", pos)));
        }
        self.pos = pos;
        Ok(())
    }

    pub(crate) fn absolute(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn error<S: Into<String>>(&self, reason: S) -> Error {
        Error::format(self.absolute(), reason)
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                self.error(format!(
                    "unexpected end of chunk reading {} bytes ({} remain)",
                    n,
                    self.data.len() - self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn boolean(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub(crate) fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES - 1 {
            let b = self.u8()?;
            value |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        let b = self.u8()?;
        Ok(value | (u64::from(b) << 56))
    }

    fn fixed(&mut self, n: usize) -> Result<u64> {
        let bytes = self.bytes(n)?;
        Ok(match self.order {
            ByteOrder::BigEndian => BigEndian::read_uint(bytes, n),
            ByteOrder::LittleEndian => LittleEndian::read_uint(bytes, n),
        })
    }

    pub(crate) fn short(&mut self) -> Result<i16> {
        if self.compressed {
            Ok(self.varint()? as u16 as i16)
        } else {
            Ok(self.fixed(2)? as u16 as i16)
        }
    }

    pub(crate) fn char(&mut self) -> Result<char> {
        let code = self.short()? as u16;
        Ok(char::from_u32(u32::from(code)).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    pub(crate) fn int(&mut self) -> Result<i32> {
        if self.compressed {
            Ok(self.varint()? as u32 as i32)
        } else {
            Ok(self.fixed(4)? as u32 as i32)
        }
    }

    pub(crate) fn long(&mut self) -> Result<i64> {
        if self.compressed {
            Ok(self.varint()? as i64)
        } else {
            Ok(self.fixed(8)? as i64)
        }
    }

    pub(crate) fn float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.fixed(4)? as u32))
    }

    pub(crate) fn double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.fixed(8)?))
    }

    /// A non-negative element count.
    pub(crate) fn count(&mut self) -> Result<usize> {
        let n = self.int()?;
        if n < 0 {
            return Err(self.error(format!("negative count {}", n)));
        }
        let n = n as usize;
        // every element takes at least one byte
        if n > self.data.len() - self.pos {
            return Err(self.error(format!("count {} exceeds remaining chunk bytes", n)));
        }
        Ok(n)
    }

    pub(crate) fn string(&mut self) -> Result<RawString> {
        let encoding = self.u8()?;
        match encoding {
            STRING_NULL => Ok(RawString::Null),
            STRING_EMPTY => Ok(RawString::Value(String::new())),
            STRING_CONSTANT_POOL => Ok(RawString::PoolRef(self.long()?)),
            STRING_UTF8 => {
                let n = self.count()?;
                let bytes = self.bytes(n)?;
                Ok(RawString::Value(String::from_utf8_lossy(bytes).into_owned()))
            }
            STRING_CHAR_ARRAY => {
                let n = self.count()?;
                let mut s = String::with_capacity(n);
                for _ in 0..n {
                    s.push(self.char()?);
                }
                Ok(RawString::Value(s))
            }
            STRING_LATIN1 => {
                let n = self.count()?;
                let bytes = self.bytes(n)?;
                Ok(RawString::Value(bytes.iter().map(|&b| char::from(b)).collect()))
            }
            other => Err(self.error(format!("unknown string encoding {}", other))),
        }
    }

    /// A string that may not refer to a constant pool (metadata strings).
    pub(crate) fn inline_string(&mut self) -> Result<Option<String>> {
        match self.string()? {
            RawString::Null => Ok(None),
            RawString::Value(s) => Ok(Some(s)),
            RawString::PoolRef(_) => Err(self.error("constant pool string where inline string expected")),
        }
    }
}

/// The inverse of [`ByteReader`], used by the recording writer.
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
    order: ByteOrder,
    compressed: bool,
}

impl ByteWriter {
    pub(crate) fn new(order: ByteOrder, compressed: bool) -> Self {
        Self {
            buf: Vec::new(),
            order,
            compressed,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn boolean(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub(crate) fn varint(&mut self, mut v: u64) {
        for _ in 0..MAX_VARINT_BYTES - 1 {
            if v < 0x80 {
                self.buf.push(v as u8);
                return;
            }
            self.buf.push((v as u8 & 0x7f) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    fn fixed(&mut self, v: u64, n: usize) {
        let mut bytes = [0u8; 8];
        match self.order {
            ByteOrder::BigEndian => BigEndian::write_uint(&mut bytes[..n], v, n),
            ByteOrder::LittleEndian => LittleEndian::write_uint(&mut bytes[..n], v, n),
        }
        self.buf.extend_from_slice(&bytes[..n]);
    }

    pub(crate) fn int(&mut self, v: i32) {
        if self.compressed {
            self.varint(u64::from(v as u32));
        } else {
            self.fixed(u64::from(v as u32), 4);
        }
    }

    pub(crate) fn long(&mut self, v: i64) {
        if self.compressed {
            self.varint(v as u64);
        } else {
            self.fixed(v as u64, 8);
        }
    }

    pub(crate) fn string(&mut self, s: Option<&str>) {
        match s {
            None => self.u8(STRING_NULL),
            Some("") => self.u8(STRING_EMPTY),
            Some(s) => {
                self.u8(STRING_UTF8);
                self.int(s.len() as i32);
                self.buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Writes a record: size (covering the whole record), type id, then whatever `body` writes.
    ///
    /// The size field is reserved up front as a fixed 4-byte slot (a padded varint when integers
    /// are compressed) and patched once the body length is known.
    pub(crate) fn record<F>(&mut self, type_id: u64, body: F)
    where
        F: FnOnce(&mut ByteWriter),
    {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        self.long(type_id as i64);
        body(self);
        let size = (self.buf.len() - start) as u32;
        let slot = &mut self.buf[start..start + 4];
        if self.compressed {
            slot[0] = (size & 0x7f) as u8 | 0x80;
            slot[1] = ((size >> 7) & 0x7f) as u8 | 0x80;
            slot[2] = ((size >> 14) & 0x7f) as u8 | 0x80;
            slot[3] = ((size >> 21) & 0x7f) as u8;
        } else {
            match self.order {
                ByteOrder::BigEndian => BigEndian::write_u32(slot, size),
                ByteOrder::LittleEndian => LittleEndian::write_u32(slot, size),
            }
        }
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> ByteReader<'_> {
        ByteReader::new(bytes, ByteOrder::BigEndian, true, 0)
    }

    #[test]
    fn varint_boundaries() {
        for &v in &[0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX as u64, u64::MAX] {
            let mut w = ByteWriter::new(ByteOrder::BigEndian, true);
            w.varint(v);
            let bytes = w.into_inner();
            assert!(bytes.len() <= MAX_VARINT_BYTES);
            assert_eq!(reader(&bytes).varint().unwrap(), v, "value {:#x}", v);
        }
    }

    #[test]
    fn padded_size_is_a_valid_varint() {
        let mut w = ByteWriter::new(ByteOrder::BigEndian, true);
        w.record(42, |w| w.long(7));
        let bytes = w.into_inner();
        let mut r = reader(&bytes);
        assert_eq!(r.int().unwrap() as usize, bytes.len());
        assert_eq!(r.long().unwrap(), 42);
        assert_eq!(r.long().unwrap(), 7);
    }

    #[test]
    fn fixed_width_little_endian() {
        let mut w = ByteWriter::new(ByteOrder::LittleEndian, false);
        w.int(0x01020304);
        w.long(-2);
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[4, 3, 2, 1]);
        let mut r = ByteReader::new(&bytes, ByteOrder::LittleEndian, false, 0);
        assert_eq!(r.int().unwrap(), 0x01020304);
        assert_eq!(r.long().unwrap(), -2);
    }

    #[test]
    fn string_encodings() {
        let mut bytes = vec![STRING_NULL, STRING_EMPTY, STRING_LATIN1, 2, b'h', 0xe9];
        bytes.extend_from_slice(&[STRING_CHAR_ARRAY, 2, b'o', b'k', STRING_CONSTANT_POOL, 9]);
        let mut r = reader(&bytes);
        assert_eq!(r.string().unwrap(), RawString::Null);
        assert_eq!(r.string().unwrap(), RawString::Value(String::new()));
        assert_eq!(r.string().unwrap(), RawString::Value("hé".into()));
        assert_eq!(r.string().unwrap(), RawString::Value("ok".into()));
        assert_eq!(r.string().unwrap(), RawString::PoolRef(9));
    }

    #[test]
    fn short_read_reports_absolute_offset() {
        let bytes = [STRING_UTF8, 10, b'a'];
        let mut r = ByteReader::new(&bytes, ByteOrder::BigEndian, true, 1000);
        match r.string() {
            Err(Error::Format { offset, .. }) => assert_eq!(offset, 1002),
            other => panic!("expected format error, got {:?}", other),
        }
    }
}
