use byteorder::{BigEndian, ByteOrder as Order, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::ByteOrder;
use crate::error::{Error, Result};

/// Size in bytes of every chunk header.
pub const HEADER_SIZE: u64 = 68;

pub(crate) const MAGIC: &[u8; 3] = b"FLR";
pub(crate) const SUPPORTED_MAJOR_VERSIONS: &[u16] = &[1, 2];

/// Feature bit: integers inside the chunk are varint-encoded.
pub const FEATURE_COMPRESSED_INTS: u32 = 1;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// The fixed-size header that starts every chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    /// Byte offset of the chunk within its recording.
    pub offset: u64,
    /// Size of the chunk in bytes, header included.
    pub size: u64,
    /// Byte order of every multi-byte value in the chunk.
    pub byte_order: ByteOrder,
    /// Major format version.
    pub major: u16,
    /// Minor format version.
    pub minor: u16,
    /// Offset of the newest constant pool record, relative to the chunk start (0 if none).
    pub constant_pool_offset: u64,
    /// Offset of the metadata record, relative to the chunk start.
    pub metadata_offset: u64,
    /// Wall-clock start, nanoseconds since the epoch.
    pub start_nanos: i64,
    /// Wall-clock duration in nanoseconds.
    pub duration_nanos: i64,
    /// Tick counter value at `start_nanos`.
    pub start_ticks: i64,
    /// Tick counter frequency.
    pub ticks_per_second: i64,
    /// Feature bits, see [`FEATURE_COMPRESSED_INTS`].
    pub features: u32,
}

impl ChunkHeader {
    /// Decodes a header found at `offset`.
    pub(crate) fn parse(buf: &[u8; HEADER_SIZE as usize], offset: u64) -> Result<Self> {
        if &buf[..3] != MAGIC {
            return Err(Error::format(
                offset,
                format!("bad chunk magic {:02x?}", &buf[..3]),
            ));
        }
        match buf[3] {
            0 => Self::parse_with::<BigEndian>(buf, offset, ByteOrder::BigEndian),
            1 => Self::parse_with::<LittleEndian>(buf, offset, ByteOrder::LittleEndian),
            flag => Err(Error::format(
                offset + 3,
                format!("unknown byte order flag {:#04x}", flag),
            )),
        }
    }

    fn parse_with<T: Order>(buf: &[u8], offset: u64, byte_order: ByteOrder) -> Result<Self> {
        let major = T::read_u16(&buf[4..6]);
        let minor = T::read_u16(&buf[6..8]);
        if !SUPPORTED_MAJOR_VERSIONS.contains(&major) {
            return Err(Error::format(
                offset + 4,
                format!("unsupported chunk version {}.{}", major, minor),
            ));
        }

        let size = T::read_i64(&buf[8..16]);
        let constant_pool_offset = T::read_i64(&buf[16..24]);
        let metadata_offset = T::read_i64(&buf[24..32]);
        let header = ChunkHeader {
            offset,
            size: size.max(0) as u64,
            byte_order,
            major,
            minor,
            constant_pool_offset: constant_pool_offset.max(0) as u64,
            metadata_offset: metadata_offset.max(0) as u64,
            start_nanos: T::read_i64(&buf[32..40]),
            duration_nanos: T::read_i64(&buf[40..48]),
            start_ticks: T::read_i64(&buf[48..56]),
            ticks_per_second: T::read_i64(&buf[56..64]),
            features: T::read_u32(&buf[64..68]),
        };

        if size < HEADER_SIZE as i64 {
            return Err(Error::format(
                offset + 8,
                format!("chunk size {} is smaller than its header", size),
            ));
        }
        if metadata_offset < HEADER_SIZE as i64 || metadata_offset >= size {
            return Err(Error::format(
                offset + 24,
                format!("metadata offset {} outside chunk of {} bytes", metadata_offset, size),
            ));
        }
        if constant_pool_offset != 0
            && (constant_pool_offset < HEADER_SIZE as i64 || constant_pool_offset >= size)
        {
            return Err(Error::format(
                offset + 16,
                format!(
                    "constant pool offset {} outside chunk of {} bytes",
                    constant_pool_offset, size
                ),
            ));
        }
        if header.ticks_per_second <= 0 {
            return Err(Error::format(
                offset + 56,
                format!("non-positive tick frequency {}", header.ticks_per_second),
            ));
        }
        if header.duration_nanos < 0 {
            return Err(Error::format(
                offset + 40,
                format!("negative chunk duration {}", header.duration_nanos),
            ));
        }
        Ok(header)
    }

    /// Encodes the header, the inverse of parsing.
    pub(crate) fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        match self.byte_order {
            ByteOrder::BigEndian => self.encode::<BigEndian>(0),
            ByteOrder::LittleEndian => self.encode::<LittleEndian>(1),
        }
    }

    fn encode<T: Order>(&self, flag: u8) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..3].copy_from_slice(MAGIC);
        buf[3] = flag;
        T::write_u16(&mut buf[4..6], self.major);
        T::write_u16(&mut buf[6..8], self.minor);
        T::write_i64(&mut buf[8..16], self.size as i64);
        T::write_i64(&mut buf[16..24], self.constant_pool_offset as i64);
        T::write_i64(&mut buf[24..32], self.metadata_offset as i64);
        T::write_i64(&mut buf[32..40], self.start_nanos);
        T::write_i64(&mut buf[40..48], self.duration_nanos);
        T::write_i64(&mut buf[48..56], self.start_ticks);
        T::write_i64(&mut buf[56..64], self.ticks_per_second);
        T::write_u32(&mut buf[64..68], self.features);
        buf
    }

    /// Byte offset just past the end of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Wall-clock end, nanoseconds since the epoch.
    pub fn end_nanos(&self) -> i64 {
        self.start_nanos.saturating_add(self.duration_nanos)
    }

    /// Whether integers in this chunk are varint-encoded.
    pub fn compressed_integers(&self) -> bool {
        self.features & FEATURE_COMPRESSED_INTS != 0
    }

    /// Converts a tick counter value from this chunk to nanoseconds since the epoch.
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        let elapsed = self.ticks_to_duration_nanos(ticks - self.start_ticks);
        self.start_nanos.saturating_add(elapsed)
    }

    /// Converts a tick delta from this chunk to nanoseconds.
    pub fn ticks_to_duration_nanos(&self, ticks: i64) -> i64 {
        let nanos = i128::from(ticks) * NANOS_PER_SECOND / i128::from(self.ticks_per_second);
        nanos.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Wall-clock start of the chunk.
    pub fn start_time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.start_nanos)
    }

    /// Same header, as it would look at the start of a standalone file.
    pub fn relocated(&self, offset: u64) -> ChunkHeader {
        ChunkHeader {
            offset,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(order: ByteOrder) -> ChunkHeader {
        ChunkHeader {
            offset: 0,
            size: 500,
            byte_order: order,
            major: 2,
            minor: 1,
            constant_pool_offset: 300,
            metadata_offset: 400,
            start_nanos: 1_700_000_000_000_000_000,
            duration_nanos: 2_000_000_000,
            start_ticks: 1000,
            ticks_per_second: 1_000_000,
            features: FEATURE_COMPRESSED_INTS,
        }
    }

    #[test]
    fn both_byte_orders_round_trip() {
        for &order in &[ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let h = header(order);
            let parsed = ChunkHeader::parse(&h.to_bytes(), 0).unwrap();
            assert_eq!(parsed, h);
        }
    }

    #[test]
    fn byte_order_changes_layout() {
        let be = header(ByteOrder::BigEndian).to_bytes();
        let le = header(ByteOrder::LittleEndian).to_bytes();
        assert_eq!(be[3], 0);
        assert_eq!(le[3], 1);
        assert_eq!(&be[4..6], &[0, 2]);
        assert_eq!(&le[4..6], &[2, 0]);
    }

    #[test]
    fn rejects_bad_magic_and_versions() {
        let mut buf = header(ByteOrder::BigEndian).to_bytes();
        buf[0] = b'X';
        assert!(matches!(
            ChunkHeader::parse(&buf, 128),
            Err(Error::Format { offset: 128, .. })
        ));

        let mut h = header(ByteOrder::BigEndian);
        h.major = 7;
        assert!(matches!(
            ChunkHeader::parse(&h.to_bytes(), 0),
            Err(Error::Format { offset: 4, .. })
        ));

        let mut buf = header(ByteOrder::BigEndian).to_bytes();
        buf[3] = 9;
        assert!(ChunkHeader::parse(&buf, 0).is_err());
    }

    #[test]
    fn rejects_offsets_outside_chunk() {
        let mut h = header(ByteOrder::BigEndian);
        h.metadata_offset = 900;
        assert!(ChunkHeader::parse(&h.to_bytes(), 0).is_err());

        let mut h = header(ByteOrder::BigEndian);
        h.size = 10;
        assert!(ChunkHeader::parse(&h.to_bytes(), 0).is_err());
    }

    #[test]
    fn tick_conversion() {
        let h = header(ByteOrder::BigEndian);
        // 1_000_000 ticks per second: 1 tick = 1µs
        assert_eq!(h.ticks_to_nanos(1000), h.start_nanos);
        assert_eq!(h.ticks_to_nanos(1500), h.start_nanos + 500_000);
        assert_eq!(h.ticks_to_duration_nanos(3), 3_000);
        assert_eq!(h.end_nanos(), h.start_nanos + 2_000_000_000);
    }
}
