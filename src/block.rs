//! Wire-level model of the pocolog block format.
//!
//! A logfile is a 16-byte prologue followed by a flat sequence of blocks.
//! Every block starts with an 8-byte [`BlockHeader`]; Data blocks carry a
//! 17-byte [`DataBlockHeader`] prefix inside their payload.  All multi-byte
//! integers are encoded in the endianness the prologue declares, so every
//! read/write routine here takes an explicit [`Endianness`] — there is no
//! process-wide default.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

pub const BLOCK_HEADER_SIZE: u32 = 8;
pub const DATA_HEADER_SIZE: u32 = 17;

// ── Endianness ───────────────────────────────────────────────────────────────

/// Byte order of one logfile, declared in its prologue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn host() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    /// Prologue flag value: 0 = little, 1 = big.
    pub fn flag(self) -> u32 {
        match self {
            Endianness::Little => 0,
            Endianness::Big => 1,
        }
    }

    pub fn read_u16<R: Read>(self, r: &mut R) -> io::Result<u16> {
        match self {
            Endianness::Little => r.read_u16::<LittleEndian>(),
            Endianness::Big => r.read_u16::<BigEndian>(),
        }
    }

    pub fn read_u32<R: Read>(self, r: &mut R) -> io::Result<u32> {
        match self {
            Endianness::Little => r.read_u32::<LittleEndian>(),
            Endianness::Big => r.read_u32::<BigEndian>(),
        }
    }

    pub fn write_u16<W: Write>(self, w: &mut W, v: u16) -> io::Result<()> {
        match self {
            Endianness::Little => w.write_u16::<LittleEndian>(v),
            Endianness::Big => w.write_u16::<BigEndian>(v),
        }
    }

    pub fn write_u32<W: Write>(self, w: &mut W, v: u32) -> io::Result<()> {
        match self {
            Endianness::Little => w.write_u32::<LittleEndian>(v),
            Endianness::Big => w.write_u32::<BigEndian>(v),
        }
    }

    pub fn u16_from(self, buf: &[u8]) -> u16 {
        match self {
            Endianness::Little => LittleEndian::read_u16(buf),
            Endianness::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn u32_from(self, buf: &[u8]) -> u32 {
        match self {
            Endianness::Little => LittleEndian::read_u32(buf),
            Endianness::Big => BigEndian::read_u32(buf),
        }
    }
}

// ── Timestamp ────────────────────────────────────────────────────────────────

/// A `(seconds, microseconds)` pair as stored on disk.
///
/// The all-zero value is the producer's "not yet stamped" sentinel;
/// [`Timestamp::filled`] is the `Option` view of that convention.  `usec` is
/// kept below one million by every constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub fn new(sec: u32, usec: u32) -> Self {
        Timestamp { sec: sec + usec / 1_000_000, usec: usec % 1_000_000 }
    }

    pub fn from_micros(us: u64) -> Self {
        Timestamp { sec: (us / 1_000_000) as u32, usec: (us % 1_000_000) as u32 }
    }

    pub fn as_micros(self) -> u64 {
        self.sec as u64 * 1_000_000 + self.usec as u64
    }

    pub fn is_null(self) -> bool {
        self.sec == 0 && self.usec == 0
    }

    /// `None` for the all-zero "not yet stamped" sentinel.
    pub fn filled(self) -> Option<Timestamp> {
        if self.is_null() { None } else { Some(self) }
    }

    pub fn add(self, interval: Timestamp) -> Timestamp {
        Timestamp::from_micros(self.as_micros() + interval.as_micros())
    }

    pub fn saturating_sub(self, other: Timestamp) -> Timestamp {
        Timestamp::from_micros(self.as_micros().saturating_sub(other.as_micros()))
    }

    pub fn read<R: Read>(r: &mut R, e: Endianness) -> io::Result<Self> {
        let sec = e.read_u32(r)?;
        let usec = e.read_u32(r)?;
        Ok(Timestamp { sec, usec })
    }

    pub fn write<W: Write>(self, w: &mut W, e: Endianness) -> io::Result<()> {
        e.write_u32(w, self.sec)?;
        e.write_u32(w, self.usec)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

// ── Position ─────────────────────────────────────────────────────────────────

/// A seek target or range bound: either a sample index or a logical time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Index(u64),
    Time(Timestamp),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Index(i) => write!(f, "index {i}"),
            Position::Time(t) => write!(f, "time {t}"),
        }
    }
}

impl From<u64> for Position {
    fn from(i: u64) -> Self {
        Position::Index(i)
    }
}

impl From<Timestamp> for Position {
    fn from(t: Timestamp) -> Self {
        Position::Time(t)
    }
}

// ── Block headers ────────────────────────────────────────────────────────────

/// Kind tag of one block.  Values are frozen on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Declares a new logical stream.
    StreamDecl = 1,
    /// One time-stamped sample payload.
    Data = 2,
    /// Stream lifecycle control; payload is opaque past the time pair.
    Control = 3,
}

impl BlockType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(BlockType::StreamDecl),
            2 => Some(BlockType::Data),
            3 => Some(BlockType::Control),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The 8-byte header preceding every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub kind: BlockType,
    pub stream_index: u16,
    pub payload_size: u32,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, w: &mut W, e: Endianness) -> io::Result<()> {
        w.write_u8(self.kind.as_u8())?;
        w.write_u8(0)?;
        e.write_u16(w, self.stream_index)?;
        e.write_u32(w, self.payload_size)
    }

    /// Parse from the 8 raw header bytes.  `None` on an unknown kind tag.
    pub fn parse(buf: &[u8; 8], e: Endianness) -> Option<Self> {
        Some(BlockHeader {
            kind: BlockType::from_u8(buf[0])?,
            stream_index: e.u16_from(&buf[2..4]),
            payload_size: e.u32_from(&buf[4..8]),
        })
    }
}

/// A block header together with its file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub pos: u64,
    pub kind: BlockType,
    pub stream_index: u16,
    pub payload_size: u32,
}

/// Header of one Data block: the 17-byte wire prefix plus the position
/// bookkeeping needed to re-read the sample later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockHeader {
    /// Offset of the enclosing block header.
    pub block_pos: u64,
    pub stream_index: u16,
    /// Wall-clock capture time.
    pub rt: Timestamp,
    /// Recorded/simulated time; all-zero when not yet stamped.
    pub lg: Timestamp,
    pub compressed: bool,
    /// Payload bytes following the prefix.
    pub payload_len: u32,
}

impl DataBlockHeader {
    /// Offset of the first payload byte.
    pub fn payload_pos(self) -> u64 {
        self.block_pos + (BLOCK_HEADER_SIZE + DATA_HEADER_SIZE) as u64
    }

    /// Offset of the next block header.
    pub fn end_pos(self) -> u64 {
        self.payload_pos() + self.payload_len as u64
    }
}

// ── Stream declarations ──────────────────────────────────────────────────────

/// Payload of a StreamDecl block: four `u32`-length-prefixed sections.
/// The registry and metadata blobs are opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDeclaration {
    pub index: u16,
    pub name: String,
    pub type_name: String,
    pub registry: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl StreamDeclaration {
    pub fn new(index: u16, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        StreamDeclaration {
            index,
            name: name.into(),
            type_name: type_name.into(),
            registry: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn encode(&self, e: Endianness) -> Vec<u8> {
        let sections: [&[u8]; 4] = [
            self.name.as_bytes(),
            self.type_name.as_bytes(),
            &self.registry,
            &self.metadata,
        ];
        let mut out = Vec::with_capacity(16 + sections.iter().map(|s| s.len()).sum::<usize>());
        for section in sections {
            // Vec<u8> is an infallible writer.
            e.write_u32(&mut out, section.len() as u32).unwrap();
            out.extend_from_slice(section);
        }
        out
    }

    pub fn parse(
        index: u16,
        payload: &[u8],
        e: Endianness,
    ) -> std::result::Result<Self, &'static str> {
        fn take<'a>(
            rest: &mut &'a [u8],
            e: Endianness,
            what: &'static str,
        ) -> std::result::Result<&'a [u8], &'static str> {
            let cur = *rest;
            if cur.len() < 4 {
                return Err(what);
            }
            let len = e.u32_from(&cur[..4]) as usize;
            if cur.len() < 4 + len {
                return Err(what);
            }
            let (section, tail) = cur[4..].split_at(len);
            *rest = tail;
            Ok(section)
        }

        let mut rest = payload;
        let name = take(&mut rest, e, "truncated stream name")?;
        let type_name = take(&mut rest, e, "truncated type name")?;
        let registry = take(&mut rest, e, "truncated type registry")?.to_vec();
        let metadata = take(&mut rest, e, "truncated stream metadata")?.to_vec();
        if !rest.is_empty() {
            return Err("trailing bytes after stream declaration");
        }

        Ok(StreamDeclaration {
            index,
            name: String::from_utf8(name.to_vec()).map_err(|_| "stream name is not valid UTF-8")?,
            type_name: String::from_utf8(type_name.to_vec())
                .map_err(|_| "type name is not valid UTF-8")?,
            registry,
            metadata,
        })
    }
}
