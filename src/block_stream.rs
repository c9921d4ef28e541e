//! Byte-exact reading and writing of the block layer.
//!
//! [`BlockStream`] walks a logfile block by block without interpreting
//! stream semantics; [`BlockWriter`] emits blocks and computes every
//! `payload_size` itself; [`LogWriter`] is the producer-facing append API.
//! [`from_version_1`] re-encodes legacy v1 files into the current layout.
//!
//! The reader repositions the underlying handle before every read, so a
//! caller may interleave arbitrary `seek_to_block` jumps with sequential
//! scans against the same file.

use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::block::{
    BlockHeader, BlockInfo, BlockType, DataBlockHeader, Endianness, StreamDeclaration, Timestamp,
    BLOCK_HEADER_SIZE, DATA_HEADER_SIZE,
};
use crate::compression::{deflate, COMPRESSION_MIN_SIZE};
use crate::error::{LogError, Result};

pub const MAGIC: &[u8; 7] = b"POCOLOG";
pub const FORMAT_VERSION: u32 = 2;
pub const MIN_FORMAT_VERSION: u32 = 2;
/// Magic + reserved byte + version + endianness flag.
pub const PROLOGUE_SIZE: u64 = 16;

/// Size of one v1 on-disk time: `[u32 tag][u32 sec][u32 usec][u32 pad]`.
const V1_TIME_SIZE: usize = 16;

// ── Prologue ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prologue {
    pub version: u32,
    pub endianness: Endianness,
}

pub fn write_prologue<W: Write>(w: &mut W, endianness: Endianness) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&[0u8])?;
    endianness.write_u32(w, FORMAT_VERSION)?;
    endianness.write_u32(w, endianness.flag())?;
    Ok(())
}

/// Read and validate the 16-byte prologue.
///
/// The endianness flag is recognised by its byte pattern, since the version
/// field preceding it is itself encoded in the declared endianness.
pub fn read_prologue<R: Read>(r: &mut R) -> Result<Prologue> {
    let mut head = [0u8; 8];
    if r.read_exact(&mut head).is_err() || &head[..7] != MAGIC {
        return Err(LogError::MissingPrologue);
    }

    let mut version_raw = [0u8; 4];
    let mut flag_raw = [0u8; 4];
    if r.read_exact(&mut version_raw).is_err() || r.read_exact(&mut flag_raw).is_err() {
        return Err(LogError::MissingPrologue);
    }

    let endianness = match flag_raw {
        [0, 0, 0, 0] => Endianness::Little,
        [0, 0, 0, 1] => Endianness::Big,
        _ => return Err(LogError::corrupt(12, "unrecognized endianness flag")),
    };
    let version = endianness.u32_from(&version_raw);
    if version < MIN_FORMAT_VERSION {
        return Err(LogError::ObsoleteVersion { found: version, min: MIN_FORMAT_VERSION });
    }
    Ok(Prologue { version, endianness })
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BlockStream<R: Read + Seek> {
    reader: R,
    endianness: Endianness,
    /// Offset of the first block (after the prologue; 0 for v1 files).
    first_block_pos: u64,
    /// Offset of the next block header to read.
    next_pos: u64,
    current: Option<BlockInfo>,
    /// Payload bytes of the current block already consumed by prefix reads.
    consumed: u32,
}

impl<R: Read + Seek> BlockStream<R> {
    /// Open a current-format logfile, reading its prologue.
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let prologue = read_prologue(&mut reader)?;
        Ok(BlockStream {
            reader,
            endianness: prologue.endianness,
            first_block_pos: PROLOGUE_SIZE,
            next_pos: PROLOGUE_SIZE,
            current: None,
            consumed: 0,
        })
    }

    /// Walk a prologue-less v1 file whose endianness the caller declares.
    pub fn with_endianness(reader: R, endianness: Endianness) -> Self {
        BlockStream {
            reader,
            endianness,
            first_block_pos: 0,
            next_pos: 0,
            current: None,
            consumed: 0,
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn current(&self) -> Option<BlockInfo> {
        self.current
    }

    pub fn rewind(&mut self) {
        self.seek_to_block(self.first_block_pos);
    }

    /// Position the stream so the next header read happens at `pos`.
    pub fn seek_to_block(&mut self, pos: u64) {
        self.next_pos = pos;
        self.current = None;
        self.consumed = 0;
    }

    /// Read the next block header, or `None` at end of file.  The payload is
    /// not consumed; a following header read skips it.
    pub fn read_next_block_header(&mut self) -> Result<Option<BlockInfo>> {
        let pos = self.next_pos;
        self.reader.seek(SeekFrom::Start(pos))?;

        let mut raw = [0u8; 8];
        let mut filled = 0;
        while filled < raw.len() {
            match self.reader.read(&mut raw[filled..])? {
                0 if filled == 0 => {
                    self.current = None;
                    return Ok(None);
                }
                0 => return Err(LogError::corrupt(pos, "truncated block header")),
                n => filled += n,
            }
        }

        let header = BlockHeader::parse(&raw, self.endianness)
            .ok_or_else(|| LogError::corrupt(pos, format!("unknown block type {}", raw[0])))?;
        let info = BlockInfo {
            pos,
            kind: header.kind,
            stream_index: header.stream_index,
            payload_size: header.payload_size,
        };
        self.current = Some(info);
        self.consumed = 0;
        self.next_pos = pos + BLOCK_HEADER_SIZE as u64 + header.payload_size as u64;
        Ok(Some(info))
    }

    /// Parse the 17-byte data prefix of the block most recently returned by
    /// [`read_next_block_header`](Self::read_next_block_header).
    pub fn read_data_block_header(&mut self) -> Result<DataBlockHeader> {
        let info = self.expect_current()?;
        if info.kind != BlockType::Data {
            return Err(LogError::corrupt(info.pos, "not a data block"));
        }
        if info.payload_size < DATA_HEADER_SIZE {
            return Err(LogError::corrupt(info.pos, "data block shorter than its header"));
        }

        self.reader.seek(SeekFrom::Start(info.pos + BLOCK_HEADER_SIZE as u64))?;
        let mut raw = [0u8; DATA_HEADER_SIZE as usize];
        self.reader
            .read_exact(&mut raw)
            .map_err(|_| LogError::corrupt(info.pos, "truncated data block header"))?;

        let compressed = match raw[16] {
            0 => false,
            1 => true,
            other => {
                return Err(LogError::corrupt(
                    info.pos,
                    format!("invalid compression flag {other}"),
                ))
            }
        };
        self.consumed = DATA_HEADER_SIZE;
        Ok(DataBlockHeader {
            block_pos: info.pos,
            stream_index: info.stream_index,
            rt: Timestamp {
                sec: self.endianness.u32_from(&raw[0..4]),
                usec: self.endianness.u32_from(&raw[4..8]),
            },
            lg: Timestamp {
                sec: self.endianness.u32_from(&raw[8..12]),
                usec: self.endianness.u32_from(&raw[12..16]),
            },
            compressed,
            payload_len: info.payload_size - DATA_HEADER_SIZE,
        })
    }

    /// Read the remaining payload of the current block — everything after
    /// whatever prefix has been consumed so far.
    pub fn read_payload(&mut self) -> Result<Vec<u8>> {
        let info = self.expect_current()?;
        let len = (info.payload_size - self.consumed) as usize;
        let at = info.pos + (BLOCK_HEADER_SIZE + self.consumed) as u64;
        let payload = self.read_bytes_at(at, len).map_err(|e| match e {
            LogError::CorruptBlock { .. } => LogError::corrupt(
                info.pos,
                format!("truncated payload: {} bytes declared", info.payload_size),
            ),
            other => other,
        })?;
        self.consumed = info.payload_size;
        Ok(payload)
    }

    /// Read exactly `len` bytes at an absolute offset.
    pub fn read_bytes_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                LogError::corrupt(pos, format!("truncated read of {len} bytes"))
            } else {
                LogError::Io(e)
            }
        })?;
        Ok(buf)
    }

    fn expect_current(&self) -> Result<BlockInfo> {
        self.current
            .ok_or_else(|| LogError::corrupt(self.next_pos, "no block header has been read"))
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct BlockWriter<W: Write> {
    writer: W,
    endianness: Endianness,
}

impl<W: Write> BlockWriter<W> {
    /// Start a new logfile: writes the prologue immediately.
    pub fn create(mut writer: W, endianness: Endianness) -> Result<Self> {
        write_prologue(&mut writer, endianness)?;
        Ok(BlockWriter { writer, endianness })
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn write_block(&mut self, kind: BlockType, stream_index: u16, payload: &[u8]) -> Result<()> {
        let header = BlockHeader { kind, stream_index, payload_size: payload.len() as u32 };
        header.write(&mut self.writer, self.endianness)?;
        self.writer.write_all(payload)?;
        Ok(())
    }

    pub fn write_data_block(
        &mut self,
        stream_index: u16,
        rt: Timestamp,
        lg: Timestamp,
        compressed: bool,
        payload: &[u8],
    ) -> Result<()> {
        let header = BlockHeader {
            kind: BlockType::Data,
            stream_index,
            payload_size: DATA_HEADER_SIZE + payload.len() as u32,
        };
        header.write(&mut self.writer, self.endianness)?;
        rt.write(&mut self.writer, self.endianness)?;
        lg.write(&mut self.writer, self.endianness)?;
        self.writer.write_all(&[compressed as u8])?;
        self.writer.write_all(payload)?;
        Ok(())
    }

    pub fn write_control_block(
        &mut self,
        stream_index: u16,
        rt: Timestamp,
        lg: Timestamp,
        body: &[u8],
    ) -> Result<()> {
        let mut payload = Vec::with_capacity(16 + body.len());
        rt.write(&mut payload, self.endianness)?;
        lg.write(&mut payload, self.endianness)?;
        payload.extend_from_slice(body);
        self.write_block(BlockType::Control, stream_index, &payload)
    }

    pub fn write_stream_declaration(&mut self, decl: &StreamDeclaration) -> Result<()> {
        let payload = decl.encode(self.endianness);
        self.write_block(BlockType::StreamDecl, decl.index, &payload)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ── Producer API ─────────────────────────────────────────────────────────────

/// Append-only writer a producer uses to record samples per named stream.
pub struct LogWriter<W: Write> {
    blocks: BlockWriter<W>,
    declared: HashSet<u16>,
    next_index: u16,
    compress: bool,
}

impl<W: Write> LogWriter<W> {
    pub fn create(writer: W, endianness: Endianness) -> Result<Self> {
        Ok(LogWriter {
            blocks: BlockWriter::create(writer, endianness)?,
            declared: HashSet::new(),
            next_index: 0,
            compress: false,
        })
    }

    /// Deflate sample payloads larger than [`COMPRESSION_MIN_SIZE`] when the
    /// compressed form is strictly smaller.
    pub fn compress_samples(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Declare a new stream and return its index.
    pub fn create_stream(
        &mut self,
        name: &str,
        type_name: &str,
        registry: &[u8],
        metadata: &[u8],
    ) -> Result<u16> {
        let index = self.next_index;
        self.next_index += 1;
        let decl = StreamDeclaration {
            index,
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            registry: registry.to_vec(),
            metadata: metadata.to_vec(),
        };
        self.blocks.write_stream_declaration(&decl)?;
        self.declared.insert(index);
        Ok(index)
    }

    pub fn write_sample(
        &mut self,
        stream_index: u16,
        rt: Timestamp,
        lg: Timestamp,
        payload: &[u8],
    ) -> Result<()> {
        if !self.declared.contains(&stream_index) {
            return Err(LogError::UnknownStream(stream_index));
        }
        if self.compress && payload.len() > COMPRESSION_MIN_SIZE {
            let deflated = deflate(payload)?;
            if deflated.len() < payload.len() {
                return self.blocks.write_data_block(stream_index, rt, lg, true, &deflated);
            }
        }
        self.blocks.write_data_block(stream_index, rt, lg, false, payload)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.blocks.flush()
    }

    pub fn into_inner(self) -> W {
        self.blocks.into_inner()
    }
}

// ── v1 migration ─────────────────────────────────────────────────────────────

/// Streaming re-encode of a legacy v1 logfile into the current layout.
///
/// v1 files have no prologue and no compression flag, and store each time as
/// `[u32 tag][u32 sec][u32 usec][u32 pad]`.  Data blocks are re-emitted
/// through the normal writer (compressed = false); Control blocks keep their
/// body with the two times compacted; StreamDecl blocks copy verbatim.
/// Block order and stream indices are preserved exactly.
pub fn from_version_1<R: Read + Seek, W: Write>(
    mut src: R,
    dst: W,
    endianness: Endianness,
) -> Result<()> {
    src.seek(SeekFrom::Start(0))?;
    let mut from = BlockStream::with_endianness(src, endianness);
    let mut to = BlockWriter::create(dst, endianness)?;

    while let Some(info) = from.read_next_block_header()? {
        let payload = from.read_payload()?;
        match info.kind {
            BlockType::StreamDecl => {
                to.write_block(BlockType::StreamDecl, info.stream_index, &payload)?;
            }
            BlockType::Data => {
                let (rt, lg) = parse_v1_times(&payload, endianness, info.pos)?;
                to.write_data_block(
                    info.stream_index,
                    rt,
                    lg,
                    false,
                    &payload[2 * V1_TIME_SIZE..],
                )?;
            }
            BlockType::Control => {
                let (rt, lg) = parse_v1_times(&payload, endianness, info.pos)?;
                to.write_control_block(info.stream_index, rt, lg, &payload[2 * V1_TIME_SIZE..])?;
            }
        }
    }
    to.flush()
}

fn parse_v1_times(payload: &[u8], e: Endianness, pos: u64) -> Result<(Timestamp, Timestamp)> {
    if payload.len() < 2 * V1_TIME_SIZE {
        return Err(LogError::corrupt(pos, "v1 block shorter than its time prefix"));
    }
    // Tag and padding words are dropped; only sec/usec survive.
    let time_at = |off: usize| Timestamp {
        sec: e.u32_from(&payload[off + 4..off + 8]),
        usec: e.u32_from(&payload[off + 8..off + 12]),
    };
    Ok((time_at(0), time_at(V1_TIME_SIZE)))
}
