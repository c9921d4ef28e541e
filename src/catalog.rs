//! The per-file catalog: stream table, interval index and shared cursor.
//!
//! [`LogCatalog`] is the single owner of the underlying file handle.  Stream
//! cursors ([`crate::stream::DataStream`]) hold only indices and byte
//! offsets; every access path here takes an absolute offset and repositions
//! the handle before reading, so any number of cursors can interleave reads
//! against one file.

use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::block::{
    BlockInfo, BlockType, DataBlockHeader, Endianness, Position, StreamDeclaration, Timestamp,
};
use crate::block_stream::BlockStream;
use crate::compression::inflate;
use crate::error::{LogError, Result};

/// Per-stream summary built while scanning: sample count plus the realtime,
/// logical-time and byte-offset intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: u16,
    pub size: u64,
    pub interval_rt: Option<(Timestamp, Timestamp)>,
    /// First/last *filled* logical time; `None` when every sample carries the
    /// null sentinel.
    pub interval_lg: Option<(Timestamp, Timestamp)>,
    /// Offsets of the first and last Data block of this stream.
    pub interval_io: Option<(u64, u64)>,
}

impl StreamInfo {
    fn empty(index: u16) -> Self {
        StreamInfo {
            index,
            size: 0,
            interval_rt: None,
            interval_lg: None,
            interval_io: None,
        }
    }
}

#[derive(Debug)]
pub struct LogCatalog<R: Read + Seek> {
    blocks: BlockStream<R>,
    /// Subtracted from logical times when samples are handed out.
    time_base: Timestamp,
    declarations: Vec<StreamDeclaration>,
    infos: Vec<StreamInfo>,
    /// stream_index → slot in the declaration-order tables.
    slots: HashMap<u16, usize>,
    scanned: bool,
}

impl<R: Read + Seek> LogCatalog<R> {
    pub fn open(reader: R) -> Result<Self> {
        Ok(LogCatalog {
            blocks: BlockStream::new(reader)?,
            time_base: Timestamp::default(),
            declarations: Vec::new(),
            infos: Vec::new(),
            slots: HashMap::new(),
            scanned: false,
        })
    }

    pub fn endianness(&self) -> Endianness {
        self.blocks.endianness()
    }

    /// True when the file's byte order differs from the host's; decoded
    /// values must then be byte-swapped by the type layer.
    pub fn endian_swap(&self) -> bool {
        self.blocks.endianness() != Endianness::host()
    }

    pub fn time_base(&self) -> Timestamp {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: Timestamp) {
        self.time_base = time_base;
    }

    // ── Stream table ─────────────────────────────────────────────────────────

    /// Scan the whole file once, building the stream table.  Reruns are
    /// no-ops; every per-stream query below triggers this lazily.
    fn ensure_scanned(&mut self) -> Result<()> {
        if self.scanned {
            return Ok(());
        }
        self.blocks.rewind();
        while let Some(info) = self.blocks.read_next_block_header()? {
            match info.kind {
                BlockType::StreamDecl => {
                    let payload = self.blocks.read_payload()?;
                    let decl = StreamDeclaration::parse(
                        info.stream_index,
                        &payload,
                        self.blocks.endianness(),
                    )
                    .map_err(|reason| LogError::corrupt(info.pos, reason))?;
                    if self.slots.contains_key(&decl.index) {
                        return Err(LogError::corrupt(
                            info.pos,
                            format!("duplicate declaration of stream {}", decl.index),
                        ));
                    }
                    self.slots.insert(decl.index, self.declarations.len());
                    self.infos.push(StreamInfo::empty(decl.index));
                    self.declarations.push(decl);
                }
                BlockType::Data => {
                    let slot = *self
                        .slots
                        .get(&info.stream_index)
                        .ok_or(LogError::UnknownStream(info.stream_index))?;
                    let header = self.blocks.read_data_block_header()?;
                    let entry = &mut self.infos[slot];
                    entry.size += 1;
                    entry.interval_io.get_or_insert((info.pos, info.pos)).1 = info.pos;
                    entry.interval_rt.get_or_insert((header.rt, header.rt)).1 = header.rt;
                    if let Some(lg) = header.lg.filled() {
                        entry.interval_lg.get_or_insert((lg, lg)).1 = lg;
                    }
                }
                BlockType::Control => {
                    if !self.slots.contains_key(&info.stream_index) {
                        return Err(LogError::UnknownStream(info.stream_index));
                    }
                }
            }
        }
        self.scanned = true;
        Ok(())
    }

    pub fn declarations(&mut self) -> Result<&[StreamDeclaration]> {
        self.ensure_scanned()?;
        Ok(&self.declarations)
    }

    pub fn declaration(&mut self, stream_index: u16) -> Result<&StreamDeclaration> {
        let slot = self.slot(stream_index)?;
        Ok(&self.declarations[slot])
    }

    pub fn info(&mut self, stream_index: u16) -> Result<StreamInfo> {
        let slot = self.slot(stream_index)?;
        Ok(self.infos[slot])
    }

    pub fn stream_index_by_name(&mut self, name: &str) -> Result<Option<u16>> {
        self.ensure_scanned()?;
        Ok(self.declarations.iter().find(|d| d.name == name).map(|d| d.index))
    }

    fn slot(&mut self, stream_index: u16) -> Result<usize> {
        self.ensure_scanned()?;
        self.slots
            .get(&stream_index)
            .copied()
            .ok_or(LogError::UnknownStream(stream_index))
    }

    // ── Block access ─────────────────────────────────────────────────────────

    /// Lazy, finite walk over every block header in the file.
    pub fn block_headers(&mut self, rewind: bool) -> BlockHeaderIter<'_, R> {
        if rewind {
            self.blocks.rewind();
        }
        BlockHeaderIter { blocks: &mut self.blocks }
    }

    /// Next Data block of one stream at or after `from_pos`, leaving the
    /// cursor positioned for [`payload`](Self::payload).
    pub fn next_data_block(
        &mut self,
        stream_index: u16,
        from_pos: u64,
    ) -> Result<Option<DataBlockHeader>> {
        self.blocks.seek_to_block(from_pos);
        while let Some(info) = self.blocks.read_next_block_header()? {
            if info.kind == BlockType::Data && info.stream_index == stream_index {
                return Ok(Some(self.blocks.read_data_block_header()?));
            }
        }
        Ok(None)
    }

    /// The Data block starting exactly at `pos`.
    fn data_block_at(&mut self, stream_index: u16, pos: u64) -> Result<DataBlockHeader> {
        match self.next_data_block(stream_index, pos)? {
            Some(header) if header.block_pos == pos => Ok(header),
            _ => Err(LogError::corrupt(pos, "indexed data block not found")),
        }
    }

    /// Find the last sample of one stream at or before `pos`, returning its
    /// sample index and header.  Index seeks are exact; time seeks use the
    /// interval as a fast bound before scanning.
    pub fn seek_stream(
        &mut self,
        stream_index: u16,
        pos: Position,
    ) -> Result<(u64, DataBlockHeader)> {
        let info = self.info(stream_index)?;
        let out_of_range = LogError::OutOfRange { stream: stream_index, pos };
        let Some((first_io, last_io)) = info.interval_io else {
            return Err(out_of_range);
        };

        match pos {
            Position::Index(target) => {
                if target >= info.size {
                    return Err(out_of_range);
                }
                if target == info.size - 1 {
                    return Ok((target, self.data_block_at(stream_index, last_io)?));
                }
                let mut index = 0u64;
                let mut cursor = first_io;
                while let Some(header) = self.next_data_block(stream_index, cursor)? {
                    if index == target {
                        return Ok((index, header));
                    }
                    index += 1;
                    cursor = header.end_pos();
                }
                Err(LogError::corrupt(cursor, "stream ended before its indexed sample"))
            }
            Position::Time(target) => {
                let Some((first_lg, last_lg)) = info.interval_lg else {
                    return Err(out_of_range);
                };
                if target < first_lg {
                    return Err(out_of_range);
                }
                if target >= last_lg {
                    return Ok((info.size - 1, self.data_block_at(stream_index, last_io)?));
                }
                let mut best: Option<(u64, DataBlockHeader)> = None;
                let mut index = 0u64;
                let mut cursor = first_io;
                while let Some(header) = self.next_data_block(stream_index, cursor)? {
                    if let Some(lg) = header.lg.filled() {
                        if lg > target {
                            break;
                        }
                        best = Some((index, header));
                    }
                    index += 1;
                    cursor = header.end_pos();
                }
                best.ok_or(out_of_range)
            }
        }
    }

    /// Raw payload bytes for a data header, inflated when the compression
    /// flag is set.
    pub fn payload(&mut self, header: &DataBlockHeader) -> Result<Vec<u8>> {
        let raw = self
            .blocks
            .read_bytes_at(header.payload_pos(), header.payload_len as usize)?;
        if header.compressed {
            inflate(&raw)
        } else {
            Ok(raw)
        }
    }
}

pub struct BlockHeaderIter<'a, R: Read + Seek> {
    blocks: &'a mut BlockStream<R>,
}

impl<R: Read + Seek> Iterator for BlockHeaderIter<'_, R> {
    type Item = Result<BlockInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocks.read_next_block_header().transpose()
    }
}
