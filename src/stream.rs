//! Sequential and seekable access to one stream.

use std::cell::RefCell;
use std::io::{Read, Seek};
use std::rc::Rc;

use crate::block::{DataBlockHeader, Position, StreamDeclaration, Timestamp};
use crate::catalog::{LogCatalog, StreamInfo};
use crate::decode::PayloadDecoder;
use crate::enumerator::{SampleEnumerator, StreamCursor};
use crate::error::{LogError, Result};

/// One sample as handed to consumers: wall-clock time, logical time
/// (normalized by the file's time base) and the raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub rt: Timestamp,
    pub lg: Timestamp,
    pub data: Vec<u8>,
}

/// Cursor over one stream of a [`LogCatalog`].
///
/// The stream holds only its sample index and a byte offset; the file handle
/// stays with the catalog, which is repositioned explicitly on every read.
/// Cloning yields an independent cursor over the same catalog.
pub struct DataStream<R: Read + Seek> {
    catalog: Rc<RefCell<LogCatalog<R>>>,
    decl: StreamDeclaration,
    info: StreamInfo,
    /// −1 before the first sample.
    sample_index: i64,
    /// Offset the next forward scan starts from.
    cursor_pos: u64,
    current: Option<DataBlockHeader>,
}

impl<R: Read + Seek> Clone for DataStream<R> {
    fn clone(&self) -> Self {
        DataStream {
            catalog: Rc::clone(&self.catalog),
            decl: self.decl.clone(),
            info: self.info,
            sample_index: self.sample_index,
            cursor_pos: self.cursor_pos,
            current: self.current,
        }
    }
}

impl<R: Read + Seek> DataStream<R> {
    pub fn open(catalog: Rc<RefCell<LogCatalog<R>>>, stream_index: u16) -> Result<Self> {
        let (decl, info) = {
            let mut cat = catalog.borrow_mut();
            (cat.declaration(stream_index)?.clone(), cat.info(stream_index)?)
        };
        let cursor_pos = info.interval_io.map(|(first, _)| first).unwrap_or(u64::MAX);
        Ok(DataStream {
            catalog,
            decl,
            info,
            sample_index: -1,
            cursor_pos,
            current: None,
        })
    }

    pub fn open_by_name(catalog: Rc<RefCell<LogCatalog<R>>>, name: &str) -> Result<Self> {
        let index = catalog.borrow_mut().stream_index_by_name(name)?.ok_or_else(|| {
            LogError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no stream named '{name}'"),
            ))
        })?;
        Self::open(catalog, index)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn stream_index(&self) -> u16 {
        self.decl.index
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn type_name(&self) -> &str {
        &self.decl.type_name
    }

    pub fn registry(&self) -> &[u8] {
        &self.decl.registry
    }

    pub fn metadata(&self) -> &[u8] {
        &self.decl.metadata
    }

    /// Number of samples in the stream.
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Index of the current sample; −1 before the first.
    pub fn sample_index(&self) -> i64 {
        self.sample_index
    }

    pub fn current_header(&self) -> Option<DataBlockHeader> {
        self.current
    }

    /// Times of the current sample as `(rt, lg)`, the logical time normalized
    /// by the file's time base.  `None` before the first sample.
    pub fn time(&self) -> Option<(Timestamp, Timestamp)> {
        self.current
            .map(|h| (h.rt, h.lg.saturating_sub(self.time_base())))
    }

    pub fn time_base(&self) -> Timestamp {
        self.catalog.borrow().time_base()
    }

    /// First/last timestamps from the stream table, without scanning.
    pub fn time_interval(&self, realtime: bool) -> Option<(Timestamp, Timestamp)> {
        if realtime {
            self.info.interval_rt
        } else {
            self.info.interval_lg
        }
    }

    // ── Cursor movement ──────────────────────────────────────────────────────

    /// Reset to before the first sample, then advance past any samples still
    /// carrying the null logical time.  Returns the first real sample's
    /// header, or `None` for an empty stream.
    pub fn rewind(&mut self) -> Result<Option<DataBlockHeader>> {
        self.sample_index = -1;
        self.current = None;
        self.cursor_pos = match self.info.interval_io {
            Some((first, _)) => first,
            None => return Ok(None),
        };
        while let Some(header) = self.advance()? {
            if header.lg.filled().is_some() {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    /// Move strictly forward one sample.  `None` at end of stream.
    pub fn advance(&mut self) -> Result<Option<DataBlockHeader>> {
        if self.info.size == 0 {
            return Ok(None);
        }
        let next = self
            .catalog
            .borrow_mut()
            .next_data_block(self.decl.index, self.cursor_pos)?;
        if let Some(header) = next {
            self.sample_index += 1;
            self.cursor_pos = header.end_pos();
            self.current = Some(header);
        } else {
            self.current = None;
        }
        Ok(self.current)
    }

    /// Advance and read the next sample.
    pub fn next(&mut self) -> Result<Option<Sample>> {
        match self.advance()? {
            Some(header) => Ok(Some(self.sample(&header)?)),
            None => Ok(None),
        }
    }

    /// Rewind and read the first real sample.
    pub fn first(&mut self) -> Result<Option<Sample>> {
        match self.rewind()? {
            Some(header) => Ok(Some(self.sample(&header)?)),
            None => Ok(None),
        }
    }

    /// Position at the last sample whose position is at or before `pos`,
    /// without reading its payload.
    pub fn seek_header(&mut self, pos: impl Into<Position>) -> Result<DataBlockHeader> {
        let (index, header) = self
            .catalog
            .borrow_mut()
            .seek_stream(self.decl.index, pos.into())?;
        self.sample_index = index as i64;
        self.cursor_pos = header.end_pos();
        self.current = Some(header);
        Ok(header)
    }

    /// Position at the last sample whose position is at or before `pos` and
    /// read it.  Consumers wanting the first sample strictly after `pos`
    /// call [`next`](Self::next) once more.
    pub fn seek(&mut self, pos: impl Into<Position>) -> Result<Sample> {
        let header = self.seek_header(pos)?;
        self.sample(&header)
    }

    /// The sample at `index`.
    pub fn sample_at(&mut self, index: u64) -> Result<Sample> {
        self.seek(Position::Index(index))
    }

    /// Jump straight to the stored last-sample offset — no scan.
    pub fn last(&mut self) -> Result<Sample> {
        let (_, last_pos) = self.info.interval_io.ok_or(LogError::OutOfRange {
            stream: self.decl.index,
            pos: Position::Index(0),
        })?;
        let header = self
            .catalog
            .borrow_mut()
            .next_data_block(self.decl.index, last_pos)?
            .ok_or_else(|| LogError::corrupt(last_pos, "last sample not found"))?;
        self.sample_index = (self.info.size - 1) as i64;
        self.cursor_pos = header.end_pos();
        self.current = Some(header);
        self.sample(&header)
    }

    // ── Payload access ───────────────────────────────────────────────────────

    /// Raw payload bytes for a header, via the catalog.
    pub fn raw_data(&self, header: &DataBlockHeader) -> Result<Vec<u8>> {
        self.catalog.borrow_mut().payload(header)
    }

    /// Decode a sample's payload through the external type layer, passing the
    /// file-vs-host endian-swap flag along.
    pub fn decode<D: PayloadDecoder>(
        &self,
        decoder: &D,
        header: &DataBlockHeader,
    ) -> Result<D::Value> {
        let payload = self.raw_data(header)?;
        let swap = self.catalog.borrow().endian_swap();
        decoder.decode(&payload, swap)
    }

    /// Materialize a [`Sample`] from a header: payload read, logical time
    /// normalized by the file's time base.
    pub fn sample(&self, header: &DataBlockHeader) -> Result<Sample> {
        let data = self.raw_data(header)?;
        let time_base = self.time_base();
        Ok(Sample {
            rt: header.rt,
            lg: header.lg.saturating_sub(time_base),
            data,
        })
    }

    /// Logical (or realtime) timestamp of a header in this stream's basis.
    pub fn sample_time(&self, header: &DataBlockHeader, realtime: bool) -> Timestamp {
        if realtime {
            header.rt
        } else {
            header.lg.saturating_sub(self.time_base())
        }
    }

    /// A fresh range/decimation view over this stream.
    pub fn samples(&self) -> SampleEnumerator<Self> {
        SampleEnumerator::new(self.clone())
    }
}

impl<R: Read + Seek> StreamCursor for DataStream<R> {
    type Header = DataBlockHeader;
    type Output = Sample;

    fn start_at(&mut self, from: Option<Position>) -> Result<Option<DataBlockHeader>> {
        match from {
            Some(pos @ Position::Index(_)) => match self.seek_header(pos) {
                Ok(header) => Ok(Some(header)),
                // Index past the end of the stream: nothing qualifies.
                Err(LogError::OutOfRange { .. }) => Ok(None),
                Err(e) => Err(e),
            },
            Some(pos @ Position::Time(_)) => match self.seek_header(pos) {
                Ok(header) => Ok(Some(header)),
                // Bound precedes the first sample: start from the beginning.
                Err(LogError::OutOfRange { .. }) => self.rewind(),
                Err(e) => Err(e),
            },
            None => self.rewind(),
        }
    }

    fn advance_header(&mut self) -> Result<Option<DataBlockHeader>> {
        self.advance()
    }

    fn header_index(&self) -> u64 {
        self.sample_index.max(0) as u64
    }

    fn header_time(&self, header: &DataBlockHeader, realtime: bool) -> Timestamp {
        self.sample_time(header, realtime)
    }

    fn output(&self, header: &DataBlockHeader) -> Result<Sample> {
        self.sample(header)
    }
}
