//! Time-ordered merge of several streams with as-of semantics.
//!
//! At every step the merge reports the latest known sample of *every* input
//! stream, not only the one that advanced.  Internally it keeps two parallel
//! slot arrays, `current` and `lookahead`, one per stream; `next` advances
//! only the stream whose lookahead carries the minimum time.

use std::io::{Read, Seek};

use crate::block::{DataBlockHeader, Position, Timestamp};
use crate::enumerator::{SampleEnumerator, StreamCursor};
use crate::error::Result;
use crate::stream::DataStream;

#[derive(Debug, Clone, Copy)]
struct StreamSample {
    time: Timestamp,
    header: DataBlockHeader,
}

/// Snapshot of the merged state at one point in time, usable to re-read the
/// same per-stream samples later via [`JointStream::data`].
#[derive(Debug, Clone)]
pub struct JointHeader {
    pub time: Timestamp,
    pub headers: Vec<DataBlockHeader>,
}

pub struct JointStream<R: Read + Seek> {
    streams: Vec<DataStream<R>>,
    use_realtime: bool,
    current: Vec<Option<StreamSample>>,
    lookahead: Vec<Option<StreamSample>>,
    initialized: bool,
    /// Merge steps taken since the last seek; the index basis for
    /// enumeration over the merged sequence.
    steps: u64,
}

impl<R: Read + Seek> Clone for JointStream<R> {
    fn clone(&self) -> Self {
        JointStream {
            streams: self.streams.clone(),
            use_realtime: self.use_realtime,
            current: self.current.clone(),
            lookahead: self.lookahead.clone(),
            initialized: self.initialized,
            steps: self.steps,
        }
    }
}

impl<R: Read + Seek> JointStream<R> {
    pub fn new(streams: Vec<DataStream<R>>) -> Self {
        JointStream {
            streams,
            use_realtime: false,
            current: Vec::new(),
            lookahead: Vec::new(),
            initialized: false,
            steps: 0,
        }
    }

    /// Merge on wall-clock time instead of logical time.
    pub fn realtime(mut self, use_realtime: bool) -> Self {
        self.use_realtime = use_realtime;
        self
    }

    pub fn streams(&self) -> &[DataStream<R>] {
        &self.streams
    }

    pub fn name(&self) -> String {
        self.streams
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The merged "now": the maximum time across current samples.
    pub fn time(&self) -> Option<Timestamp> {
        self.current.iter().flatten().map(|s| s.time).max()
    }

    fn stream_sample(&self, slot: usize, header: DataBlockHeader) -> StreamSample {
        StreamSample {
            time: self.streams[slot].sample_time(&header, self.use_realtime),
            header,
        }
    }

    /// Rewind every stream and advance the merge up to `limit` (default: the
    /// minimum first-sample time, i.e. no advancing).  Returns the merged
    /// time and per-stream payloads, or `None` when any stream runs out
    /// before the limit — the merge is only defined while every input still
    /// has data.
    pub fn seek(&mut self, limit: Option<Timestamp>) -> Result<Option<(Timestamp, Vec<Vec<u8>>)>> {
        self.initialized = true;
        self.steps = 0;
        self.current = vec![None; self.streams.len()];
        self.lookahead = vec![None; self.streams.len()];
        if self.streams.is_empty() {
            return Ok(None);
        }

        for slot in 0..self.streams.len() {
            match self.streams[slot].rewind()? {
                Some(header) => self.lookahead[slot] = Some(self.stream_sample(slot, header)),
                None => {
                    self.lookahead = vec![None; self.streams.len()];
                    return Ok(None);
                }
            }
        }

        let limit = match limit {
            Some(limit) => limit,
            // All lookaheads are set at this point.
            None => match self.lookahead.iter().flatten().map(|s| s.time).min() {
                Some(time) => time,
                None => return Ok(None),
            },
        };

        for slot in 0..self.streams.len() {
            while self.lookahead[slot].map(|s| s.time < limit).unwrap_or(false) {
                match self.streams[slot].advance()? {
                    Some(header) => {
                        self.lookahead[slot] = Some(self.stream_sample(slot, header))
                    }
                    None => {
                        self.lookahead = vec![None; self.streams.len()];
                        return Ok(None);
                    }
                }
            }
        }

        self.current = self.lookahead.clone();
        let Some(time) = self.time() else {
            return Ok(None);
        };
        let data = self.data(None)?;
        Ok(Some((time, data)))
    }

    pub fn rewind(&mut self) -> Result<Option<(Timestamp, Vec<Vec<u8>>)>> {
        self.seek(None)
    }

    pub fn first(&mut self) -> Result<Option<(Timestamp, Vec<Vec<u8>>)>> {
        self.seek(None)
    }

    /// Advance the stream with the minimum lookahead time (ties broken by
    /// declaration order); all other current samples are held unchanged.
    /// Returns the new merged time, or `None` once no lookahead remains.
    fn advance_min(&mut self) -> Result<Option<Timestamp>> {
        if !self.initialized && self.seek(None)?.is_none() {
            return Ok(None);
        }

        let mut pick: Option<(usize, StreamSample)> = None;
        for (slot, entry) in self.lookahead.iter().enumerate() {
            if let Some(sample) = entry {
                if pick.map(|(_, best)| sample.time < best.time).unwrap_or(true) {
                    pick = Some((slot, *sample));
                }
            }
        }
        let Some((slot, sample)) = pick else {
            return Ok(None);
        };

        self.current[slot] = Some(sample);
        self.lookahead[slot] = match self.streams[slot].advance()? {
            Some(header) => Some(self.stream_sample(slot, header)),
            None => None,
        };
        self.steps += 1;
        Ok(Some(sample.time))
    }

    /// Advance one merge step and return the new merged time together with
    /// the full payload vector.
    pub fn next(&mut self) -> Result<Option<(Timestamp, Vec<Vec<u8>>)>> {
        match self.advance_min()? {
            Some(time) => Ok(Some((time, self.data(None)?))),
            None => Ok(None),
        }
    }

    fn joint_header(&self, time: Timestamp) -> Option<JointHeader> {
        let headers: Vec<DataBlockHeader> = self
            .current
            .iter()
            .map(|slot| slot.map(|s| s.header))
            .collect::<Option<_>>()?;
        Some(JointHeader { time, headers })
    }

    /// Snapshot the current merged state for reproducible re-reads.
    pub fn data_header(&self) -> Option<JointHeader> {
        self.joint_header(self.time()?)
    }

    /// Per-stream payloads — from the live current slots, or from a stored
    /// [`JointHeader`] snapshot when one is given.  Empty before the first
    /// seek.
    pub fn data(&self, header: Option<&JointHeader>) -> Result<Vec<Vec<u8>>> {
        match header {
            Some(joint) => joint
                .headers
                .iter()
                .enumerate()
                .map(|(slot, h)| self.streams[slot].raw_data(h))
                .collect(),
            None => self
                .current
                .iter()
                .enumerate()
                .filter_map(|(slot, entry)| {
                    entry.map(|s| self.streams[slot].raw_data(&s.header))
                })
                .collect(),
        }
    }

    /// A fresh range/decimation view over the merged sequence.
    pub fn samples(&self) -> SampleEnumerator<Self> {
        SampleEnumerator::new(self.clone())
    }
}

/// Enumeration over the merged sequence.  Index bounds count merge steps
/// from the enumeration start; the time basis is the one the merge was
/// built with, so the filter's realtime flag has no further effect.
impl<R: Read + Seek> StreamCursor for JointStream<R> {
    type Header = JointHeader;
    type Output = (Timestamp, Vec<Vec<u8>>);

    fn start_at(&mut self, from: Option<Position>) -> Result<Option<JointHeader>> {
        let initial = match from {
            Some(Position::Time(t)) => self.seek(Some(t))?,
            _ => self.seek(None)?,
        };
        if initial.is_none() {
            return Ok(None);
        }
        if let Some(Position::Index(n)) = from {
            for _ in 0..n {
                if self.advance_min()?.is_none() {
                    return Ok(None);
                }
            }
        }
        Ok(self.data_header())
    }

    fn advance_header(&mut self) -> Result<Option<JointHeader>> {
        match self.advance_min()? {
            Some(time) => Ok(self.joint_header(time)),
            None => Ok(None),
        }
    }

    fn header_index(&self) -> u64 {
        self.steps
    }

    fn header_time(&self, header: &JointHeader, _realtime: bool) -> Timestamp {
        header.time
    }

    fn output(&self, header: &JointHeader) -> Result<Self::Output> {
        Ok((header.time, self.data(Some(header))?))
    }
}
