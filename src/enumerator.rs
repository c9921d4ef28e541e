//! Range filtering and decimation over one stream.
//!
//! [`SampleFilter`] is a plain configuration struct; [`SampleEnumerator`]
//! consumes it as a lazy, finite, restartable iterator over the samples of
//! any [`StreamCursor`] — a single stream or a time-merged joint view.
//! Nothing is allocated up front; each step reads at most one block past the
//! last yielded sample.

use crate::block::{Position, Timestamp};
use crate::error::Result;

/// Index-step decimation advances its threshold once per emission; a forward
/// jump larger than the step does not fast-forward the threshold the way the
/// time path does.  Flip this to give the index path the same catch-up.
pub const INDEX_STEP_CATCHES_UP: bool = false;

/// What the enumerator needs from an underlying stream: positioned headers,
/// their time in the requested basis, and the materialized sample.
pub trait StreamCursor {
    type Header: Clone;
    type Output;

    /// Position at the lower bound (or the beginning) and return the first
    /// candidate header, `None` when nothing qualifies.
    fn start_at(&mut self, from: Option<Position>) -> Result<Option<Self::Header>>;
    /// Move strictly forward one sample.
    fn advance_header(&mut self) -> Result<Option<Self::Header>>;
    /// Index of the most recently returned header.
    fn header_index(&self) -> u64;
    fn header_time(&self, header: &Self::Header, realtime: bool) -> Timestamp;
    /// Materialize the sample behind a header.
    fn output(&self, header: &Self::Header) -> Result<Self::Output>;
}

/// All filter options; each is independent and optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFilter {
    /// Lower bound: samples before it are held, not yielded (time bound), or
    /// skipped exactly (index bound).
    pub from: Option<Position>,
    /// Upper bound; iteration stops permanently once exceeded.
    pub to: Option<Position>,
    /// Decimation cadence: a time interval or an index step.
    pub every: Option<Position>,
    pub max_count: Option<u64>,
    pub use_realtime: bool,
}

pub struct SampleEnumerator<C: StreamCursor> {
    stream: C,
    filter: SampleFilter,
    started: bool,
    done: bool,
    emitted: u64,
    threshold_time: Option<Timestamp>,
    threshold_index: Option<u64>,
    /// Last sample seen below a time lower bound, with its index; yielded
    /// once when the first qualifying sample arrives so callers can bracket
    /// the requested time from both sides.
    held: Option<(C::Header, u64)>,
    /// A sample read but not yet evaluated (after a seek, or after a held
    /// sample was flushed ahead of it).
    primed: Option<C::Header>,
}

impl<C: StreamCursor> SampleEnumerator<C> {
    pub fn new(stream: C) -> Self {
        Self::with_filter(stream, SampleFilter::default())
    }

    pub fn with_filter(stream: C, filter: SampleFilter) -> Self {
        SampleEnumerator {
            stream,
            filter,
            started: false,
            done: false,
            emitted: 0,
            threshold_time: None,
            threshold_index: None,
            held: None,
            primed: None,
        }
    }

    pub fn filter(&self) -> SampleFilter {
        self.filter
    }

    // ── Builders ─────────────────────────────────────────────────────────────

    pub fn from(mut self, pos: impl Into<Position>) -> Self {
        self.filter.from = Some(pos.into());
        self
    }

    pub fn to(mut self, pos: impl Into<Position>) -> Self {
        self.filter.to = Some(pos.into());
        self
    }

    pub fn between(self, from: impl Into<Position>, to: impl Into<Position>) -> Self {
        self.from(from).to(to)
    }

    /// Exactly the sample at or before `pos`.
    pub fn at(self, pos: impl Into<Position>) -> Self {
        self.from(pos).max(1)
    }

    pub fn every(mut self, interval: impl Into<Position>) -> Self {
        self.filter.every = Some(interval.into());
        self
    }

    pub fn max(mut self, count: u64) -> Self {
        self.filter.max_count = Some(count);
        self
    }

    pub fn realtime(mut self, use_realtime: bool) -> Self {
        self.filter.use_realtime = use_realtime;
        self
    }

    /// Reset iteration state; the next call starts over from the lower bound.
    pub fn restart(&mut self) {
        self.started = false;
        self.done = false;
        self.emitted = 0;
        self.threshold_time = None;
        self.threshold_index = None;
        self.held = None;
        self.primed = None;
    }

    // ── Iteration ────────────────────────────────────────────────────────────

    fn next_sample(&mut self) -> Result<Option<C::Output>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            match self.stream.start_at(self.filter.from)? {
                Some(header) => self.primed = Some(header),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }

        loop {
            if let Some(max) = self.filter.max_count {
                if self.emitted >= max {
                    self.done = true;
                    return Ok(None);
                }
            }

            let header = match self.primed.take() {
                Some(header) => header,
                None => match self.stream.advance_header()? {
                    Some(header) => header,
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                },
            };
            let index = self.stream.header_index();

            if let Some(Position::Index(min)) = self.filter.from {
                if index < min {
                    continue;
                }
            }
            if let Some(Position::Index(max)) = self.filter.to {
                if index > max {
                    self.done = true;
                    return Ok(None);
                }
            }

            let time = self.stream.header_time(&header, self.filter.use_realtime);

            if let Some(Position::Time(min)) = self.filter.from {
                if time < min {
                    self.held = Some((header, index));
                    continue;
                }
                if let Some((held, held_index)) = self.held.take() {
                    // Evaluate the qualifying sample on the next pass.
                    self.primed = Some(header);
                    let held_time = self.stream.header_time(&held, self.filter.use_realtime);
                    if self.should_emit(held_time, held_index) {
                        self.emitted += 1;
                        return Ok(Some(self.stream.output(&held)?));
                    }
                    continue;
                }
            }

            if let Some(Position::Time(max)) = self.filter.to {
                if time > max {
                    self.done = true;
                    return Ok(None);
                }
            }

            if self.should_emit(time, index) {
                self.emitted += 1;
                return Ok(Some(self.stream.output(&header)?));
            }
        }
    }

    /// Decimation decision for one in-range sample.
    fn should_emit(&mut self, time: Timestamp, index: u64) -> bool {
        match self.filter.every {
            Some(Position::Time(step)) => {
                if step.is_null() {
                    return true;
                }
                let mut emit = self.threshold_time.is_none();
                let mut threshold = self.threshold_time.unwrap_or(time);
                // Catch up past the emitted time so gaps don't cause a burst.
                while threshold <= time {
                    emit = true;
                    threshold = threshold.add(step);
                }
                self.threshold_time = Some(threshold);
                emit
            }
            Some(Position::Index(step)) => {
                if step == 0 {
                    return true;
                }
                let mut emit = self.threshold_index.is_none();
                let mut threshold = self.threshold_index.unwrap_or(index);
                if threshold <= index {
                    emit = true;
                    threshold += step;
                    while INDEX_STEP_CATCHES_UP && threshold <= index {
                        threshold += step;
                    }
                }
                self.threshold_index = Some(threshold);
                emit
            }
            None => true,
        }
    }
}

impl<C: StreamCursor> Iterator for SampleEnumerator<C> {
    type Item = Result<C::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_sample() {
            Ok(Some(sample)) => Some(Ok(sample)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
