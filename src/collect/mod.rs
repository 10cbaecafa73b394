//! Folding the events of one or more recordings into a single result.
//!
//! An [`EventProcessor`] consumes the events of one session and yields a partial result. A
//! [`Collector`] says how partial results start out, combine and finish. The
//! [`RecordingIterator`] ties both together: it runs a fresh processor per session, on the calling
//! thread for a single session and on a [`WorkerPool`] otherwise, and folds the partial results
//! in session order.

mod pool;
pub mod summary;
pub mod timeseries;

pub use self::pool::{WorkerPool, DEFAULT_NTHREADS};
pub use self::summary::{EventSummary, SummaryCollector, SummaryProcessor, TypeSummary};
pub use self::timeseries::{
    Timeseries, TimeseriesCollector, TimeseriesProcessor, MAX_DENSE_SECONDS,
};

use crate::error::{Error, Result};
use crate::recording::{read_headers, ChunkData, ChunkHeader, Event, Input};

/// How partial results start out, combine and finish.
///
/// `combine` must be associative: partial results are always folded in session order, but
/// grouping is up to the caller.
pub trait Collector {
    /// The result of one session.
    type Partial: Send;
    /// The finished result.
    type Output;

    /// The identity of [`combine`](Collector::combine).
    fn empty(&self) -> Self::Partial;

    /// Merges two partial results, `left` coming before `right`.
    fn combine(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial;

    /// Turns the combined partial results into the output.
    fn finish(&self, partial: Self::Partial) -> Self::Output;
}

/// Consumes the events of one session.
pub trait EventProcessor {
    /// What the processor yields once every event has been seen.
    type Partial;

    /// Whether events of the named type should be decoded and handed to
    /// [`on_event`](EventProcessor::on_event). Everything is accepted by default.
    fn accepts(&self, event_type: &str) -> bool {
        let _ = event_type;
        true
    }

    /// Folds one event.
    fn on_event(&mut self, event: &Event<'_>) -> Result<()>;

    /// The partial result.
    fn get(self) -> Self::Partial;
}

/// One recording of a session, or a single chunk of it.
#[derive(Clone, Debug)]
pub struct Source {
    /// The recording.
    pub input: Input,
    /// Restrict the source to this chunk of the recording.
    pub chunk: Option<ChunkHeader>,
}

/// One continuous profiling run, made of one or more recordings.
#[derive(Clone, Debug)]
pub struct Session {
    /// Identifies the session in warnings.
    pub id: String,
    /// Recordings of the session, in time order.
    pub sources: Vec<Source>,
    /// Epoch nanoseconds that relative time ranges count from.
    ///
    /// The start of the session's first chunk when unset.
    pub origin: Option<i64>,
}

impl Session {
    /// A session made of the given recordings.
    pub fn new<S, I, J>(id: S, inputs: J) -> Self
    where
        S: Into<String>,
        I: Into<Input>,
        J: IntoIterator<Item = I>,
    {
        Session {
            id: id.into(),
            sources: inputs
                .into_iter()
                .map(|i| Source {
                    input: i.into(),
                    chunk: None,
                })
                .collect(),
            origin: None,
        }
    }

    /// A session made of a single recording, named after it.
    pub fn from_input<I: Into<Input>>(input: I) -> Self {
        let input = input.into();
        Session::new(input.describe(), Some(input))
    }

    /// Splits a recording into one session per chunk so that its chunks can be processed in
    /// parallel. Every session keeps the recording's start as its time origin.
    pub fn per_chunk<I: Into<Input>>(input: I) -> Result<Vec<Session>> {
        let input = input.into();
        let headers = read_headers(&mut input.open()?)?;
        let origin = headers.iter().map(|h| h.start_nanos).min();
        let name = input.describe();
        Ok(headers
            .into_iter()
            .enumerate()
            .map(|(i, header)| Session {
                id: format!("{}#{}", name, i),
                sources: vec![Source {
                    input: input.clone(),
                    chunk: Some(header),
                }],
                origin,
            })
            .collect())
    }
}

/// Which events of a session are folded, by start time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeRange {
    /// Every event.
    All,
    /// Events starting within `[start, end]`, in nanoseconds since the epoch.
    Absolute {
        /// Inclusive lower bound.
        start: i64,
        /// Inclusive upper bound.
        end: i64,
    },
    /// Events starting within `[start, end]` nanoseconds after the session's origin.
    Relative {
        /// Inclusive lower bound.
        start: i64,
        /// Inclusive upper bound.
        end: i64,
    },
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::All
    }
}

impl TimeRange {
    fn validate(&self) -> Result<()> {
        match *self {
            TimeRange::Absolute { start, end } | TimeRange::Relative { start, end }
                if end < start =>
            {
                Err(Error::InvalidArgument(format!(
                    "time range ends ({}) before it starts ({})",
                    end, start
                )))
            }
            _ => Ok(()),
        }
    }

    /// Absolute bounds, given the session's origin.
    fn bounds(&self, origin: i64) -> Option<(i64, i64)> {
        match *self {
            TimeRange::All => None,
            TimeRange::Absolute { start, end } => Some((start, end)),
            TimeRange::Relative { start, end } => Some((
                origin.saturating_add(start),
                origin.saturating_add(end),
            )),
        }
    }
}

/// How a [`RecordingIterator`] runs its sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// One session, folded on the calling thread.
    Single,
    /// Several sessions, one task each on the worker pool.
    Parallel,
}

/// A collected output together with the number of sessions that were skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct Collected<T> {
    /// The finished result.
    pub output: T,
    /// Sessions whose recordings were missing or malformed.
    pub skipped: usize,
}

/// Runs event processors over sessions and collects their results.
#[derive(Debug)]
pub struct RecordingIterator<'p> {
    pool: &'p WorkerPool,
    sessions: Vec<Session>,
    range: TimeRange,
}

impl<'p> RecordingIterator<'p> {
    /// Iterates over `sessions` using `pool` when there is more than one.
    ///
    /// At least one session is required.
    pub fn new(pool: &'p WorkerPool, sessions: Vec<Session>) -> Result<Self> {
        if sessions.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one session is required".into(),
            ));
        }
        Ok(RecordingIterator {
            pool,
            sessions,
            range: TimeRange::All,
        })
    }

    /// Only fold events within `range`.
    pub fn time_range(mut self, range: TimeRange) -> Result<Self> {
        range.validate()?;
        self.range = range;
        Ok(self)
    }

    /// The sessions, in fold order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Whether sessions run on the calling thread or on the pool.
    pub fn mode(&self) -> Mode {
        if self.sessions.len() == 1 {
            Mode::Single
        } else {
            Mode::Parallel
        }
    }

    /// Runs a processor from `factory` over every session and collects the results.
    pub fn collect<C, P, F>(&self, collector: &C, factory: F) -> Result<C::Output>
    where
        C: Collector,
        P: EventProcessor<Partial = C::Partial>,
        F: Fn() -> P + Sync,
    {
        self.collect_report(collector, factory).map(|c| c.output)
    }

    /// Like [`collect`](RecordingIterator::collect), but also reports how many sessions were
    /// skipped because their recordings were missing or malformed.
    pub fn collect_report<C, P, F>(&self, collector: &C, factory: F) -> Result<Collected<C::Output>>
    where
        C: Collector,
        P: EventProcessor<Partial = C::Partial>,
        F: Fn() -> P + Sync,
    {
        let range = self.range;
        let run = |session: &Session| -> Result<C::Partial> {
            let mut processor = factory();
            process_session(session, range, &mut processor)?;
            Ok(processor.get())
        };

        if self.mode() == Mode::Single {
            let partial = run(&self.sessions[0])?;
            let partial = collector.combine(collector.empty(), partial);
            return Ok(Collected {
                output: collector.finish(partial),
                skipped: 0,
            });
        }

        debug!(
            "collecting {} sessions on {} threads",
            self.sessions.len(),
            self.pool.nthreads()
        );
        let results = self.pool.execute(self.sessions.iter().collect(), run)?;

        let mut acc = collector.empty();
        let mut skipped = 0;
        let mut failure = None;
        for (session, result) in self.sessions.iter().zip(results) {
            match result {
                Ok(partial) => acc = collector.combine(acc, partial),
                Err(e) if e.is_session_local() => {
                    warn!("skipping session {}: {}", session.id, e);
                    skipped += 1;
                }
                Err(e) => {
                    error!("session {} failed: {}", session.id, e);
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(Collected {
            output: collector.finish(acc),
            skipped,
        })
    }
}

fn process_session<P: EventProcessor>(
    session: &Session,
    range: TimeRange,
    processor: &mut P,
) -> Result<()> {
    let mut origin = session.origin;
    for source in &session.sources {
        let mut reader = source.input.open()?;
        let headers = match &source.chunk {
            Some(header) => vec![header.clone()],
            None => read_headers(&mut reader)?,
        };

        for header in headers {
            let origin = *origin.get_or_insert(header.start_nanos);
            let bounds = range.bounds(origin);
            if let Some((start, end)) = bounds {
                if header.end_nanos() < start || header.start_nanos > end {
                    trace!("skipping chunk at {} outside the time range", header.offset);
                    continue;
                }
            }

            let chunk = ChunkData::load(&mut reader, &header)?;
            let types = chunk.event_type_ids(|name| processor.accepts(name));
            if types.is_empty() {
                continue;
            }
            for event in chunk.events_of(&types) {
                let event = event?;
                if let Some((start, end)) = bounds {
                    let t = event.start_nanos();
                    if t < start || t > end {
                        continue;
                    }
                }
                processor.on_event(&event)?;
            }
        }
    }
    Ok(())
}
