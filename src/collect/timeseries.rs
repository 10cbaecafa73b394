//! Samples per second of wall-clock time.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Collector, EventProcessor};
use crate::error::{Error, Result};
use crate::flamegraph::DEFAULT_EVENT_TYPE;
use crate::recording::Event;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Widest span, in seconds, that [`Timeseries::dense`] fills in.
pub const MAX_DENSE_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Event counts keyed by epoch second.
///
/// Buckets are keyed rather than appended so that partial series combine the same way in any
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Timeseries {
    /// Count per epoch second.
    pub buckets: BTreeMap<i64, u64>,
}

impl Timeseries {
    /// Adds `n` events to the bucket of `nanos`.
    pub fn add(&mut self, nanos: i64, n: u64) {
        *self
            .buckets
            .entry(nanos.div_euclid(NANOS_PER_SECOND))
            .or_insert(0) += n;
    }

    /// `(second, count)` pairs of the non-empty seconds.
    pub fn sparse(&self) -> Vec<(i64, u64)> {
        self.buckets.iter().map(|(&s, &n)| (s, n)).collect()
    }

    /// `(second, count)` pairs with every missing second between the first and last filled
    /// with zero.
    ///
    /// Fails with [`Error::InvalidArgument`] when the series spans more than
    /// [`MAX_DENSE_SECONDS`]; use [`Timeseries::sparse`] for such series.
    pub fn dense(&self) -> Result<Vec<(i64, u64)>> {
        let (first, last) = match (self.buckets.keys().next(), self.buckets.keys().next_back()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Ok(Vec::new()),
        };
        let span = last - first;
        if span > MAX_DENSE_SECONDS {
            return Err(Error::InvalidArgument(format!(
                "time series spans {} seconds, more than the {} a dense series may cover",
                span, MAX_DENSE_SECONDS
            )));
        }
        Ok((first..=last)
            .map(|s| (s, self.buckets.get(&s).copied().unwrap_or(0)))
            .collect())
    }
}

/// Buckets the events of the configured types by start time.
#[derive(Debug)]
pub struct TimeseriesProcessor {
    event_types: Vec<String>,
    series: Timeseries,
}

impl Default for TimeseriesProcessor {
    fn default() -> Self {
        TimeseriesProcessor::new(vec![DEFAULT_EVENT_TYPE.to_owned()])
    }
}

impl TimeseriesProcessor {
    /// A processor counting events of the named types.
    pub fn new(event_types: Vec<String>) -> Self {
        TimeseriesProcessor {
            event_types,
            series: Timeseries::default(),
        }
    }
}

impl EventProcessor for TimeseriesProcessor {
    type Partial = Timeseries;

    fn accepts(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    fn on_event(&mut self, event: &Event<'_>) -> Result<()> {
        self.series.add(event.start_nanos(), 1);
        Ok(())
    }

    fn get(self) -> Timeseries {
        self.series
    }
}

/// Adds up per-session series bucket by bucket.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeseriesCollector;

impl Collector for TimeseriesCollector {
    type Partial = Timeseries;
    type Output = Timeseries;

    fn empty(&self) -> Timeseries {
        Timeseries::default()
    }

    fn combine(&self, mut left: Timeseries, right: Timeseries) -> Timeseries {
        for (second, n) in right.buckets {
            *left.buckets.entry(second).or_insert(0) += n;
        }
        left
    }

    fn finish(&self, series: Timeseries) -> Timeseries {
        series
    }
}
