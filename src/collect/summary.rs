//! Event counts and weights per event type.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Collector, EventProcessor};
use crate::error::Result;
use crate::flamegraph::EventShape;
use crate::recording::Event;

/// Totals for one event type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    /// Number of events.
    pub count: u64,
    /// Summed weight, as the flame graph builder would weigh the events.
    pub weight: u64,
}

/// Totals per event type name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EventSummary {
    /// Totals keyed by event type name.
    pub types: BTreeMap<String, TypeSummary>,
}

impl EventSummary {
    /// Totals for the named event type, if any were seen.
    pub fn get(&self, event_type: &str) -> Option<&TypeSummary> {
        self.types.get(event_type)
    }

    /// Number of events across all types.
    pub fn total_count(&self) -> u64 {
        self.types.values().map(|t| t.count).sum()
    }

    fn merge(&mut self, other: EventSummary) {
        for (name, t) in other.types {
            let entry = self.types.entry(name).or_default();
            entry.count += t.count;
            entry.weight += t.weight;
        }
    }
}

/// Counts every event of a session.
#[derive(Debug, Default)]
pub struct SummaryProcessor {
    summary: EventSummary,
}

impl EventProcessor for SummaryProcessor {
    type Partial = EventSummary;

    fn on_event(&mut self, event: &Event<'_>) -> Result<()> {
        let weight = EventShape::of(event).weight(event);
        let entry = self
            .summary
            .types
            .entry(event.type_name().to_owned())
            .or_default();
        entry.count += 1;
        entry.weight += weight;
        Ok(())
    }

    fn get(self) -> EventSummary {
        self.summary
    }
}

/// Adds up per-session summaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct SummaryCollector;

impl Collector for SummaryCollector {
    type Partial = EventSummary;
    type Output = EventSummary;

    fn empty(&self) -> EventSummary {
        EventSummary::default()
    }

    fn combine(&self, mut left: EventSummary, right: EventSummary) -> EventSummary {
        left.merge(right);
        left
    }

    fn finish(&self, summary: EventSummary) -> EventSummary {
        summary
    }
}
