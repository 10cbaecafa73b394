//! Folding stack traces into frame trees, comparing trees, and laying them out as levels.
//!
//! The usual pipeline is
//!
//!  1. fold the events of one or more sessions into a [`FrameTree`] with
//!     [`from_sessions`] (or feed a [`FrameTreeBuilder`] by hand),
//!  2. optionally compare two trees with [`DiffTree::new`], and
//!  3. lay the result out with [`format_tree`] or [`format_diff`].
//!
//! ```
//! use jfr_flame::collect::{Session, WorkerPool};
//! use jfr_flame::flamegraph::{self, BuilderOptions, Options};
//! use jfr_flame::recording::writer::Frame;
//! use jfr_flame::recording::RecordingWriter;
//!
//! let mut w = RecordingWriter::new();
//! let mut chunk = w.chunk(0);
//! let main = chunk.thread("main");
//! let stack = chunk.stack_trace(&[Frame::jit("App", "main"), Frame::jit("App", "work")]);
//! chunk.execution_sample(10, main, stack);
//! chunk.finish();
//!
//! let pool = WorkerPool::new(1);
//! let sessions = vec![Session::from_input(w.into_bytes())];
//! let tree = flamegraph::from_sessions(&pool, sessions, &BuilderOptions::default())?;
//! let graph = flamegraph::format_tree(&tree, &Options::default())?;
//! assert_eq!(graph.depth, 3);
//! # Ok::<(), jfr_flame::Error>(())
//! ```

mod builder;
pub mod color;
mod diff;
mod format;
mod frame;

pub use self::builder::{
    BuilderOptions, EventShape, FlamegraphProcessor, FrameTreeBuilder, FrameTreeCollector,
    TopFrame, DEFAULT_EVENT_TYPE,
};
pub use self::diff::{DiffId, DiffKind, DiffNode, DiffTree, DIFF_ROOT_NAME};
pub use self::format::{
    format_diff, format_tree, DiffDetails, DiffOptions, FlameGraph, FlameNode, Options,
    DEFAULT_MIN_SAMPLES_PERCENT, MAX_LEVEL,
};
pub use self::frame::{
    Frame, FrameId, FrameKey, FrameTree, FrameType, TypeCounters, ROOT_NAME, UNATTRIBUTED_NAME,
};

use crate::collect::{RecordingIterator, Session, TimeRange, WorkerPool};
use crate::error::Result;

/// Folds the events of `sessions` into a single frame tree.
pub fn from_sessions(
    pool: &WorkerPool,
    sessions: Vec<Session>,
    opt: &BuilderOptions,
) -> Result<FrameTree> {
    from_sessions_in(pool, sessions, TimeRange::All, opt)
}

/// Like [`from_sessions`], but only folds events that start within `range`.
pub fn from_sessions_in(
    pool: &WorkerPool,
    sessions: Vec<Session>,
    range: TimeRange,
    opt: &BuilderOptions,
) -> Result<FrameTree> {
    let collected = RecordingIterator::new(pool, sessions)?
        .time_range(range)?
        .collect_report(&FrameTreeCollector, || FlamegraphProcessor::new(opt))?;
    if collected.skipped != 0 {
        warn!("Ignored {} sessions that could not be read", collected.skipped);
    }
    if collected.output.root().total_samples == 0 {
        warn!("No stack samples found");
    }
    Ok(collected.output)
}
