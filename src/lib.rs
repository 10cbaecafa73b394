//! jfr-flame turns JVM flight recordings into [flame graphs] and differential flame graphs.
//!
//! Like any flame graph toolkit it works in two stages: stacks are first folded into a tree, and
//! the tree is then laid out for plotting. Here, the input is not a folded stack file but the
//! binary, chunked recording format written by the JVM's built-in recorder and by sampling
//! profilers that emit the same format.
//!
//!  - [`recording`] reads recordings: chunk headers, the event types each chunk describes, and
//!    the decoded event stream. It can also split a recording into standalone chunk files, and
//!    synthesize recordings with [`recording::RecordingWriter`].
//!  - [`collect`] runs event processors over one or more sessions (continuous profiling runs),
//!    fanning out to a [`collect::WorkerPool`] when there is more than one, and folds their partial
//!    results deterministically.
//!  - [`flamegraph`] folds stack traces into frame trees, compares two trees, and lays either out
//!    as depth-indexed levels of positioned nodes.
//!
//! # Command-line use
//!
//! The `jfr-flame` binary prints JSON for each stage:
//!
//! ```console
//! $ jfr-flame headers app.jfr
//! $ jfr-flame info app.jfr
//! $ jfr-flame disassemble app.jfr --out chunks/
//! $ jfr-flame flamegraph app.jfr --threads > flame.json
//! $ jfr-flame diff before.jfr after.jfr --normalize > diff.json
//! ```
//!
//!   [flame graphs]: http://www.brendangregg.com/flamegraphs.html

#![warn(missing_docs)]

#[macro_use]
extern crate log;

mod error;

pub use error::{Error, Result};

/// Parsing, disassembling and synthesizing recordings.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod recording;

/// Running event processors over sessions and collecting their results.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod collect;

/// Tools for producing flame graphs from recorded stack traces.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod flamegraph;
