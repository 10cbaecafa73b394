use std::io::{self, Write};
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use is_terminal::IsTerminal;
use serde::Serialize;

use jfr_flame::collect::{
    RecordingIterator, Session, SummaryCollector, SummaryProcessor, TimeRange,
    TimeseriesCollector, TimeseriesProcessor, WorkerPool, DEFAULT_NTHREADS,
};
use jfr_flame::flamegraph::{
    self, BuilderOptions, DiffOptions, DiffTree, Options, DEFAULT_EVENT_TYPE,
};
use jfr_flame::recording;

#[derive(Debug, Parser)]
#[command(
    name = "jfr-flame",
    about = "Inspect JFR recordings and fold them into flame graphs (JSON on stdout)"
)]
struct Opt {
    /// Silence all log output
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the header of every chunk
    Headers {
        /// Recording file
        #[arg(value_name = "PATH")]
        infile: PathBuf,
    },

    /// Print every chunk header along with the event types the chunk describes
    Chunks {
        /// Recording file
        #[arg(value_name = "PATH")]
        infile: PathBuf,
    },

    /// Print size, producer and time span of a recording
    Info {
        /// Recording file
        #[arg(value_name = "PATH")]
        infile: PathBuf,
    },

    /// Split a recording into one standalone file per chunk
    Disassemble {
        /// Recording file
        #[arg(value_name = "PATH")]
        infile: PathBuf,

        /// Directory to write the chunk files to
        #[arg(short = 'o', long = "out", value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },

    /// Fold recordings into a flame graph; every file is one session
    Flamegraph {
        #[command(flatten)]
        fold: FoldOpt,

        /// Omit subtrees narrower than this percentage of the root
        #[arg(long = "min-width", value_name = "PERCENT", default_value = "0.1")]
        min_width: f64,

        /// Recording files
        #[arg(value_name = "PATH", required = true)]
        infiles: Vec<PathBuf>,
    },

    /// Compare two recordings as a differential flame graph
    Diff {
        #[command(flatten)]
        fold: FoldOpt,

        /// Omit subtrees narrower than this percentage of the root
        #[arg(long = "min-width", value_name = "PERCENT", default_value = "0.1")]
        min_width: f64,

        /// Scale the baseline to the comparison's sample count before comparing
        #[arg(short = 'n', long = "normalize")]
        normalize: bool,

        /// Baseline recording
        #[arg(value_name = "BEFORE")]
        baseline: PathBuf,

        /// Comparison recording
        #[arg(value_name = "AFTER")]
        comparison: PathBuf,
    },

    /// Count events and their weight per event type
    Summary {
        #[command(flatten)]
        sessions: SessionOpt,

        /// Recording files
        #[arg(value_name = "PATH", required = true)]
        infiles: Vec<PathBuf>,
    },

    /// Count events per second of wall-clock time
    Timeseries {
        #[command(flatten)]
        sessions: SessionOpt,

        /// Event types to count
        #[arg(short = 'e', long = "event", value_name = "TYPE", default_value = DEFAULT_EVENT_TYPE)]
        events: Vec<String>,

        /// Recording files
        #[arg(value_name = "PATH", required = true)]
        infiles: Vec<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct SessionOpt {
    /// Number of threads to use [default: number of logical cores on your machine]
    #[arg(long = "nthreads", value_name = "UINT")]
    nthreads: Option<usize>,

    /// Process the chunks of a single recording in parallel
    #[arg(long = "per-chunk")]
    per_chunk: bool,

    /// Only include events starting this many milliseconds after the recording start
    #[arg(long = "from", value_name = "MS")]
    from: Option<i64>,

    /// Only include events starting at most this many milliseconds after the recording start
    #[arg(long = "to", value_name = "MS")]
    to: Option<i64>,
}

impl SessionOpt {
    fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.nthreads.unwrap_or(*DEFAULT_NTHREADS))
    }

    fn range(&self) -> TimeRange {
        if self.from.is_none() && self.to.is_none() {
            return TimeRange::All;
        }
        let ms = |v: i64| v.saturating_mul(1_000_000);
        TimeRange::Relative {
            start: self.from.map_or(0, ms),
            end: self.to.map_or(i64::MAX, ms),
        }
    }

    fn sessions(&self, infiles: Vec<PathBuf>) -> jfr_flame::Result<Vec<Session>> {
        if self.per_chunk && infiles.len() == 1 {
            return Session::per_chunk(&infiles[0]);
        }
        Ok(infiles.into_iter().map(Session::from_input).collect())
    }

    fn iterator<'p>(
        &self,
        pool: &'p WorkerPool,
        infiles: Vec<PathBuf>,
    ) -> jfr_flame::Result<RecordingIterator<'p>> {
        RecordingIterator::new(pool, self.sessions(infiles)?)?.time_range(self.range())
    }
}

#[derive(Debug, Args)]
struct FoldOpt {
    #[command(flatten)]
    sessions: SessionOpt,

    /// Put a frame naming the thread at the bottom of every stack
    #[arg(short = 't', long = "threads")]
    threads: bool,

    /// Distinguish frames by source line
    #[arg(short = 'l', long = "lines")]
    lines: bool,

    /// Event types to fold
    #[arg(short = 'e', long = "event", value_name = "TYPE", default_value = DEFAULT_EVENT_TYPE)]
    events: Vec<String>,
}

impl FoldOpt {
    fn into_parts(self) -> (SessionOpt, BuilderOptions) {
        (
            self.sessions,
            BuilderOptions {
                threads: self.threads,
                lines: self.lines,
                event_types: self.events,
            },
        )
    }

    fn fold(
        sessions: &SessionOpt,
        options: &BuilderOptions,
        infiles: Vec<PathBuf>,
    ) -> jfr_flame::Result<flamegraph::FrameTree> {
        let pool = sessions.pool();
        flamegraph::from_sessions_in(&pool, sessions.sessions(infiles)?, sessions.range(), options)
    }
}

fn print<T: Serialize>(value: &T) -> jfr_flame::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if stdout.is_terminal() {
        serde_json::to_writer_pretty(&mut out, value).map_err(io::Error::from)?;
    } else {
        serde_json::to_writer(&mut out, value).map_err(io::Error::from)?;
    }
    writeln!(out)?;
    Ok(())
}

fn main() -> jfr_flame::Result<()> {
    let opt = Opt::parse();

    // Initialize logger
    if !opt.quiet {
        env_logger::Builder::from_env(Env::default().default_filter_or(match opt.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }))
        .format_timestamp(None)
        .init();
    }

    match opt.command {
        Command::Headers { infile } => print(&recording::collect_headers(infile)?),
        Command::Chunks { infile } => print(&recording::collect_chunks(infile)?),
        Command::Info { infile } => print(&recording::recording_info(infile)?),
        Command::Disassemble { infile, out } => print(&recording::disassemble(infile, out)?),
        Command::Flamegraph {
            fold,
            min_width,
            infiles,
        } => {
            let (sessions, options) = fold.into_parts();
            let tree = FoldOpt::fold(&sessions, &options, infiles)?;
            let graph = flamegraph::format_tree(
                &tree,
                &Options {
                    min_samples_percent: min_width,
                },
            )?;
            print(&graph)
        }
        Command::Diff {
            fold,
            min_width,
            normalize,
            baseline,
            comparison,
        } => {
            let (sessions, options) = fold.into_parts();
            let baseline = FoldOpt::fold(&sessions, &options, vec![baseline])?;
            let comparison = FoldOpt::fold(&sessions, &options, vec![comparison])?;
            let diff = DiffTree::new(&baseline, &comparison);
            let graph = flamegraph::format_diff(
                &diff,
                &DiffOptions {
                    min_samples_percent: min_width,
                    normalize,
                },
            )?;
            print(&graph)
        }
        Command::Summary { sessions, infiles } => {
            let pool = sessions.pool();
            let summary = sessions
                .iterator(&pool, infiles)?
                .collect(&SummaryCollector, SummaryProcessor::default)?;
            print(&summary)
        }
        Command::Timeseries {
            sessions,
            events,
            infiles,
        } => {
            let pool = sessions.pool();
            let series = sessions
                .iterator(&pool, infiles)?
                .collect(&TimeseriesCollector, || TimeseriesProcessor::new(events.clone()))?;
            match series.dense() {
                Ok(dense) => print(&dense),
                Err(e) => {
                    log::warn!("{}; printing non-empty seconds only", e);
                    print(&series.sparse())
                }
            }
        }
    }
}
