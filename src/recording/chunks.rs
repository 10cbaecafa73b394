use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::events::read_metadata;
use super::header::{ChunkHeader, HEADER_SIZE};
use super::io::ByteReader;
use super::{Input, RecordingReader};
use crate::error::{Error, Result};

/// Event type names starting with this prefix are emitted by async-profiler.
const PROFILER_PREFIX: &str = "profiler.";

/// A chunk header plus the names of the event types the chunk describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    /// The chunk's header.
    pub header: ChunkHeader,
    /// Names of all event types in the chunk's metadata.
    pub event_types: BTreeSet<String>,
}

/// Which recorder produced a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    /// The async-profiler sampling profiler.
    AsyncProfiler,
    /// The JVM's built-in flight recorder.
    Jdk,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::AsyncProfiler => f.write_str("sampling profiler"),
            EventSource::Jdk => f.write_str("built-in JVM recorder"),
        }
    }
}

/// Summary of a whole recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    /// Size of the (decompressed) recording.
    pub size_bytes: u64,
    /// Which recorder produced it.
    pub event_source: EventSource,
    /// Earliest chunk start, nanoseconds since the epoch.
    pub start_nanos: i64,
    /// Latest chunk end, nanoseconds since the epoch.
    pub end_nanos: i64,
}

impl RecordingInfo {
    /// Wall-clock start.
    pub fn start_time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.start_nanos)
    }

    /// Wall-clock end.
    pub fn end_time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.end_nanos)
    }

    /// Time spanned by the recording in nanoseconds.
    pub fn duration_nanos(&self) -> i64 {
        self.end_nanos - self.start_nanos
    }
}

/// Walks the chunk headers of an open recording, one seek per chunk.
fn walk<F>(reader: &mut RecordingReader, mut visit: F) -> Result<()>
where
    F: FnMut(&mut RecordingReader, ChunkHeader) -> Result<()>,
{
    let len = reader.len();
    let mut offset = 0;
    let mut buf = [0u8; HEADER_SIZE as usize];
    while offset < len {
        if len - offset < HEADER_SIZE {
            return Err(Error::format(
                offset,
                format!(
                    "truncated chunk: {} trailing bytes cannot hold a header",
                    len - offset
                ),
            ));
        }
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut buf)?;
        let header = ChunkHeader::parse(&buf, offset)?;
        if header.end() > len {
            return Err(Error::format(
                offset,
                format!(
                    "truncated chunk: declares {} bytes but only {} remain",
                    header.size,
                    len - offset
                ),
            ));
        }
        offset = header.end();
        visit(reader, header)?;
    }
    Ok(())
}

/// Calls `visit` with every chunk header of the recording, in file order.
pub fn iterate_headers<I, F>(input: I, mut visit: F) -> Result<()>
where
    I: Into<Input>,
    F: FnMut(ChunkHeader),
{
    let mut reader = input.into().open()?;
    walk(&mut reader, |_, header| {
        visit(header);
        Ok(())
    })
}

/// All chunk headers of the recording, in file order.
pub fn collect_headers<I: Into<Input>>(input: I) -> Result<Vec<ChunkHeader>> {
    read_headers(&mut input.into().open()?)
}

pub(crate) fn read_headers(reader: &mut RecordingReader) -> Result<Vec<ChunkHeader>> {
    let mut headers = Vec::new();
    walk(reader, |_, header| {
        headers.push(header);
        Ok(())
    })?;
    Ok(headers)
}

/// Reads only the metadata record of the chunk.
fn chunk_event_types(reader: &mut RecordingReader, header: &ChunkHeader) -> Result<BTreeSet<String>> {
    let start = header.offset + header.metadata_offset;
    let mut bytes = vec![0; (header.size - header.metadata_offset) as usize];
    reader.seek(SeekFrom::Start(start))?;
    reader.read_exact(&mut bytes)?;
    let mut r = ByteReader::new(
        &bytes,
        header.byte_order,
        header.compressed_integers(),
        start,
    );
    let metadata = read_metadata(&mut r, 0)?;
    Ok(metadata.event_types().map(|t| t.name.clone()).collect())
}

/// Calls `visit` with every chunk of the recording, including the event types it describes.
pub fn iterate_chunks<I, F>(input: I, mut visit: F) -> Result<()>
where
    I: Into<Input>,
    F: FnMut(ChunkInfo),
{
    let mut reader = input.into().open()?;
    walk(&mut reader, |reader, header| {
        let event_types = chunk_event_types(reader, &header)?;
        visit(ChunkInfo {
            header,
            event_types,
        });
        Ok(())
    })
}

/// All chunks of the recording, including the event types each describes.
pub fn collect_chunks<I: Into<Input>>(input: I) -> Result<Vec<ChunkInfo>> {
    let mut chunks = Vec::new();
    iterate_chunks(input, |c| chunks.push(c))?;
    Ok(chunks)
}

/// Size, producer and time span of a recording.
pub fn recording_info<I: Into<Input>>(input: I) -> Result<RecordingInfo> {
    let input = input.into();
    let mut reader = input.open()?;
    let mut info = RecordingInfo {
        size_bytes: reader.len(),
        event_source: EventSource::Jdk,
        start_nanos: 0,
        end_nanos: 0,
    };
    let mut seen = false;
    walk(&mut reader, |reader, header| {
        let types = chunk_event_types(reader, &header)?;
        if types.iter().any(|t| t.starts_with(PROFILER_PREFIX)) {
            info.event_source = EventSource::AsyncProfiler;
        }
        if seen {
            info.start_nanos = info.start_nanos.min(header.start_nanos);
            info.end_nanos = info.end_nanos.max(header.end_nanos());
        } else {
            info.start_nanos = header.start_nanos;
            info.end_nanos = header.end_nanos();
            seen = true;
        }
        Ok(())
    })?;
    if !seen {
        warn!("recording {} contains no chunks", input.describe());
    }
    Ok(info)
}

fn chunk_file_stem(input: &Input) -> String {
    let name = input
        .path()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or("recording");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.strip_suffix(".jfr").unwrap_or(name).to_owned()
}

/// Splits a recording into one standalone file per chunk, named `<stem>.<index>.jfr` with a
/// four-digit index, inside `out_dir`.
///
/// Either every chunk is written or none is: files written before a failure are removed again.
pub fn disassemble<I, P>(input: I, out_dir: P) -> Result<Vec<PathBuf>>
where
    I: Into<Input>,
    P: AsRef<Path>,
{
    let input = input.into();
    let out_dir = out_dir.as_ref();
    let mut reader = input.open()?;
    let headers = read_headers(&mut reader)?;

    fs::create_dir_all(out_dir)?;
    let stem = chunk_file_stem(&input);
    let mut written = Vec::with_capacity(headers.len());
    let result = (|| -> Result<()> {
        for (index, header) in headers.iter().enumerate() {
            let path = out_dir.join(format!("{}.{:04}.jfr", stem, index));
            let mut bytes = vec![0; header.size as usize];
            reader.seek(SeekFrom::Start(header.offset))?;
            reader.read_exact(&mut bytes)?;
            written.push(path.clone());
            fs::write(&path, &bytes)?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        for path in &written {
            match fs::remove_file(path) {
                Ok(()) => {}
                // the failing write may not have created its file
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => warn!("could not remove {}: {}", path.display(), cleanup),
            }
        }
        return Err(e);
    }
    info!(
        "disassembled {} into {} chunk files",
        input.describe(),
        written.len()
    );
    Ok(written)
}
