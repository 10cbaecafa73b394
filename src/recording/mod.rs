//! Reading recordings: chunk headers, per-chunk metadata and the full event stream.
//!
//! A recording is a sequence of self-contained chunks, each starting with a [`ChunkHeader`].
//! Recordings may be gzip-compressed as a whole; this is detected from the leading magic bytes
//! whenever an [`Input`] is opened, never from the file name.

mod chunks;
mod events;
mod header;
pub(crate) mod io;
mod metadata;
mod values;
pub mod writer;

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

pub use self::chunks::{
    collect_chunks, collect_headers, disassemble, iterate_chunks, iterate_headers,
    recording_info, ChunkInfo, EventSource, RecordingInfo,
};
pub(crate) use self::chunks::read_headers;
pub use self::events::{ChunkData, Event, Events, StackFrame, StackTrace};
pub use self::header::{ChunkHeader, FEATURE_COMPRESSED_INTS, HEADER_SIZE};
pub use self::metadata::{FieldDesc, Metadata, TypeDesc, EVENT_SUPER_TYPE};
pub use self::values::{ConstantPools, Value};
pub use self::writer::RecordingWriter;

use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Byte order of a chunk, selected by the flag byte following the magic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    /// Most significant byte first.
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

/// Where a recording comes from.
#[derive(Clone, Debug)]
pub enum Input {
    /// A recording on disk.
    File(PathBuf),
    /// A recording already in memory.
    Bytes(Arc<[u8]>),
}

impl From<&Path> for Input {
    fn from(path: &Path) -> Self {
        Input::File(path.to_path_buf())
    }
}

impl From<PathBuf> for Input {
    fn from(path: PathBuf) -> Self {
        Input::File(path)
    }
}

impl From<&PathBuf> for Input {
    fn from(path: &PathBuf) -> Self {
        Input::File(path.clone())
    }
}

impl From<Vec<u8>> for Input {
    fn from(bytes: Vec<u8>) -> Self {
        Input::Bytes(bytes.into())
    }
}

impl From<Arc<[u8]>> for Input {
    fn from(bytes: Arc<[u8]>) -> Self {
        Input::Bytes(bytes)
    }
}

impl From<&Input> for Input {
    fn from(input: &Input) -> Self {
        input.clone()
    }
}

impl Input {
    /// Opens the recording for reading, transparently decompressing gzip.
    pub fn open(&self) -> Result<RecordingReader> {
        match self {
            Input::File(path) => {
                let mut file = File::open(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::NotFound(path.clone())
                    } else {
                        Error::Io(e)
                    }
                })?;
                let mut magic = [0u8; 2];
                let n = read_up_to(&mut file, &mut magic)?;
                file.seek(SeekFrom::Start(0))?;
                if n == magic.len() && magic == GZIP_MAGIC {
                    debug!("{} is gzip-compressed", path.display());
                    RecordingReader::memory(gunzip(file)?)
                } else {
                    let len = file.metadata()?.len();
                    Ok(RecordingReader {
                        source: Source::File(BufReader::new(file)),
                        len,
                    })
                }
            }
            Input::Bytes(bytes) => {
                if bytes.starts_with(&GZIP_MAGIC) {
                    RecordingReader::memory(gunzip(&bytes[..])?)
                } else {
                    RecordingReader::memory(Arc::clone(bytes))
                }
            }
        }
    }

    /// The recording's path, if it lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Input::File(path) => Some(path),
            Input::Bytes(_) => None,
        }
    }

    /// A short human-readable name for log messages.
    pub fn describe(&self) -> String {
        match self {
            Input::File(path) => path.display().to_string(),
            Input::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn gunzip<R: Read>(reader: R) -> Result<Arc<[u8]>> {
    let corrupt = |e: std::io::Error| Error::format(0, format!("corrupt gzip stream: {}", e));
    let mut decoder = libflate::gzip::Decoder::new(reader).map_err(corrupt)?;
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes).map_err(corrupt)?;
    Ok(bytes.into())
}

enum Source {
    File(BufReader<File>),
    Memory(Cursor<Arc<[u8]>>),
}

/// A seekable byte stream over a (decompressed) recording.
pub struct RecordingReader {
    source: Source,
    len: u64,
}

impl RecordingReader {
    fn memory(bytes: Arc<[u8]>) -> Result<Self> {
        Ok(RecordingReader {
            len: bytes.len() as u64,
            source: Source::Memory(Cursor::new(bytes)),
        })
    }

    /// Length of the decompressed recording in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the recording holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for RecordingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.source {
            Source::File(f) => f.read(buf),
            Source::Memory(c) => c.read(buf),
        }
    }
}

impl Seek for RecordingReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match &mut self.source {
            Source::File(f) => f.seek(pos),
            Source::Memory(c) => c.seek(pos),
        }
    }
}
