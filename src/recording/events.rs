//! Decoding of a chunk's event stream: metadata, the constant pool chain, event records and
//! their stack traces.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use super::header::{ChunkHeader, HEADER_SIZE};
use super::io::ByteReader;
use super::metadata::{Metadata, TypeDesc, CONSTANT_POOL_RECORD, METADATA_RECORD};
use super::values::{read_value, ConstantPools, Value};
use crate::error::{Error, Result};
use crate::flamegraph::FrameType;

static NULL: Value = Value::Null;

/// Resolving references stops after this many hops.
const MAX_REF_HOPS: usize = 8;

/// One frame of a stack trace.
#[derive(Clone, Debug, PartialEq)]
pub struct StackFrame {
    /// `Class.method`, with package separators normalized to `.`.
    pub method: Rc<str>,
    /// Source line, if known.
    pub line: Option<u32>,
    /// Bytecode index, if known.
    pub bci: Option<u32>,
    /// How the frame was executing when sampled.
    pub frame_type: FrameType,
}

/// A resolved stack trace, leaf frame first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StackTrace {
    /// The recorder dropped frames beyond its depth limit.
    pub truncated: bool,
    /// Frames, leaf (innermost) first.
    pub frames: Vec<StackFrame>,
}

/// The decoded contents of a single chunk.
pub struct ChunkData {
    header: ChunkHeader,
    bytes: Vec<u8>,
    metadata: Metadata,
    pools: ConstantPools,
    methods: RefCell<AHashMap<i64, Rc<str>>>,
    stacks: RefCell<AHashMap<(u64, i64), Option<Rc<StackTrace>>>>,
}

impl ChunkData {
    /// Reads the chunk described by `header` from `reader` and decodes its metadata and constant
    /// pools.
    pub fn load<R: Read + Seek>(reader: &mut R, header: &ChunkHeader) -> Result<Self> {
        reader.seek(SeekFrom::Start(header.offset))?;
        let mut bytes = vec![0; header.size as usize];
        reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::format(header.offset, "chunk extends past the end of the recording")
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_bytes(header.clone(), bytes)
    }

    pub(crate) fn from_bytes(header: ChunkHeader, bytes: Vec<u8>) -> Result<Self> {
        let (metadata, pools) = {
            let mut reader = ByteReader::new(
                &bytes,
                header.byte_order,
                header.compressed_integers(),
                header.offset,
            );
            let metadata = read_metadata(&mut reader, header.metadata_offset)?;
            let pools = ConstantPools::parse(&mut reader, &metadata, header.constant_pool_offset)?;
            (metadata, pools)
        };
        trace!(
            "chunk at {}: {} types, metadata at {}",
            header.offset,
            metadata.len(),
            header.metadata_offset
        );
        Ok(ChunkData {
            header,
            bytes,
            metadata,
            pools,
            methods: RefCell::default(),
            stacks: RefCell::default(),
        })
    }

    /// The chunk's header.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// The chunk's type table.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The chunk's merged constant pools.
    pub fn constant_pools(&self) -> &ConstantPools {
        &self.pools
    }

    /// Names of all event types the chunk describes.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.metadata.event_types().map(|t| t.name.as_str())
    }

    /// Ids of the described event types whose names satisfy `accept`.
    pub fn event_type_ids<F>(&self, mut accept: F) -> AHashSet<u64>
    where
        F: FnMut(&str) -> bool,
    {
        self.metadata
            .event_types()
            .filter(|t| accept(&t.name))
            .map(|t| t.id)
            .collect()
    }

    /// All events of the chunk, in record order.
    pub fn events(&self) -> Events<'_> {
        Events::new(self, None)
    }

    /// Events whose type id is in `types`; other records are skipped without being decoded.
    pub fn events_of<'c>(&'c self, types: &'c AHashSet<u64>) -> Events<'c> {
        Events::new(self, Some(types))
    }

    fn reader(&self) -> ByteReader<'_> {
        ByteReader::new(
            &self.bytes,
            self.header.byte_order,
            self.header.compressed_integers(),
            self.header.offset,
        )
    }

    /// Follows constant pool references until a concrete value is reached.
    ///
    /// Unknown keys resolve to [`Value::Null`].
    pub fn resolve<'a>(&'a self, mut value: &'a Value) -> &'a Value {
        for _ in 0..MAX_REF_HOPS {
            match *value {
                Value::Ref { type_id, key } => match self.pools.get(type_id, key) {
                    Some(v) => value = v,
                    None => return &NULL,
                },
                _ => return value,
            }
        }
        &NULL
    }

    /// The named field of an object value.
    pub fn field<'a>(&'a self, value: &'a Value, name: &str) -> Option<&'a Value> {
        match self.resolve(value) {
            Value::Object { type_id, fields } => {
                let index = self.metadata.get(*type_id)?.field_index(name)?;
                fields.get(index)
            }
            _ => None,
        }
    }

    /// The string a value denotes, looking through symbols and pooled strings.
    pub fn string<'a>(&'a self, value: &'a Value) -> Option<&'a str> {
        let resolved = self.resolve(value);
        match resolved {
            Value::String(s) => Some(s.as_str()),
            Value::Object { .. } => {
                self.field(resolved, "string")
                    .and_then(|s| match self.resolve(s) {
                        Value::String(s) => Some(s.as_str()),
                        _ => None,
                    })
            }
            _ => None,
        }
    }

    /// Name of a class value, with `/` normalized to `.`.
    pub fn class_name(&self, class: &Value) -> Option<String> {
        let name = self.field(class, "name")?;
        self.string(name).map(|s| s.replace('/', "."))
    }

    fn method_name(&self, method: &Value) -> Rc<str> {
        let key = match *method {
            Value::Ref { key, .. } => Some(key),
            _ => None,
        };
        if let Some(name) = key.and_then(|k| self.methods.borrow().get(&k).cloned()) {
            return name;
        }

        let class = self
            .field(method, "type")
            .and_then(|c| self.class_name(c))
            .unwrap_or_default();
        let name = self
            .field(method, "name")
            .and_then(|n| self.string(n))
            .unwrap_or("unknown");
        let full: Rc<str> = if class.is_empty() {
            Rc::from(name)
        } else {
            Rc::from(format!("{}.{}", class, name))
        };
        if let Some(k) = key {
            self.methods.borrow_mut().insert(k, Rc::clone(&full));
        }
        full
    }

    fn stack_frame(&self, frame: &Value) -> StackFrame {
        let number = |name: &str| {
            self.field(frame, name)
                .and_then(|v| self.resolve(v).as_long())
                .filter(|&n| n >= 0)
                .map(|n| n as u32)
        };
        let frame_type = self
            .field(frame, "type")
            .and_then(|t| self.field(t, "description"))
            .and_then(|d| self.string(d))
            .map_or(FrameType::JitCompiled, FrameType::from_description);
        StackFrame {
            method: self
                .field(frame, "method")
                .map_or_else(|| Rc::from("unknown"), |m| self.method_name(m)),
            line: number("lineNumber"),
            bci: number("bytecodeIndex"),
            frame_type,
        }
    }

    /// Resolves (and caches) the stack trace a `stackTrace` field refers to.
    pub fn stack_trace(&self, field: &Value) -> Option<Rc<StackTrace>> {
        let cache_key = match *field {
            Value::Ref { type_id, key } => Some((type_id, key)),
            _ => None,
        };
        if let Some(k) = cache_key {
            if let Some(cached) = self.stacks.borrow().get(&k) {
                return cached.clone();
            }
        }

        let trace = match self.resolve(field) {
            Value::Null => None,
            trace => {
                let truncated = self
                    .field(trace, "truncated")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let frames = match self.field(trace, "frames").map(|f| self.resolve(f)) {
                    Some(Value::Array(frames)) => {
                        frames.iter().map(|f| self.stack_frame(f)).collect()
                    }
                    _ => Vec::new(),
                };
                Some(Rc::new(StackTrace { truncated, frames }))
            }
        };
        if let Some(k) = cache_key {
            self.stacks.borrow_mut().insert(k, trace.clone());
        }
        trace
    }
}

pub(crate) fn read_metadata(reader: &mut ByteReader<'_>, offset: u64) -> Result<Metadata> {
    reader.seek(offset as usize)?;
    let size = reader.int()?;
    let record_type = reader.long()? as u64;
    if record_type != METADATA_RECORD || size <= 0 {
        return Err(Error::format(
            reader.absolute(),
            format!("expected metadata record, found type {}", record_type),
        ));
    }
    Metadata::parse(reader)
}

/// Iterator over the events of a chunk.
pub struct Events<'c> {
    chunk: &'c ChunkData,
    reader: ByteReader<'c>,
    types: Option<&'c AHashSet<u64>>,
    done: bool,
}

impl<'c> Events<'c> {
    fn new(chunk: &'c ChunkData, types: Option<&'c AHashSet<u64>>) -> Self {
        let mut reader = chunk.reader();
        let done = reader.seek(HEADER_SIZE as usize).is_err();
        Events {
            chunk,
            reader,
            types,
            done,
        }
    }

    fn next_event(&mut self) -> Result<Option<Event<'c>>> {
        let end = self.chunk.bytes.len();
        loop {
            let start = self.reader.position();
            if start >= end {
                return Ok(None);
            }
            let size = self.reader.int()?;
            if size <= 0 || start + size as usize > end {
                return Err(Error::format(
                    self.chunk.header.offset + start as u64,
                    format!("record size {} does not fit in chunk", size),
                ));
            }
            let next = start + size as usize;
            let type_id = self.reader.long()? as u64;
            let wanted = type_id != METADATA_RECORD
                && type_id != CONSTANT_POOL_RECORD
                && self.types.map_or(true, |t| t.contains(&type_id));
            if !wanted {
                self.reader.seek(next)?;
                continue;
            }

            let desc = self.chunk.metadata.get(type_id).ok_or_else(|| {
                Error::format(
                    self.chunk.header.offset + start as u64,
                    format!("event of undescribed type {}", type_id),
                )
            })?;
            let fields = match read_value(&mut self.reader, &self.chunk.metadata, type_id, 0)? {
                Value::Object { fields, .. } => fields,
                other => vec![other],
            };
            if self.reader.position() > next {
                return Err(Error::format(
                    self.chunk.header.offset + start as u64,
                    format!("{} event overruns its record", desc.name),
                ));
            }
            self.reader.seek(next)?;
            return Ok(Some(Event {
                chunk: self.chunk,
                desc,
                fields,
            }));
        }
    }
}

impl<'c> Iterator for Events<'c> {
    type Item = Result<Event<'c>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// A decoded event.
pub struct Event<'c> {
    chunk: &'c ChunkData,
    desc: &'c TypeDesc,
    fields: Vec<Value>,
}

impl<'c> Event<'c> {
    /// The chunk the event belongs to.
    pub fn chunk(&self) -> &'c ChunkData {
        self.chunk
    }

    /// Fully qualified event type name, e.g. `jdk.ExecutionSample`.
    pub fn type_name(&self) -> &'c str {
        &self.desc.name
    }

    /// Raw value of the named field.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.desc
            .field_index(name)
            .and_then(|i| self.fields.get(i))
    }

    /// The named field as an integer.
    pub fn long(&self, name: &str) -> Option<i64> {
        self.value(name)
            .and_then(|v| self.chunk.resolve(v).as_long())
    }

    /// The named field as a string.
    pub fn string(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(|v| self.chunk.string(v))
    }

    /// Tick counter value at which the event started.
    pub fn start_ticks(&self) -> i64 {
        self.long("startTime")
            .or_else(|| self.fields.first().and_then(|v| v.as_long()))
            .unwrap_or(self.chunk.header.start_ticks)
    }

    /// Start of the event, nanoseconds since the epoch.
    pub fn start_nanos(&self) -> i64 {
        self.chunk.header.ticks_to_nanos(self.start_ticks())
    }

    /// Duration of the event in nanoseconds; 0 for instant events.
    pub fn duration_nanos(&self) -> i64 {
        self.long("duration")
            .map_or(0, |d| self.chunk.header.ticks_to_duration_nanos(d))
    }

    /// Name of the class the named field refers to.
    pub fn class_name(&self, field: &str) -> Option<String> {
        self.value(field).and_then(|v| self.chunk.class_name(v))
    }

    /// Java name of the sampled (or emitting) thread, falling back to its OS name.
    pub fn thread_name(&self) -> Option<&str> {
        let thread = self
            .value("sampledThread")
            .or_else(|| self.value("eventThread"))?;
        let named = |field: &str| {
            self.chunk
                .field(thread, field)
                .and_then(|v| self.chunk.string(v))
                .filter(|s| !s.is_empty())
        };
        named("javaName").or_else(|| named("osName"))
    }

    /// Whether the event type has a stack trace field.
    pub fn has_stack_trace(&self) -> bool {
        self.desc.field_index("stackTrace").is_some()
    }

    /// The event's stack trace, if it recorded one.
    pub fn stack_trace(&self) -> Result<Option<Rc<StackTrace>>> {
        Ok(self
            .value("stackTrace")
            .and_then(|v| self.chunk.stack_trace(v)))
    }
}
