//! Synthesizes recordings.
//!
//! The writer emits the same layout the reader accepts: a header, the event records, two chained
//! constant pool records and a metadata record describing the well-known JDK types. Timestamps
//! are given in ticks at a frequency of one tick per nanosecond, relative to the chunk start.
//!
//! ```
//! use jfr_flame::recording::writer::{Frame, RecordingWriter};
//!
//! let mut recording = RecordingWriter::new();
//! let mut chunk = recording.chunk(1_600_000_000_000_000_000);
//! let main = chunk.thread("main");
//! let stack = chunk.stack_trace(&[
//!     Frame::interpreted("com/example/Main", "main"),
//!     Frame::jit("com/example/Main", "work"),
//! ]);
//! chunk.execution_sample(1_000, main, stack);
//! chunk.finish();
//! let bytes = recording.into_bytes();
//! assert_eq!(jfr_flame::recording::collect_headers(bytes).unwrap().len(), 1);
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use indexmap::IndexSet;

use super::header::{ChunkHeader, FEATURE_COMPRESSED_INTS, HEADER_SIZE};
use super::io::ByteWriter;
use super::metadata::{CONSTANT_POOL_RECORD, EVENT_SUPER_TYPE, METADATA_RECORD};
use super::ByteOrder;
use crate::error::Result;
use crate::flamegraph::FrameType;

const TICKS_PER_SECOND: i64 = 1_000_000_000;

const LONG: u64 = 2;
const INT: u64 = 3;
const BOOLEAN: u64 = 4;
const BYTE: u64 = 5;
const STRING: u64 = 6;
const FLOAT: u64 = 7;
const DOUBLE: u64 = 8;
const CHAR: u64 = 9;
const SHORT: u64 = 10;
const THREAD: u64 = 20;
const CLASS: u64 = 21;
const SYMBOL: u64 = 22;
const METHOD: u64 = 23;
const STACK_TRACE: u64 = 24;
const STACK_FRAME: u64 = 25;
const FRAME_TYPE: u64 = 26;
const LABEL: u64 = 27;

const ANNOTATION_SUPER_TYPE: &str = "java.lang.annotation.Annotation";

const EXECUTION_SAMPLE: u64 = 100;
const ALLOCATION_SAMPLE: u64 = 101;
const ALLOCATION_IN_NEW_TLAB: u64 = 102;
const ALLOCATION_OUTSIDE_TLAB: u64 = 103;
const MONITOR_ENTER: u64 = 104;
const THREAD_PARK: u64 = 105;
const NATIVE_METHOD_SAMPLE: u64 = 106;
const FIRST_CUSTOM_TYPE: u64 = 200;

/// Frame types a recorder can report, in the order of their pool keys.
const FRAME_TYPES: [FrameType; 7] = [
    FrameType::Interpreted,
    FrameType::JitCompiled,
    FrameType::Inlined,
    FrameType::Native,
    FrameType::C1Compiled,
    FrameType::Cpp,
    FrameType::Kernel,
];

/// (name, type id, constant pool, array)
type Field = (&'static str, u64, bool, bool);

const fn f(name: &'static str, type_id: u64) -> Field {
    (name, type_id, false, false)
}

const fn cp(name: &'static str, type_id: u64) -> Field {
    (name, type_id, true, false)
}

const THREAD_FIELDS: &[Field] = &[
    f("osName", STRING),
    f("osThreadId", LONG),
    f("javaName", STRING),
    f("javaThreadId", LONG),
];
const CLASS_FIELDS: &[Field] = &[cp("name", SYMBOL), f("modifiers", INT)];
const SYMBOL_FIELDS: &[Field] = &[f("string", STRING)];
const METHOD_FIELDS: &[Field] = &[
    cp("type", CLASS),
    cp("name", SYMBOL),
    cp("descriptor", SYMBOL),
    f("modifiers", INT),
    f("hidden", BOOLEAN),
];
const STACK_TRACE_FIELDS: &[Field] = &[
    f("truncated", BOOLEAN),
    ("frames", STACK_FRAME, false, true),
];
const STACK_FRAME_FIELDS: &[Field] = &[
    cp("method", METHOD),
    f("lineNumber", INT),
    f("bytecodeIndex", INT),
    cp("type", FRAME_TYPE),
];
const FRAME_TYPE_FIELDS: &[Field] = &[f("description", STRING)];
const LABEL_FIELDS: &[Field] = &[f("value", STRING)];

const SAMPLE_FIELDS: &[Field] = &[
    f("startTime", LONG),
    cp("sampledThread", THREAD),
    cp("stackTrace", STACK_TRACE),
];
const ALLOCATION_SAMPLE_FIELDS: &[Field] = &[
    f("startTime", LONG),
    cp("eventThread", THREAD),
    cp("stackTrace", STACK_TRACE),
    cp("objectClass", CLASS),
    f("weight", LONG),
];
const IN_NEW_TLAB_FIELDS: &[Field] = &[
    f("startTime", LONG),
    cp("eventThread", THREAD),
    cp("stackTrace", STACK_TRACE),
    cp("objectClass", CLASS),
    f("allocationSize", LONG),
    f("tlabSize", LONG),
];
const OUTSIDE_TLAB_FIELDS: &[Field] = &[
    f("startTime", LONG),
    cp("eventThread", THREAD),
    cp("stackTrace", STACK_TRACE),
    cp("objectClass", CLASS),
    f("allocationSize", LONG),
];
const MONITOR_ENTER_FIELDS: &[Field] = &[
    f("startTime", LONG),
    f("duration", LONG),
    cp("eventThread", THREAD),
    cp("stackTrace", STACK_TRACE),
    cp("monitorClass", CLASS),
    cp("previousOwner", THREAD),
    f("address", LONG),
];
const THREAD_PARK_FIELDS: &[Field] = &[
    f("startTime", LONG),
    f("duration", LONG),
    cp("eventThread", THREAD),
    cp("stackTrace", STACK_TRACE),
    cp("parkedClass", CLASS),
    f("timeout", LONG),
    f("address", LONG),
];
const CUSTOM_FIELDS: &[Field] = &[
    f("startTime", LONG),
    f("duration", LONG),
    cp("eventThread", THREAD),
    cp("stackTrace", STACK_TRACE),
];

const BUILTIN_TYPES: &[(u64, &str, Option<&str>, &[Field])] = &[
    (LONG, "long", None, &[]),
    (INT, "int", None, &[]),
    (BOOLEAN, "boolean", None, &[]),
    (BYTE, "byte", None, &[]),
    (STRING, "java.lang.String", None, &[]),
    (FLOAT, "float", None, &[]),
    (DOUBLE, "double", None, &[]),
    (CHAR, "char", None, &[]),
    (SHORT, "short", None, &[]),
    (THREAD, "java.lang.Thread", None, THREAD_FIELDS),
    (CLASS, "java.lang.Class", None, CLASS_FIELDS),
    (SYMBOL, "jdk.types.Symbol", None, SYMBOL_FIELDS),
    (METHOD, "jdk.types.Method", None, METHOD_FIELDS),
    (STACK_TRACE, "jdk.types.StackTrace", None, STACK_TRACE_FIELDS),
    (STACK_FRAME, "jdk.types.StackFrame", None, STACK_FRAME_FIELDS),
    (FRAME_TYPE, "jdk.types.FrameType", None, FRAME_TYPE_FIELDS),
    (LABEL, "jdk.jfr.Label", Some(ANNOTATION_SUPER_TYPE), LABEL_FIELDS),
    (EXECUTION_SAMPLE, "jdk.ExecutionSample", Some(EVENT_SUPER_TYPE), SAMPLE_FIELDS),
    (ALLOCATION_SAMPLE, "jdk.ObjectAllocationSample", Some(EVENT_SUPER_TYPE), ALLOCATION_SAMPLE_FIELDS),
    (ALLOCATION_IN_NEW_TLAB, "jdk.ObjectAllocationInNewTLAB", Some(EVENT_SUPER_TYPE), IN_NEW_TLAB_FIELDS),
    (ALLOCATION_OUTSIDE_TLAB, "jdk.ObjectAllocationOutsideTLAB", Some(EVENT_SUPER_TYPE), OUTSIDE_TLAB_FIELDS),
    (MONITOR_ENTER, "jdk.JavaMonitorEnter", Some(EVENT_SUPER_TYPE), MONITOR_ENTER_FIELDS),
    (THREAD_PARK, "jdk.ThreadPark", Some(EVENT_SUPER_TYPE), THREAD_PARK_FIELDS),
    (NATIVE_METHOD_SAMPLE, "jdk.NativeMethodSample", Some(EVENT_SUPER_TYPE), SAMPLE_FIELDS),
];

/// A node of the metadata element tree.
#[derive(Debug)]
struct Element {
    name: &'static str,
    attributes: Vec<(&'static str, String)>,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &'static str) -> Self {
        Element {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn attr<V: ToString>(&mut self, key: &'static str, value: V) {
        self.attributes.push((key, value.to_string()));
    }

    fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    fn intern<'a>(&'a self, strings: &mut IndexSet<&'a str>) {
        strings.insert(self.name);
        for (key, value) in &self.attributes {
            strings.insert(*key);
            strings.insert(value.as_str());
        }
        for child in &self.children {
            child.intern(strings);
        }
    }

    fn write(&self, w: &mut ByteWriter, strings: &IndexSet<&str>) {
        let index = |s: &str| strings.get_index_of(s).map_or(-1, |i| i as i32);
        w.int(index(self.name));
        w.int(self.attributes.len() as i32);
        for (key, value) in &self.attributes {
            w.int(index(*key));
            w.int(index(value.as_str()));
        }
        w.int(self.children.len() as i32);
        for child in &self.children {
            child.write(w, strings);
        }
    }
}

fn class_element(id: u64, name: &str, super_type: Option<&str>, fields: &[Field]) -> Element {
    let mut class = Element::new("class");
    class.attr("id", id);
    class.attr("name", name);
    if let Some(super_type) = super_type {
        class.attr("superType", super_type);
    }
    class.attr("simpleType", "false");
    if super_type == Some(EVENT_SUPER_TYPE) {
        let mut label = Element::new("annotation");
        label.attr("class", LABEL);
        label.attr("value", name);
        class.push(label);
    }
    for &(field, type_id, constant_pool, array) in fields {
        let mut element = Element::new("field");
        element.attr("name", field);
        element.attr("class", type_id);
        if constant_pool {
            element.attr("constantPool", "true");
        }
        if array {
            element.attr("dimension", 1);
        }
        class.push(element);
    }
    class
}

/// One frame handed to [`ChunkWriter::stack_trace`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Frame {
    class: String,
    method: String,
    line: i32,
    bci: i32,
    kind: FrameType,
}

macro_rules! frame_constructors {
    ($($name:ident => $kind:ident),*) => {
        $(
            #[doc = concat!("A frame of type `", stringify!($kind), "`.")]
            pub fn $name(class: &str, method: &str) -> Self {
                Self::new(class, method, FrameType::$kind)
            }
        )*
    };
}

impl Frame {
    /// A frame of the given type. `class` may use either `/` or `.` as package separator; an
    /// empty class yields a bare method name.
    pub fn new(class: &str, method: &str, kind: FrameType) -> Self {
        Frame {
            class: class.to_owned(),
            method: method.to_owned(),
            line: -1,
            bci: -1,
            kind,
        }
    }

    frame_constructors! {
        interpreted => Interpreted,
        jit => JitCompiled,
        inlined => Inlined,
        c1 => C1Compiled,
        native => Native,
        cpp => Cpp,
        kernel => Kernel
    }

    /// Sets the source line.
    pub fn line(mut self, line: u32) -> Self {
        self.line = line as i32;
        self
    }

    /// Sets the bytecode index.
    pub fn bci(mut self, bci: u32) -> Self {
        self.bci = bci as i32;
        self
    }
}

/// Handle to a thread interned in a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(i64);

/// Handle to a stack trace interned in a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StackId(i64);

/// Builds a recording chunk by chunk.
#[derive(Debug)]
pub struct RecordingWriter {
    byte_order: ByteOrder,
    compressed: bool,
    major: u16,
    minor: u16,
    bytes: Vec<u8>,
}

impl Default for RecordingWriter {
    fn default() -> Self {
        RecordingWriter {
            byte_order: ByteOrder::BigEndian,
            compressed: true,
            major: 2,
            minor: 1,
            bytes: Vec::new(),
        }
    }
}

impl RecordingWriter {
    /// A big-endian writer with compressed integers and format version 2.1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte order of subsequently written chunks.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Whether subsequently written chunks use varint integers.
    pub fn with_compressed_integers(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Format version stamped on subsequently written chunks.
    pub fn with_version(mut self, major: u16, minor: u16) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    /// Starts a new chunk beginning at `start_nanos` (nanoseconds since the epoch).
    ///
    /// The chunk is appended to the recording by [`ChunkWriter::finish`]; dropping the writer
    /// without finishing discards it.
    pub fn chunk(&mut self, start_nanos: i64) -> ChunkWriter<'_> {
        let mut body = ByteWriter::new(self.byte_order, self.compressed);
        body.raw(&[0; HEADER_SIZE as usize]);
        ChunkWriter {
            start_nanos,
            body,
            end_ticks: 0,
            symbols: IndexSet::new(),
            classes: IndexSet::new(),
            methods: IndexSet::new(),
            stacks: IndexSet::new(),
            threads: IndexSet::new(),
            custom: Vec::new(),
            recording: self,
        }
    }

    /// The recording written so far.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The recording written so far, gzip-compressed.
    pub fn into_gzip_bytes(self) -> Result<Vec<u8>> {
        let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
        encoder.write_all(&self.bytes)?;
        Ok(encoder.finish().into_result()?)
    }

    /// Writes the recording written so far to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Writes the events and constants of a single chunk.
pub struct ChunkWriter<'r> {
    recording: &'r mut RecordingWriter,
    start_nanos: i64,
    body: ByteWriter,
    end_ticks: i64,
    symbols: IndexSet<String>,
    classes: IndexSet<i64>,
    methods: IndexSet<(i64, i64)>,
    stacks: IndexSet<Vec<(i64, i32, i32, i64)>>,
    threads: IndexSet<String>,
    custom: Vec<String>,
}

/// Pool keys start at 1 so that 0 can mean "absent".
fn key(index: usize) -> i64 {
    index as i64 + 1
}

impl<'r> ChunkWriter<'r> {
    fn symbol(&mut self, s: &str) -> i64 {
        match self.symbols.get_index_of(s) {
            Some(i) => key(i),
            None => key(self.symbols.insert_full(s.to_owned()).0),
        }
    }

    fn class(&mut self, name: &str) -> i64 {
        let symbol = self.symbol(&name.replace('.', "/"));
        key(self.classes.insert_full(symbol).0)
    }

    fn method(&mut self, class: &str, name: &str) -> i64 {
        let class = if class.is_empty() { 0 } else { self.class(class) };
        let name = self.symbol(name);
        key(self.methods.insert_full((class, name)).0)
    }

    /// Interns a thread by name.
    pub fn thread(&mut self, name: &str) -> ThreadId {
        match self.threads.get_index_of(name) {
            Some(i) => ThreadId(key(i)),
            None => ThreadId(key(self.threads.insert_full(name.to_owned()).0)),
        }
    }

    /// Interns a stack trace given root-most frame first.
    pub fn stack_trace(&mut self, frames: &[Frame]) -> StackId {
        let mut encoded = Vec::with_capacity(frames.len());
        for frame in frames.iter().rev() {
            let method = self.method(&frame.class, &frame.method);
            let kind = FRAME_TYPES
                .iter()
                .position(|&t| t == frame.kind)
                .map_or(key(1), key);
            encoded.push((method, frame.line, frame.bci, kind));
        }
        StackId(key(self.stacks.insert_full(encoded).0))
    }

    fn event<F>(&mut self, type_id: u64, ticks: i64, duration: i64, body: F)
    where
        F: FnOnce(&mut ByteWriter),
    {
        self.end_ticks = self.end_ticks.max(ticks.saturating_add(duration));
        self.body.record(type_id, |w| {
            w.long(ticks);
            body(w);
        });
    }

    /// A `jdk.ExecutionSample`; pass `None` for a sample without a stack trace.
    pub fn execution_sample<S>(&mut self, ticks: i64, thread: ThreadId, stack: S)
    where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        self.event(EXECUTION_SAMPLE, ticks, 0, |w| {
            w.long(thread.0);
            w.long(stack);
        });
    }

    /// A `jdk.NativeMethodSample`.
    pub fn native_sample<S>(&mut self, ticks: i64, thread: ThreadId, stack: S)
    where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        self.event(NATIVE_METHOD_SAMPLE, ticks, 0, |w| {
            w.long(thread.0);
            w.long(stack);
        });
    }

    /// A `jdk.ObjectAllocationSample` of `class`, weighing `weight` bytes.
    pub fn allocation_sample<S>(
        &mut self,
        ticks: i64,
        thread: ThreadId,
        stack: S,
        class: &str,
        weight: i64,
    ) where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        let class = self.class(class);
        self.event(ALLOCATION_SAMPLE, ticks, 0, |w| {
            w.long(thread.0);
            w.long(stack);
            w.long(class);
            w.long(weight);
        });
    }

    /// A `jdk.ObjectAllocationInNewTLAB`.
    pub fn allocation_in_new_tlab<S>(
        &mut self,
        ticks: i64,
        thread: ThreadId,
        stack: S,
        class: &str,
        allocation_size: i64,
        tlab_size: i64,
    ) where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        let class = self.class(class);
        self.event(ALLOCATION_IN_NEW_TLAB, ticks, 0, |w| {
            w.long(thread.0);
            w.long(stack);
            w.long(class);
            w.long(allocation_size);
            w.long(tlab_size);
        });
    }

    /// A `jdk.ObjectAllocationOutsideTLAB`.
    pub fn allocation_outside_tlab<S>(
        &mut self,
        ticks: i64,
        thread: ThreadId,
        stack: S,
        class: &str,
        allocation_size: i64,
    ) where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        let class = self.class(class);
        self.event(ALLOCATION_OUTSIDE_TLAB, ticks, 0, |w| {
            w.long(thread.0);
            w.long(stack);
            w.long(class);
            w.long(allocation_size);
        });
    }

    /// A `jdk.JavaMonitorEnter` blocked on a monitor of `class` for `duration` ticks.
    pub fn monitor_enter<S>(
        &mut self,
        ticks: i64,
        duration: i64,
        thread: ThreadId,
        stack: S,
        class: &str,
    ) where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        let class = self.class(class);
        self.event(MONITOR_ENTER, ticks, duration, |w| {
            w.long(duration);
            w.long(thread.0);
            w.long(stack);
            w.long(class);
            w.long(0);
            w.long(0);
        });
    }

    /// A `jdk.ThreadPark` parked on an object of `class` for `duration` ticks.
    pub fn thread_park<S>(
        &mut self,
        ticks: i64,
        duration: i64,
        thread: ThreadId,
        stack: S,
        class: &str,
    ) where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        let class = self.class(class);
        self.event(THREAD_PARK, ticks, duration, |w| {
            w.long(duration);
            w.long(thread.0);
            w.long(stack);
            w.long(class);
            w.long(-1);
            w.long(0);
        });
    }

    /// Declares an additional event type with `startTime`, `duration`, `eventThread` and
    /// `stackTrace` fields, returning its id.
    pub fn event_type(&mut self, name: &str) -> u64 {
        match self.custom.iter().position(|n| n == name) {
            Some(i) => FIRST_CUSTOM_TYPE + i as u64,
            None => {
                self.custom.push(name.to_owned());
                FIRST_CUSTOM_TYPE + self.custom.len() as u64 - 1
            }
        }
    }

    /// An event of a type declared with [`ChunkWriter::event_type`].
    pub fn custom_event<S>(
        &mut self,
        type_id: u64,
        ticks: i64,
        duration: i64,
        thread: ThreadId,
        stack: S,
    ) where
        S: Into<Option<StackId>>,
    {
        let stack = stack.into().map_or(0, |s| s.0);
        self.event(type_id, ticks, duration, |w| {
            w.long(duration);
            w.long(thread.0);
            w.long(stack);
        });
    }

    fn write_pools(&self, w: &mut ByteWriter) -> (u64, u64) {
        // constants: symbols and classes
        let older = w.len() as u64;
        w.record(CONSTANT_POOL_RECORD, |w| {
            w.long(0);
            w.long(0);
            w.long(0);
            w.boolean(true);
            w.int(2);

            w.long(SYMBOL as i64);
            w.int(self.symbols.len() as i32);
            for (i, s) in self.symbols.iter().enumerate() {
                w.long(key(i));
                w.string(Some(s));
            }

            w.long(CLASS as i64);
            w.int(self.classes.len() as i32);
            for (i, &symbol) in self.classes.iter().enumerate() {
                w.long(key(i));
                w.long(symbol);
                w.int(1);
            }
        });

        // everything else, chained back to the first record
        let newer = w.len() as u64;
        w.record(CONSTANT_POOL_RECORD, |w| {
            w.long(0);
            w.long(0);
            w.long(older as i64 - newer as i64);
            w.boolean(true);
            w.int(4);

            w.long(THREAD as i64);
            w.int(self.threads.len() as i32);
            for (i, name) in self.threads.iter().enumerate() {
                w.long(key(i));
                w.string(Some(name));
                w.long(key(i));
                w.string(Some(name));
                w.long(key(i));
            }

            w.long(METHOD as i64);
            w.int(self.methods.len() as i32);
            for (i, &(class, name)) in self.methods.iter().enumerate() {
                w.long(key(i));
                w.long(class);
                w.long(name);
                w.long(0);
                w.int(1);
                w.boolean(false);
            }

            w.long(STACK_TRACE as i64);
            w.int(self.stacks.len() as i32);
            for (i, frames) in self.stacks.iter().enumerate() {
                w.long(key(i));
                w.boolean(false);
                w.int(frames.len() as i32);
                for &(method, line, bci, kind) in frames {
                    w.long(method);
                    w.int(line);
                    w.int(bci);
                    w.long(kind);
                }
            }

            w.long(FRAME_TYPE as i64);
            w.int(FRAME_TYPES.len() as i32);
            for (i, t) in FRAME_TYPES.iter().enumerate() {
                w.long(key(i));
                w.string(t.description());
            }
        });
        (older, newer)
    }

    fn write_metadata(&self, w: &mut ByteWriter) {
        let mut metadata = Element::new("metadata");
        for &(id, name, super_type, fields) in BUILTIN_TYPES {
            metadata.push(class_element(id, name, super_type, fields));
        }
        for (i, name) in self.custom.iter().enumerate() {
            let id = FIRST_CUSTOM_TYPE + i as u64;
            metadata.push(class_element(id, name, Some(EVENT_SUPER_TYPE), CUSTOM_FIELDS));
        }
        let mut root = Element::new("root");
        root.push(metadata);
        let mut region = Element::new("region");
        region.attr("locale", "en_US");
        region.attr("gmtOffset", "0");
        root.push(region);

        let mut strings = IndexSet::new();
        root.intern(&mut strings);
        w.record(METADATA_RECORD, |w| {
            w.long(0);
            w.long(0);
            w.long(1);
            w.int(strings.len() as i32);
            for s in &strings {
                w.string(Some(*s));
            }
            root.write(w, &strings);
        });
    }

    /// Completes the chunk and appends it to the recording.
    pub fn finish(mut self) {
        let mut body = std::mem::replace(
            &mut self.body,
            ByteWriter::new(self.recording.byte_order, self.recording.compressed),
        );
        let (_, constant_pool_offset) = self.write_pools(&mut body);
        let metadata_offset = body.len() as u64;
        self.write_metadata(&mut body);

        let mut bytes = body.into_inner();
        let header = ChunkHeader {
            offset: self.recording.bytes.len() as u64,
            size: bytes.len() as u64,
            byte_order: self.recording.byte_order,
            major: self.recording.major,
            minor: self.recording.minor,
            constant_pool_offset,
            metadata_offset,
            start_nanos: self.start_nanos,
            duration_nanos: self.end_ticks.max(0),
            start_ticks: 0,
            ticks_per_second: TICKS_PER_SECOND,
            features: if self.recording.compressed {
                FEATURE_COMPRESSED_INTS
            } else {
                0
            },
        };
        bytes[..HEADER_SIZE as usize].copy_from_slice(&header.to_bytes());
        self.recording.bytes.extend_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{collect_chunks, collect_headers, ChunkData};
    use std::io::Cursor;

    #[test]
    fn chunks_follow_each_other() {
        let mut recording = RecordingWriter::new().with_byte_order(ByteOrder::LittleEndian);
        for i in 0..3 {
            let mut chunk = recording.chunk(i * 10_000_000_000);
            let t = chunk.thread("worker");
            chunk.execution_sample(500, t, None);
            chunk.finish();
        }
        let headers = collect_headers(recording.into_bytes()).unwrap();
        assert_eq!(headers.len(), 3);
        assert!(headers.iter().all(|h| h.byte_order == ByteOrder::LittleEndian));
        assert_eq!(headers[2].start_nanos, 20_000_000_000);
        assert_eq!(headers[0].duration_nanos, 500);
    }

    #[test]
    fn custom_event_types_are_described() {
        let mut recording = RecordingWriter::new();
        let mut chunk = recording.chunk(0);
        let window = chunk.event_type("profiler.Window");
        assert_eq!(chunk.event_type("profiler.Window"), window);
        let t = chunk.thread("main");
        chunk.custom_event(window, 10, 5, t, None);
        chunk.finish();
        let chunks = collect_chunks(recording.into_bytes()).unwrap();
        assert!(chunks[0].event_types.contains("profiler.Window"));
        assert!(chunks[0].event_types.contains("jdk.ExecutionSample"));
    }

    #[test]
    fn interning_reuses_constants() {
        let mut recording = RecordingWriter::new();
        let mut chunk = recording.chunk(0);
        let frames = [Frame::jit("a/B", "c"), Frame::inlined("a/B", "d").line(3)];
        let s1 = chunk.stack_trace(&frames);
        let s2 = chunk.stack_trace(&frames);
        assert_eq!(s1, s2);
        assert_eq!(chunk.thread("x"), chunk.thread("x"));
        assert_eq!(chunk.methods.len(), 2);
        assert_eq!(chunk.classes.len(), 1);
        chunk.finish();

        let bytes = recording.into_bytes();
        let header = collect_headers(bytes.clone()).unwrap().remove(0);
        let data = ChunkData::load(&mut Cursor::new(bytes), &header).unwrap();
        let pools = data.constant_pools();
        assert_eq!(pools.pool_len(STACK_TRACE), 1);
        assert_eq!(pools.pool_len(FRAME_TYPE), FRAME_TYPES.len());
    }

    #[test]
    fn gzip_output_is_readable() {
        let mut recording = RecordingWriter::new();
        let mut chunk = recording.chunk(0);
        let t = chunk.thread("main");
        chunk.execution_sample(1, t, None);
        chunk.finish();
        let gz = recording.into_gzip_bytes().unwrap();
        assert_eq!(&gz[..2], &[0x1f, 0x8b]);
        assert_eq!(collect_headers(gz).unwrap().len(), 1);
    }
}
