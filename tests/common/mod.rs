#![allow(dead_code)]

pub mod test_logger;

use jfr_flame::recording::writer::{Frame, RecordingWriter};

/// Nanoseconds between consecutive samples of a fixture chunk.
pub const SAMPLE_INTERVAL: i64 = 10_000_000;

/// Frames of a folded stack, `"a;b;c"` root first, all JIT compiled.
pub fn frames(stack: &str) -> Vec<Frame> {
    stack.split(';').map(|m| Frame::jit("", m)).collect()
}

/// Writes one chunk per entry of `chunks`; each folded stack is sampled `n` times on thread
/// `main`, one sample every [`SAMPLE_INTERVAL`].
pub fn write_chunks(w: &mut RecordingWriter, start_nanos: i64, chunks: &[&[(&str, u64)]]) {
    for (i, stacks) in chunks.iter().enumerate() {
        let mut chunk = w.chunk(start_nanos + i as i64 * 60_000_000_000);
        let main = chunk.thread("main");
        let mut ticks = 0;
        for &(stack, n) in stacks.iter() {
            let id = chunk.stack_trace(&frames(stack));
            for _ in 0..n {
                chunk.execution_sample(ticks, main, id);
                ticks += SAMPLE_INTERVAL;
            }
        }
        chunk.finish();
    }
}

/// A recording with one chunk per entry of `chunks`.
pub fn recording(chunks: &[&[(&str, u64)]]) -> Vec<u8> {
    let mut w = RecordingWriter::new();
    write_chunks(&mut w, 1_600_000_000_000_000_000, chunks);
    w.into_bytes()
}

/// A single-chunk recording of folded stacks.
pub fn profile(stacks: &[(&str, u64)]) -> Vec<u8> {
    recording(&[stacks])
}
