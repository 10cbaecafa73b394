#![no_main]

use jfr_flame::collect::{RecordingIterator, Session, SummaryCollector, SummaryProcessor, WorkerPool};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let pool = WorkerPool::new(1);
    if let Ok(it) = RecordingIterator::new(&pool, vec![Session::from_input(data.to_vec())]) {
        it.collect(&SummaryCollector, SummaryProcessor::default).ok();
    }
});
