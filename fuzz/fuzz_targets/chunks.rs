#![no_main]

use jfr_flame::recording;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    recording::collect_chunks(data.to_vec()).ok();
});
