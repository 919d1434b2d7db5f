#![no_main]

use libfuzzer_sys::fuzz_target;
use uo_conformance::{decode_stacked, find_executable};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut stream = decode_stacked(text);
    let mut last_offset = 0;
    let mut errored = false;
    while let Some(step) = stream.next() {
        assert!(!errored, "stream yielded after a decode error");
        assert!(stream.offset() >= last_offset, "cursor moved backwards");
        assert!(stream.offset() <= text.len());
        last_offset = stream.offset();
        errored = step.is_err();
    }
    assert!(stream.next().is_none(), "stream is fused");

    let _ = find_executable(text);
});
