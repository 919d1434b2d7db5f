#![no_main]

use libfuzzer_sys::fuzz_target;
use uo_fingerprint::Fingerprint;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(parsed) = Fingerprint::from_json(text) else {
        return;
    };

    let rendered = parsed.to_json_pretty().expect("a decoded fingerprint re-encodes");
    let reparsed = Fingerprint::from_json(&rendered).expect("re-encoded document decodes");
    assert_eq!(parsed, reparsed);
});
