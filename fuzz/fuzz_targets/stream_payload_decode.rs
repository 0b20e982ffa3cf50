#![no_main]

use chatloop_ai::decode_stream_payload;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    match decode_stream_payload(&raw) {
        Ok(event) => {
            let _ = event.label();
        }
        Err(error) => assert!(!error.to_string().is_empty()),
    }
});
