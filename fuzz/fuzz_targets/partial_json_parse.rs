#![no_main]

use chatloop_agent_core::parse_partial_json;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let parsed = parse_partial_json(&raw);
    if let Ok(expected) = serde_json::from_str::<serde_json::Value>(&raw) {
        assert_eq!(parsed, expected);
    }
});
