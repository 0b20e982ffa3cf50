#![no_main]

use chatloop_ai::{SseFrame, SseFrameDecoder};
use libfuzzer_sys::fuzz_target;

fn decode(chunks: &[&[u8]]) -> Vec<SseFrame> {
    let mut decoder = SseFrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        frames.extend(decoder.push(chunk));
    }
    frames.extend(decoder.finish());
    frames
}

fuzz_target!(|data: &[u8]| {
    let whole = decode(&[data]);
    for frame in &whole {
        if let SseFrame::Data(payload) = frame {
            assert!(!payload.is_empty());
            assert!(!payload.contains('\r'));
        }
    }

    if std::str::from_utf8(data).is_ok() && !data.is_empty() {
        let split = usize::from(data[0]) % data.len();
        let (head, tail) = data.split_at(split);
        assert_eq!(decode(&[head, tail]), whole);
    }
});
