//! Fuzz target: `FrameDecoder::feed_slice`
//!
//! Drives arbitrary byte sequences into the streaming frame decoder and
//! asserts that it never panics, never yields an oversized payload, and
//! that every frame it accepts re-encodes to a valid frame.  Feeding the
//! same bytes one at a time must give the same result as one slice.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use crema::rpc::codec::{FrameDecoder, MAX_PAYLOAD};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    let whole = decoder.feed_slice(data);

    for frame in whole.iter().flatten() {
        assert!(frame.payload.len() <= MAX_PAYLOAD, "payload exceeds MAX_PAYLOAD");
        let mut again = FrameDecoder::new();
        let round = again.feed_slice(&frame.to_bytes());
        assert_eq!(round.len(), 1);
        assert_eq!(round[0].as_ref().ok(), Some(frame));
    }

    // Byte-at-a-time delivery must decode identically.
    decoder.reset();
    let mut split = Vec::new();
    for b in data {
        split.extend(decoder.feed_slice(core::slice::from_ref(b)));
    }
    assert_eq!(split, whole);
});
