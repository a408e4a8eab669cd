//! Fuzz target for worker event decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_event_decode
//!
//! Feeds raw bytes, invalid UTF-8 included, to `Event::from_slice()`, the
//! decoder the worker pipe applies to every line. Decoded events must
//! survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use panbridge_core::message::Event;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = Event::from_slice(data) {
        let _ = event.kind();
        let encoded = serde_json::to_string(&event).expect("decoded event re-encodes");
        let decoded = Event::from_json(&encoded).expect("re-encoded event decodes");
        assert_eq!(decoded, event);
    }
});
