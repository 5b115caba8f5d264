//! Fuzz target for availability event decoding.
//!
//! Decoding must never panic, and anything it accepts must re-encode to a
//! payload that decodes to the same event.

#![no_main]

use libfuzzer_sys::fuzz_target;
use stock_sync::stream::decode_event;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = decode_event(data) {
        let encoded = serde_json::to_vec(&event).expect("event serializes");
        let again = decode_event(&encoded).expect("re-encoded event decodes");
        assert_eq!(event, again);
    }
});
