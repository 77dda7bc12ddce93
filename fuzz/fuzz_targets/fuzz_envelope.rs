#![no_main]

//! Fuzz harness for inbound envelope parsing.
//!
//! Exercises `Envelope::parse`, id salvage, and the handler-specific param
//! accessors across arbitrary inbound text. Dispatch must never panic on
//! malformed or adversarial payloads.

use libfuzzer_sys::fuzz_target;
use minibridge::bridge::Envelope;

const MAX_INPUT_BYTES: usize = 128 * 1024;

fn fuzz_envelope(input: &str) {
    if input.is_empty() {
        return;
    }

    let _ = Envelope::salvage_id(input);
    let Ok(envelope) = Envelope::parse(input) else {
        return;
    };

    let _ = envelope.param_str();
    let _ = envelope.parse_param::<serde_json::Value>();
    let _ = envelope.parse_param::<std::collections::HashMap<String, String>>();
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > MAX_INPUT_BYTES {
        return;
    }

    let lossy = String::from_utf8_lossy(data);

    // Whole payload.
    fuzz_envelope(&lossy);

    // Line-oriented variants for truncated fragments.
    for line in lossy.lines().take(256) {
        fuzz_envelope(line.trim_end_matches('\r'));
    }
});
