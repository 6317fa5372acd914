#![no_main]

use libfuzzer_sys::fuzz_target;
use mgmt_channel::{ControlMessage, SensorMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Manager input is untrusted line-delimited JSON.
    for line in text.lines() {
        if let Ok(frame) = serde_json::from_str::<ControlMessage>(line) {
            // Decoded frames must re-encode.
            let _ = serde_json::to_string(&frame);
        }
        let _ = serde_json::from_str::<SensorMessage>(line);
    }
});
