#![no_main]

use dns_wire::{parse_message, Transport};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte selects the transport, the rest is the wire payload.
    let Some((selector, payload)) = data.split_first() else {
        return;
    };
    let transport = if selector & 1 == 0 {
        Transport::Udp
    } else {
        Transport::Tcp
    };

    for exchange in parse_message(payload, transport) {
        // Parsed names and results must always be sound UTF-8 strings.
        let _ = exchange.domain_name.len();
        let _ = exchange.query_result.len();
    }
});
