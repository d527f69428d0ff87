#![no_main]

use libfuzzer_sys::fuzz_target;
use spirolink_rs::packet::codec::{decode, encode};
use spirolink_rs::packet::payload::parse_body;
use spirolink_rs::session::types::TestType;

fuzz_target!(|data: &[u8]| {
    for context in [TestType::None, TestType::Fvc, TestType::Oximetry, TestType::Mvv] {
        if let Ok(packet) = decode(data, context) {
            let _ = parse_body(&packet);
        }
    }

    // Reframe the input so the payload parsers see it with a valid checksum
    if let Some((&code, payload)) = data.split_first() {
        let framed = encode(code, payload);
        if let Ok(packet) = decode(&framed, TestType::Fvc) {
            let _ = parse_body(&packet);
        }
    }
});
