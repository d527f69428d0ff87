#![no_main]

use libfuzzer_sys::fuzz_target;
use spirolink_rs::command::MockCommandSink;
use spirolink_rs::config::EngineConfig;
use spirolink_rs::device_engine::DeviceEngine;
use spirolink_rs::packet::codec::encode;
use spirolink_rs::session::types::TestType;

const TESTS: [TestType; 4] = [TestType::Fvc, TestType::Vc, TestType::Mvv, TestType::Oximetry];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, mut rest)) = data.split_first() else {
        return;
    };
    let mut engine = DeviceEngine::new(EngineConfig::default(), MockCommandSink::new());
    let _ = engine.arm_test(TESTS[selector as usize % TESTS.len()]);

    // [code, len, payload...] chunks, each framed as one packet
    while let [code, len, tail @ ..] = rest {
        let take = (*len as usize).min(tail.len());
        let _ = engine.on_packet_bytes(&encode(*code, &tail[..take]));
        rest = &tail[take..];
    }
    let _ = engine.current_session_state();
});
