//! End-to-end session tests: literal packet sequences fed through a
//! `DeviceEngine`, checked against the published outcomes.

use spirolink_rs::command::{DeviceCommand, MockCommandSink};
use spirolink_rs::config::EngineConfig;
use spirolink_rs::device_engine::{DeviceEngine, TestOutcome};
use spirolink_rs::error::{BuildError, ErrorKind};
use spirolink_rs::packet::codec::encode;
use spirolink_rs::results::model::{EndOfForcedExpiration, TestResult};
use spirolink_rs::results::quality::{AcceptabilityStatus, QualityCode, QualityInstruction};
use spirolink_rs::session::machine::RealtimeEvent;
use spirolink_rs::session::types::{AtsStandard, ContinuationGroup, SessionState, TestType};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Shared<T> = Arc<Mutex<Vec<T>>>;

fn engine_with(config: EngineConfig) -> (DeviceEngine<MockCommandSink>, Shared<TestOutcome>) {
    let mut engine = DeviceEngine::new(config, MockCommandSink::new());
    let outcomes: Shared<TestOutcome> = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    engine.subscribe_to_results(move |outcome| sink.lock().unwrap().push(outcome.clone()));
    (engine, outcomes)
}

fn engine() -> (DeviceEngine<MockCommandSink>, Shared<TestOutcome>) {
    engine_with(EngineConfig::default())
}

fn feed(engine: &mut DeviceEngine<MockCommandSink>, code: u8, payload: &[u8]) {
    engine.on_packet_bytes(&encode(code, payload)).unwrap();
}

/// Flow-volume record: mL, cL/s, ms.
fn fv(records: &[(i16, i16, u16)]) -> Vec<u8> {
    records
        .iter()
        .flat_map(|(v, f, t)| [v.to_le_bytes(), f.to_le_bytes(), t.to_le_bytes()].concat())
        .collect()
}

/// Volume-time record: mL, ms.
fn vt(records: &[(i16, u16)]) -> Vec<u8> {
    records
        .iter()
        .flat_map(|(v, t)| [v.to_le_bytes(), t.to_le_bytes()].concat())
        .collect()
}

fn u16s(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn single_outcome(outcomes: &Shared<TestOutcome>) -> TestOutcome {
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1, "outcomes: {outcomes:?}");
    outcomes[0].clone()
}

fn feed_fvc_results(engine: &mut DeviceEngine<MockCommandSink>) {
    feed(engine, 0xD1, &[0x01, 0x00]); // ATS 2019, plateau reached
    feed(engine, 0x31, &u16s(&[800, 350, 450])); // PEF cL/s, FEV1 cL, FVC cL
    feed(engine, 0x32, &u16s(&[778, 440, 300]));
    feed(engine, 0x33, &u16s(&[100, 80, 6_500])); // eVol mL, PEF time ms, FET ms
    feed(engine, 0x34, &u16s(&[460, 500, 1_000])); // FIVC cL, hesitation ms, inspiration ms
    feed(engine, 0x35, &[0x00, 0x04]);
    feed(engine, 0x36, &u16s(&[200, 280]));
}

#[test]
fn test_full_fvc_session() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Fvc).unwrap();

    feed(&mut engine, 0x86, &[0x0F, 0x00, 0xEC, 0xFF]);
    feed(&mut engine, 0x08, &fv(&[(100, 300, 10), (500, 600, 20)]));
    feed(&mut engine, 0x08, &fv(&[(1_000, 400, 30)]));
    // 0xD3 is the volume-time curve while an FVC test is armed
    feed(&mut engine, 0xD3, &vt(&[(100, 10), (500, 20)]));
    feed(&mut engine, 0xD8, &4u16.to_le_bytes());
    feed(&mut engine, 0xD9, &[0x00, 0x00, 0x64, 0x00, 0xC8, 0x00]);
    feed(&mut engine, 0xD9, &[0x02, 0x00, 0x2C, 0x01, 0x96, 0x00]);
    feed_fvc_results(&mut engine);
    feed(&mut engine, 0xA2, &3u16.to_le_bytes());

    let fvc = match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => match result.as_ref() {
            TestResult::Fvc(fvc) => fvc.clone(),
            other => panic!("unexpected result {other:?}"),
        },
        other => panic!("unexpected outcome {other:?}"),
    };

    assert_eq!(fvc.header.ats_standard, AtsStandard::Ats2019);
    assert!((fvc.pef_ls - 8.0).abs() < 1e-4);
    assert!((fvc.fev1_l - 3.5).abs() < 1e-4);
    assert!((fvc.fvc_l - 4.5).abs() < 1e-4);
    assert!((fvc.fev1_fvc_pct - 77.8).abs() < 1e-4);
    assert_eq!(fvc.end_of_forced_expiration, Some(EndOfForcedExpiration::PlateauReached));
    assert_eq!(fvc.device_quality_code, Some(4));
    assert!(fvc.fev075_l.is_some());

    assert_eq!(fvc.flow_volume.len(), 3);
    assert!((fvc.flow_volume[2].volume_l - 1.0).abs() < 1e-6);
    assert_eq!(fvc.volume_time.len(), 2);
    assert_eq!(fvc.high_res.flows_ls.len(), 4);
    assert_eq!(fvc.high_res.expected_samples, Some(4));
    assert_eq!(fvc.high_res.missing_samples, 0);

    assert_eq!(fvc.quality.code, QualityCode::GoodBlow);
    assert_eq!(fvc.quality.instruction, QualityInstruction::None);
    assert_eq!(fvc.quality.acceptability, AcceptabilityStatus::Acceptable);

    let calibration = fvc.header.calibration.unwrap();
    assert!((calibration.expiratory_pct - 1.5).abs() < 1e-4);
    assert!((calibration.inspiratory_pct + 2.0).abs() < 1e-4);

    assert_eq!(engine.current_session_state().state, SessionState::Complete);
}

#[test]
fn test_vc_session() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Vc).unwrap();

    feed(&mut engine, 0x02, &vt(&[(200, 100), (900, 200), (1_400, 300)]));
    feed(
        &mut engine,
        0x91,
        &[0x00, 0xAE, 0x01, 0xA4, 0x01, 0x2C, 0x01, 0xB8, 0x0B, 0x02],
    );
    feed(&mut engine, 0x92, &u16s(&[1_800, 1_200, 600, 90]));
    feed(&mut engine, 0x93, &u16s(&[150, 180, 220, 33, 45, 10, 12]));
    feed(&mut engine, 0xF2, &[]);

    match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => match result.as_ref() {
            TestResult::Vc(vc) => {
                assert_eq!(vc.header.ats_standard, AtsStandard::Ats2015);
                assert!((vc.evc_l - 4.3).abs() < 1e-4);
                assert!((vc.ivc_l - 4.2).abs() < 1e-4);
                assert!((vc.ic_l - 3.0).abs() < 1e-4);
                assert!((vc.slow_exp_ins_time_s - 3.0).abs() < 1e-4);
                assert_eq!(vc.quality_code, Some(2));
                assert!((vc.tv_l.unwrap() - 0.6).abs() < 1e-4);
                assert_eq!(vc.volume_time.len(), 3);
            }
            other => panic!("unexpected result {other:?}"),
        },
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_mvv_session_uses_shared_terminal_code() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Mvv).unwrap();

    feed(&mut engine, 0x04, &vt(&[(300, 50), (-200, 100)]));
    feed(&mut engine, 0x94, &[0x01, 0xB5, 0x04]);
    // 0xF3 ends an MVV session outside of oximetry
    feed(&mut engine, 0xF3, &[]);

    match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => {
            assert_eq!(result.test_type(), TestType::Mvv);
            assert_eq!(result.curve_len(), 2);
            match result.as_ref() {
                TestResult::Mvv(mvv) => assert!((mvv.mvv_lmin - 120.5).abs() < 1e-4),
                other => panic!("unexpected result {other:?}"),
            }
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_oximetry_session() {
    let (mut engine, outcomes) = engine();
    let live: Shared<RealtimeEvent> = Arc::new(Mutex::new(Vec::new()));
    let live_sink = live.clone();
    engine.subscribe_to_realtime(move |event| live_sink.lock().unwrap().push(event.clone()));
    engine.arm_test(TestType::Oximetry).unwrap();

    feed(&mut engine, 0x20, &[97, 72, 5, 0x05]);
    // 0xF3 is the stored oximetry curve here
    feed(&mut engine, 0xF3, &[96, 60, 98, 80, 97, 70]);

    let mut base = vec![97, 70];
    base.extend_from_slice(&3_725u32.to_le_bytes());
    base.extend_from_slice(&3_600u32.to_le_bytes());
    base.extend_from_slice(&u16s(&[2, 1, 0]));
    // 0x51 is the oximetry base result, not a battery report
    feed(&mut engine, 0x51, &base);

    let mut base2: Vec<u8> = [65u32, 40, 20, 10, 5, 0, 0]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    base2.extend_from_slice(&150u16.to_le_bytes());
    base2.push(0);
    feed(&mut engine, 0x52, &base2);
    feed(&mut engine, 0xD0, &3u16.to_le_bytes());

    match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => match result.as_ref() {
            TestResult::Oximetry(oxy) => {
                assert_eq!(oxy.spo2_baseline_pct, 97);
                assert_eq!(oxy.spo2_min_pct, 96);
                assert_eq!(oxy.spo2_max_pct, 98);
                assert!((oxy.bpm_mean - 70.0).abs() < 1e-4);
                assert_eq!(oxy.recording_time.hours, 1);
                assert_eq!(oxy.t90.minutes, 1);
                assert_eq!(oxy.t90.seconds, 5);
                assert_eq!(oxy.events_spo2_below_89, Some(2));
                assert_eq!(oxy.atrial_fibrillation, Some(false));
                assert_eq!(oxy.samples.len(), 3);
            }
            other => panic!("unexpected result {other:?}"),
        },
        other => panic!("unexpected outcome {other:?}"),
    }

    let live = live.lock().unwrap();
    assert!(matches!(live[0], RealtimeEvent::OximetryLive(rt) if rt.finger_on));
    assert_eq!(live.len(), 4);
}

#[test]
fn test_part_out_of_order_aborts_then_rearm_works() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Fvc).unwrap();

    feed(&mut engine, 0x08, &fv(&[(100, 300, 10)]));
    feed(&mut engine, 0x32, &u16s(&[778, 440, 300]));

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Fvc,
            reason: ErrorKind::OutOfOrderPacket
        }
    );
    assert_eq!(
        engine.current_session_state().state,
        SessionState::Aborted(ErrorKind::OutOfOrderPacket)
    );

    outcomes.lock().unwrap().clear();
    engine.arm_test(TestType::Mvv).unwrap();
    feed(&mut engine, 0x94, &[0x00, 0x84, 0x03]);
    feed(&mut engine, 0xF3, &[]);
    assert!(matches!(single_outcome(&outcomes), TestOutcome::Completed(_)));
}

#[test]
fn test_missing_part_gives_incomplete_result() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Vc).unwrap();
    feed(&mut engine, 0x02, &vt(&[(200, 100)]));
    feed(&mut engine, 0xF2, &[]);

    match single_outcome(&outcomes) {
        TestOutcome::Failed {
            test_type: TestType::Vc,
            reason: ErrorKind::IncompleteResult(_),
        } => {}
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_fvc_ending_after_third_part_is_incomplete() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Fvc).unwrap();
    feed(&mut engine, 0x08, &fv(&[(100, 300, 10), (500, 600, 20)]));
    feed(&mut engine, 0xD1, &[0x01, 0x00]);
    feed(&mut engine, 0x31, &u16s(&[800, 350, 450]));
    feed(&mut engine, 0x32, &u16s(&[778, 440, 300]));
    feed(&mut engine, 0x33, &u16s(&[100, 80, 6_500]));
    feed(&mut engine, 0xA2, &[]);

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Fvc,
            reason: ErrorKind::IncompleteResult(BuildError::MissingParts {
                group: ContinuationGroup::FvcLastRt2,
                received: 3,
                expected: 6,
            }),
        }
    );
    assert_eq!(engine.stats().sessions_completed, 0);
}

#[test]
fn test_calibration_echo_keeps_session_armed() {
    let (mut engine, outcomes) = engine();
    let start = Instant::now();
    engine.arm_test_at(TestType::Fvc, start).unwrap();
    let command = DeviceCommand::TxCalibration {
        expiratory: 15,
        inspiratory: -20,
    };
    engine.send_command_at(&command, start).unwrap();
    engine
        .on_packet_bytes_at(&encode(0x86, &[0x0F, 0x00, 0xEC, 0xFF]), start)
        .unwrap();

    assert_eq!(engine.current_session_state().state, SessionState::Armed(TestType::Fvc));
    assert_eq!(engine.next_deadline(), None);
    engine.poll_timers(start + Duration::from_secs(60));
    assert!(outcomes.lock().unwrap().is_empty());

    // the blow still completes with the echoed calibration
    feed(&mut engine, 0x08, &fv(&[(100, 300, 10), (500, 600, 20)]));
    feed_fvc_results(&mut engine);
    feed(&mut engine, 0xA2, &[]);
    match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => match result.as_ref() {
            TestResult::Fvc(fvc) => assert!(fvc.header.calibration.is_some()),
            other => panic!("unexpected result {other:?}"),
        },
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_time_going_backwards_aborts() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Vc).unwrap();
    feed(&mut engine, 0x02, &vt(&[(200, 100), (300, 200)]));
    feed(&mut engine, 0x02, &vt(&[(400, 150)]));

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Vc,
            reason: ErrorKind::OutOfOrderPacket
        }
    );
}

#[test]
fn test_high_res_chunk_behind_aborts() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Fvc).unwrap();
    feed(&mut engine, 0xD9, &[0x00, 0x00, 0x64, 0x00, 0xC8, 0x00]);
    feed(&mut engine, 0xD9, &[0x01, 0x00, 0x2C, 0x01]);

    assert!(matches!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            reason: ErrorKind::OutOfOrderPacket,
            ..
        }
    ));
}

#[test]
fn test_high_res_gap_is_counted() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Fvc).unwrap();
    feed(&mut engine, 0xD9, &[0x00, 0x00, 0x64, 0x00]);
    feed(&mut engine, 0xD9, &[0x03, 0x00, 0x2C, 0x01]);
    feed_fvc_results(&mut engine);
    feed(&mut engine, 0xA2, &[]);

    match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => match result.as_ref() {
            TestResult::Fvc(fvc) => {
                assert_eq!(fvc.high_res.flows_ls.len(), 2);
                assert_eq!(fvc.high_res.missing_samples, 2);
            }
            other => panic!("unexpected result {other:?}"),
        },
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_curve_cap_truncates_without_aborting() {
    let config = EngineConfig {
        max_curve_samples: 2,
        ..EngineConfig::default()
    };
    let (mut engine, outcomes) = engine_with(config);
    engine.arm_test(TestType::Mvv).unwrap();
    feed(&mut engine, 0x04, &vt(&[(100, 10), (200, 20), (300, 30)]));
    feed(&mut engine, 0x04, &vt(&[(400, 40)]));
    assert_eq!(engine.current_session_state().volume_time_samples, 2);

    feed(&mut engine, 0x94, &[0x01, 0xB5, 0x04]);
    feed(&mut engine, 0xF3, &[]);
    match single_outcome(&outcomes) {
        TestOutcome::Completed(result) => assert_eq!(result.curve_len(), 2),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_foreign_data_tag_while_collecting_aborts() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Vc).unwrap();
    feed(&mut engine, 0x02, &vt(&[(200, 100)]));
    feed(&mut engine, 0x08, &fv(&[(100, 300, 10)]));

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Vc,
            reason: ErrorKind::UnexpectedTagForState
        }
    );
}

#[test]
fn test_foreign_data_tag_while_armed_is_ignored() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Vc).unwrap();
    feed(&mut engine, 0x08, &fv(&[(100, 300, 10)]));

    assert!(outcomes.lock().unwrap().is_empty());
    assert_eq!(engine.current_session_state().state, SessionState::Armed(TestType::Vc));
}

#[test]
fn test_malformed_payload_aborts() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Mvv).unwrap();
    feed(&mut engine, 0x94, &[0x01, 0xB5]);

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Mvv,
            reason: ErrorKind::MalformedPayload
        }
    );
}

#[test]
fn test_checksum_failures_abort_session() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Vc).unwrap();

    let mut corrupt = encode(0x02, &vt(&[(200, 100)])).to_vec();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;

    for _ in 0..3 {
        assert!(engine.on_packet_bytes(&corrupt).is_err());
    }
    assert!(outcomes.lock().unwrap().is_empty());
    assert!(engine.on_packet_bytes(&corrupt).is_err());

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Vc,
            reason: ErrorKind::ChecksumFailures
        }
    );
    assert_eq!(engine.stats().decode_errors.checksum_mismatch, 4);
}

#[test]
fn test_inactivity_timeout_fires_once() {
    let (mut engine, outcomes) = engine();
    let start = Instant::now();
    engine.arm_test_at(TestType::Vc, start).unwrap();
    assert_eq!(engine.next_deadline(), None);

    let later = start + Duration::from_secs(5);
    engine
        .on_packet_bytes_at(&encode(0x02, &vt(&[(200, 100)])), later)
        .unwrap();
    let deadline = engine.next_deadline().unwrap();
    assert_eq!(deadline, later + Duration::from_secs(15));

    engine.poll_timers(deadline - Duration::from_millis(1));
    assert!(outcomes.lock().unwrap().is_empty());

    engine.poll_timers(deadline);
    engine.poll_timers(deadline + Duration::from_secs(1));
    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Vc,
            reason: ErrorKind::Timeout
        }
    );
    assert_eq!(engine.next_deadline(), None);
}

#[test]
fn test_abort_test_reports_once() {
    let (mut engine, outcomes) = engine();
    engine.arm_test(TestType::Oximetry).unwrap();
    engine.abort_test();
    engine.abort_test();

    assert_eq!(
        single_outcome(&outcomes),
        TestOutcome::Failed {
            test_type: TestType::Oximetry,
            reason: ErrorKind::AbortRequested
        }
    );
}
