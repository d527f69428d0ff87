//! Tests for the tokio connection driver.

use spirolink_rs::command::{ChannelSink, DeviceCommand};
use spirolink_rs::config::EngineConfig;
use spirolink_rs::connection::spawn_engine;
use spirolink_rs::device_engine::{DeviceEngine, TestOutcome};
use spirolink_rs::error::{CommandError, EngineError, ErrorKind};
use spirolink_rs::firmware::FirmwareUpdateState;
use spirolink_rs::packet::codec::encode;
use spirolink_rs::packet::tag::PacketTag;
use spirolink_rs::session::types::{SessionState, TestType};
use std::time::Duration;

fn fast_config() -> EngineConfig {
    EngineConfig {
        command_timeout: Duration::from_millis(50),
        end_of_test_timeout: Duration::from_millis(80),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_mvv_session_over_handle() {
    let (sink, _outgoing) = ChannelSink::new();
    let (handle, task) = spawn_engine(DeviceEngine::new(EngineConfig::default(), sink));
    let mut results = handle.subscribe_to_results();

    handle.arm_test(TestType::Mvv).await.unwrap();
    handle
        .deliver(encode(0x04, &[0x2C, 0x01, 0x32, 0x00]).freeze())
        .await
        .unwrap();
    handle
        .deliver(encode(0x94, &[0x01, 0xB5, 0x04]).freeze())
        .await
        .unwrap();
    handle.deliver(encode(0xF3, &[]).freeze()).await.unwrap();

    match results.recv().await.unwrap() {
        TestOutcome::Completed(result) => assert_eq!(result.test_type(), TestType::Mvv),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        handle.session_state().await.unwrap().state,
        SessionState::Complete
    );

    handle.shutdown().await;
    let engine = task.await.unwrap();
    assert_eq!(engine.stats().sessions_completed, 1);
}

#[tokio::test]
async fn test_command_resolves_on_response() {
    let (sink, mut outgoing) = ChannelSink::new();
    let (handle, _task) = spawn_engine(DeviceEngine::new(fast_config(), sink));

    let device = handle.clone();
    let responder = tokio::spawn(async move {
        let command = outgoing.recv().await.unwrap();
        assert_eq!(&command[..], &[0x00, 0x00, 0x00, 0x00]);
        device
            .deliver(encode(0x00, &[0x01, 0x04, 70]).freeze())
            .await
            .unwrap();
    });

    let outcome = handle.send_command(DeviceCommand::CheckReady).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.command, PacketTag::On);
    responder.await.unwrap();
}

#[tokio::test]
async fn test_command_times_out() {
    let (sink, _outgoing) = ChannelSink::new();
    let (handle, _task) = spawn_engine(DeviceEngine::new(fast_config(), sink));
    let mut outcomes = handle.subscribe_to_command_outcomes();

    let result = handle.send_command(DeviceCommand::Erase).await;
    assert_eq!(
        result,
        Err(EngineError::Command(CommandError::TimedOut {
            command: PacketTag::Erase
        }))
    );
    assert!(!outcomes.recv().await.unwrap().is_success());
    assert_eq!(handle.stats().await.unwrap().command_timeouts, 1);
}

#[tokio::test]
async fn test_session_timeout_driven_by_task() {
    let (sink, _outgoing) = ChannelSink::new();
    let (handle, _task) = spawn_engine(DeviceEngine::new(fast_config(), sink));
    let mut results = handle.subscribe_to_results();

    handle.arm_test(TestType::Vc).await.unwrap();
    handle
        .deliver(encode(0x02, &[0x10, 0x00, 0x0A, 0x00]).freeze())
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), results.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        TestOutcome::Failed {
            test_type: TestType::Vc,
            reason: ErrorKind::Timeout
        }
    );
}

#[tokio::test]
async fn test_firmware_progress_broadcast() {
    let (sink, _outgoing) = ChannelSink::new();
    let (handle, _task) = spawn_engine(DeviceEngine::new(EngineConfig::default(), sink));
    let mut progress = handle.subscribe_to_firmware_progress();

    handle.begin_firmware_update().await.unwrap();
    assert_eq!(
        handle.arm_test(TestType::Fvc).await,
        Err(EngineError::DeviceBusy)
    );
    handle.deliver(encode(0xE0, &[60]).freeze()).await.unwrap();
    handle.abort_firmware_update().await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(progress.recv().await.unwrap().status);
    }
    assert_eq!(seen[1], FirmwareUpdateState::InProgress { progress: 60 });
    assert!(matches!(seen[2], FirmwareUpdateState::Error(_)));
}

#[tokio::test]
async fn test_handle_reports_disconnect() {
    let (sink, _outgoing) = ChannelSink::new();
    let (handle, task) = spawn_engine(DeviceEngine::new(EngineConfig::default(), sink));
    handle.shutdown().await;
    task.await.unwrap();

    assert_eq!(
        handle.arm_test(TestType::Vc).await,
        Err(EngineError::Command(CommandError::Disconnected))
    );
    assert_eq!(
        handle.deliver(encode(0x51, &[10]).freeze()).await,
        Err(CommandError::Disconnected)
    );
}

#[test]
fn test_engine_task_on_current_thread_runtime() {
    tokio_test::block_on(async {
        let (sink, _outgoing) = ChannelSink::new();
        let (handle, _task) = spawn_engine(DeviceEngine::new(EngineConfig::default(), sink));
        tokio_test::assert_ok!(handle.deliver(encode(0x51, &[42]).freeze()).await);
        let stats = tokio_test::assert_ok!(handle.stats().await);
        assert_eq!(stats.housekeeping_packets, 1);
        assert_eq!(stats.packets_decoded, 1);
    });
}
