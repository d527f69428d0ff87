//! # Async Connection Driver
//!
//! Runs one [`DeviceEngine`] on a tokio task. The transport pushes packet
//! bytes into the task, callers talk to it through a cloneable
//! [`EngineHandle`], and a single `sleep_until` on the engine's next
//! deadline drives every timeout. The engine itself stays single-threaded
//! and lock-free; the task is its only owner.
//!
//! ```rust,no_run
//! use spirolink_rs::command::{ChannelSink, DeviceCommand};
//! use spirolink_rs::config::EngineConfig;
//! use spirolink_rs::connection::spawn_engine;
//! use spirolink_rs::device_engine::DeviceEngine;
//! use spirolink_rs::session::types::TestType;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, mut outgoing) = ChannelSink::new();
//! let (handle, _task) = spawn_engine(DeviceEngine::new(EngineConfig::default(), sink));
//!
//! let mut results = handle.subscribe_to_results();
//! handle.arm_test(TestType::Fvc).await?;
//! // the BLE layer forwards notifications with handle.deliver(bytes)
//! // and writes everything received on `outgoing` to the device
//! let outcome = results.recv().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

use crate::command::{CommandOutcome, CommandSink, DeviceCommand};
use crate::device_engine::{DeviceEngine, TestOutcome};
use crate::error::{CommandError, EngineError};
use crate::firmware::FirmwareProgress;
use crate::packet::payload::Housekeeping;
use crate::session::machine::RealtimeEvent;
use crate::session::types::{SessionStateSnapshot, TestType};
use crate::stats::EngineStats;
use bytes::Bytes;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

const PACKET_QUEUE_DEPTH: usize = 256;
const REQUEST_QUEUE_DEPTH: usize = 32;
const EVENT_CAPACITY: usize = 1_024;

type Reply<T> = oneshot::Sender<T>;

enum Request {
    Arm(TestType, Reply<Result<(), EngineError>>),
    AbortTest(Reply<()>),
    BeginFirmwareUpdate(Reply<Result<(), EngineError>>),
    AbortFirmwareUpdate(Reply<()>),
    Command(DeviceCommand, Reply<Result<CommandOutcome, EngineError>>),
    SessionState(Reply<SessionStateSnapshot>),
    Stats(Reply<EngineStats>),
    Shutdown,
}

/// Cloneable handle to an engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    packets: mpsc::Sender<Bytes>,
    requests: mpsc::Sender<Request>,
    results: broadcast::Sender<TestOutcome>,
    firmware: broadcast::Sender<FirmwareProgress>,
    commands: broadcast::Sender<CommandOutcome>,
    housekeeping: broadcast::Sender<Housekeeping>,
    realtime: broadcast::Sender<RealtimeEvent>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Request::Arm(..) => "Arm",
            Request::AbortTest(_) => "AbortTest",
            Request::BeginFirmwareUpdate(_) => "BeginFirmwareUpdate",
            Request::AbortFirmwareUpdate(_) => "AbortFirmwareUpdate",
            Request::Command(..) => "Command",
            Request::SessionState(_) => "SessionState",
            Request::Stats(_) => "Stats",
            Request::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Moves `engine` onto a new task. The task ends when every handle is
/// dropped, the packet channel closes or [`EngineHandle::shutdown`] is
/// called, and returns the engine.
pub fn spawn_engine<S>(mut engine: DeviceEngine<S>) -> (EngineHandle, JoinHandle<DeviceEngine<S>>)
where
    S: CommandSink + Send + 'static,
{
    let (packets_tx, packets_rx) = mpsc::channel(PACKET_QUEUE_DEPTH);
    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let handle = EngineHandle {
        packets: packets_tx,
        requests: requests_tx,
        results: broadcast::channel(EVENT_CAPACITY).0,
        firmware: broadcast::channel(EVENT_CAPACITY).0,
        commands: broadcast::channel(EVENT_CAPACITY).0,
        housekeeping: broadcast::channel(EVENT_CAPACITY).0,
        realtime: broadcast::channel(EVENT_CAPACITY).0,
    };

    let results = handle.results.clone();
    engine.subscribe_to_results(move |outcome| {
        let _ = results.send(outcome.clone());
    });
    let firmware = handle.firmware.clone();
    engine.subscribe_to_firmware_progress(move |progress| {
        let _ = firmware.send(progress.clone());
    });
    let housekeeping = handle.housekeeping.clone();
    engine.subscribe_to_housekeeping(move |info| {
        let _ = housekeeping.send(info.clone());
    });
    let realtime = handle.realtime.clone();
    engine.subscribe_to_realtime(move |event| {
        let _ = realtime.send(event.clone());
    });
    let commands = handle.commands.clone();
    engine.subscribe_to_command_outcomes(move |outcome| {
        let _ = commands.send(outcome.clone());
        let _ = outcome_tx.send(outcome.clone());
    });

    let task = tokio::spawn(run(engine, packets_rx, requests_rx, outcome_rx));
    (handle, task)
}

async fn run<S: CommandSink>(
    mut engine: DeviceEngine<S>,
    mut packets: mpsc::Receiver<Bytes>,
    mut requests: mpsc::Receiver<Request>,
    mut outcomes: mpsc::UnboundedReceiver<CommandOutcome>,
) -> DeviceEngine<S> {
    let mut waiting: Option<Reply<Result<CommandOutcome, EngineError>>> = None;
    log::debug!("Engine task started");

    loop {
        let deadline = engine.next_deadline();
        // packets queued before a request are handled first
        tokio::select! {
            biased;
            packet = packets.recv() => match packet {
                // decode errors are counted and logged by the engine
                Some(bytes) => { let _ = engine.on_packet_bytes(&bytes); }
                None => break,
            },
            request = requests.recv() => match request {
                Some(Request::Shutdown) | None => break,
                Some(request) => handle_request(&mut engine, request, &mut waiting),
            },
            _ = sleep_until(deadline) => engine.poll_timers(Instant::now()),
        }

        while let Ok(outcome) = outcomes.try_recv() {
            if let Some(reply) = waiting.take() {
                let result = if outcome.is_success() {
                    Ok(outcome)
                } else {
                    Err(CommandError::TimedOut {
                        command: outcome.command,
                    }
                    .into())
                };
                let _ = reply.send(result);
            }
        }
    }

    if let Some(reply) = waiting.take() {
        let _ = reply.send(Err(CommandError::Disconnected.into()));
    }
    log::debug!("Engine task stopped");
    engine
}

fn handle_request<S: CommandSink>(
    engine: &mut DeviceEngine<S>,
    request: Request,
    waiting: &mut Option<Reply<Result<CommandOutcome, EngineError>>>,
) {
    match request {
        Request::Arm(test_type, reply) => {
            let _ = reply.send(engine.arm_test(test_type));
        }
        Request::AbortTest(reply) => {
            engine.abort_test();
            let _ = reply.send(());
        }
        Request::BeginFirmwareUpdate(reply) => {
            let _ = reply.send(engine.begin_firmware_update());
        }
        Request::AbortFirmwareUpdate(reply) => {
            engine.abort_firmware_update();
            let _ = reply.send(());
        }
        Request::Command(command, reply) => match engine.send_command(&command) {
            Ok(_) => *waiting = Some(reply),
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        },
        Request::SessionState(reply) => {
            let _ = reply.send(engine.current_session_state());
        }
        Request::Stats(reply) => {
            let _ = reply.send(engine.stats());
        }
        Request::Shutdown => {}
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl EngineHandle {
    /// Hands one received packet to the engine.
    pub async fn deliver(&self, bytes: impl Into<Bytes>) -> Result<(), CommandError> {
        self.packets
            .send(bytes.into())
            .await
            .map_err(|_| CommandError::Disconnected)
    }

    pub async fn arm_test(&self, test_type: TestType) -> Result<(), EngineError> {
        self.request(|reply| Request::Arm(test_type, reply)).await?
    }

    pub async fn abort_test(&self) -> Result<(), EngineError> {
        self.request(Request::AbortTest).await
    }

    pub async fn begin_firmware_update(&self) -> Result<(), EngineError> {
        self.request(Request::BeginFirmwareUpdate).await?
    }

    pub async fn abort_firmware_update(&self) -> Result<(), EngineError> {
        self.request(Request::AbortFirmwareUpdate).await
    }

    /// Sends a command and resolves once the device answered or the command
    /// timed out.
    pub async fn send_command(
        &self,
        command: DeviceCommand,
    ) -> Result<CommandOutcome, EngineError> {
        self.request(|reply| Request::Command(command, reply)).await?
    }

    pub async fn session_state(&self) -> Result<SessionStateSnapshot, EngineError> {
        self.request(Request::SessionState).await
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        self.request(Request::Stats).await
    }

    /// Stops the engine task.
    pub async fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown).await;
    }

    pub fn subscribe_to_results(&self) -> broadcast::Receiver<TestOutcome> {
        self.results.subscribe()
    }

    pub fn subscribe_to_firmware_progress(&self) -> broadcast::Receiver<FirmwareProgress> {
        self.firmware.subscribe()
    }

    pub fn subscribe_to_command_outcomes(&self) -> broadcast::Receiver<CommandOutcome> {
        self.commands.subscribe()
    }

    pub fn subscribe_to_housekeeping(&self) -> broadcast::Receiver<Housekeeping> {
        self.housekeeping.subscribe()
    }

    pub fn subscribe_to_realtime(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.realtime.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| CommandError::Disconnected)?;
        rx.await.map_err(|_| CommandError::Disconnected.into())
    }
}
