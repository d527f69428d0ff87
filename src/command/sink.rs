//! Outbound command sinks.
//!
//! The engine never talks to the BLE stack directly; it hands encoded
//! command bytes to a [`CommandSink`]. [`ChannelSink`] forwards them to a
//! transport task, [`MockCommandSink`] records them for tests and replays.

use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Destination for encoded command packets.
pub trait CommandSink {
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<S: CommandSink + ?Sized> CommandSink for Box<S> {
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_command(bytes)
    }
}

/// Forwards commands to the task that owns the transport.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl CommandSink for ChannelSink {
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transport task stopped"))
    }
}

/// Sink that records every written command.
///
/// Clones share their buffers, so a test keeps one clone and hands the other
/// to the engine.
#[derive(Debug, Clone, Default)]
pub struct MockCommandSink {
    written: Arc<Mutex<Vec<Bytes>>>,
    next_error: Arc<Mutex<Option<io::Error>>>,
}

impl MockCommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands written so far, oldest first.
    pub fn written(&self) -> Vec<Bytes> {
        lock(&self.written).clone()
    }

    pub fn clear(&self) {
        lock(&self.written).clear();
    }

    /// Makes the next write fail with `error`.
    pub fn set_next_error(&self, error: io::Error) {
        *lock(&self.next_error) = Some(error);
    }
}

impl CommandSink for MockCommandSink {
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(error) = lock(&self.next_error).take() {
            return Err(error);
        }
        lock(&self.written).push(Bytes::copy_from_slice(bytes));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
