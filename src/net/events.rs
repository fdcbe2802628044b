//! Event dispatch
//!
//! Connections report every status transition and their final stop reason
//! through an `EventSink`. Sinks are called from worker threads without any
//! connection lock held.

use super::state::{ConnectionEvent, StopReason};
use std::sync::mpsc;

/// Receiver of connection notifications
pub trait EventSink: Send + Sync {
    fn emit(&self, id: u64, event: ConnectionEvent);

    /// Called exactly once per connection run
    fn stopped(&self, id: u64, reason: StopReason);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _id: u64, _event: ConnectionEvent) {}

    fn stopped(&self, _id: u64, _reason: StopReason) {}
}

/// Message forwarded by `ChannelSink`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Event { id: u64, event: ConnectionEvent },
    Stopped { id: u64, reason: StopReason },
}

/// Forwards notifications over a channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, id: u64, event: ConnectionEvent) {
        // A dropped receiver only means nobody is listening
        let _ = self.tx.send(Notification::Event { id, event });
    }

    fn stopped(&self, id: u64, reason: StopReason) {
        let _ = self.tx.send(Notification::Stopped { id, reason });
    }
}
