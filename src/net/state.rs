//! Connection phase and status flags
//!
//! One primary `Phase` holds at a time. The HTTP stage, the closing side
//! and the error/encryption/packet flags are independent facts layered on
//! top of it.

use std::fmt;

/// Primary lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Standby,
    Connecting,
    Connected,
    Disconnecting,
}

/// Sub-stage of an HTTP exchange, valid while `Connected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStage {
    SendingRequest,
    AwaitingReply,
    Downloading,
}

/// Side that closed the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Server,
    Client,
}

/// Snapshot of a connection's status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    phase: Phase,
    initialising: bool,
    http: Option<HttpStage>,
    closed_by: Option<ClosedBy>,
    encrypted: bool,
    event_error: bool,
    packet_received: bool,
}

impl ConnectionState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_standby(&self) -> bool {
        self.phase == Phase::Standby
    }

    /// A run has been requested but the worker has not started connecting
    pub fn is_initialising(&self) -> bool {
        self.initialising
    }

    pub fn http_stage(&self) -> Option<HttpStage> {
        self.http
    }

    pub fn closed_by(&self) -> Option<ClosedBy> {
        self.closed_by
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn has_event_error(&self) -> bool {
        self.event_error
    }

    pub fn packet_received(&self) -> bool {
        self.packet_received
    }

    /// Reset per-run flags; only valid from `Standby`
    pub(crate) fn begin_run(&mut self) -> bool {
        if self.phase != Phase::Standby {
            return false;
        }
        *self = ConnectionState {
            initialising: true,
            ..ConnectionState::default()
        };
        true
    }

    pub(crate) fn enter_connecting(&mut self) -> bool {
        if self.phase != Phase::Standby || !self.initialising {
            return false;
        }
        self.phase = Phase::Connecting;
        self.initialising = false;
        true
    }

    pub(crate) fn enter_connected(&mut self) -> bool {
        if self.phase != Phase::Connecting {
            return false;
        }
        self.phase = Phase::Connected;
        true
    }

    pub(crate) fn set_http_stage(&mut self, stage: HttpStage) -> bool {
        if self.phase != Phase::Connected {
            return false;
        }
        self.http = Some(stage);
        true
    }

    pub(crate) fn set_encrypted(&mut self) {
        self.encrypted = true;
    }

    pub(crate) fn set_event_error(&mut self) {
        self.event_error = true;
    }

    pub(crate) fn set_packet_received(&mut self, received: bool) {
        self.packet_received = received;
    }

    /// Record the closing side; the first caller wins
    pub(crate) fn mark_closed(&mut self, by: ClosedBy) -> bool {
        if self.closed_by.is_some() {
            return false;
        }
        self.closed_by = Some(by);
        true
    }

    /// Move to `Disconnecting` unless already there or idle
    pub(crate) fn begin_disconnect(&mut self) -> bool {
        match self.phase {
            Phase::Standby if !self.initialising => false,
            Phase::Disconnecting => false,
            _ => {
                self.phase = Phase::Disconnecting;
                self.initialising = false;
                true
            }
        }
    }

    pub(crate) fn enter_standby(&mut self) {
        self.phase = Phase::Standby;
        self.initialising = false;
        self.http = None;
    }
}

/// Status notification emitted on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    SendingRequest,
    AwaitingReply,
    Downloading,
    ClosedByServer,
    ClosedByClient,
    Disconnecting,
    Standby,
    PacketAvailable,
}

impl From<HttpStage> for ConnectionEvent {
    fn from(stage: HttpStage) -> Self {
        match stage {
            HttpStage::SendingRequest => ConnectionEvent::SendingRequest,
            HttpStage::AwaitingReply => ConnectionEvent::AwaitingReply,
            HttpStage::Downloading => ConnectionEvent::Downloading,
        }
    }
}

impl From<ClosedBy> for ConnectionEvent {
    fn from(by: ClosedBy) -> Self {
        match by {
            ClosedBy::Server => ConnectionEvent::ClosedByServer,
            ClosedBy::Client => ConnectionEvent::ClosedByClient,
        }
    }
}

/// Final outcome of one connection run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The run finished normally
    Completed,
    /// A failure ended the run; see `Connection::last_error`
    Rejected,
    /// The caller cancelled before the run could finish
    Aborted,
    /// The peer closed before the run could finish
    ClosedByPeer,
}

impl StopReason {
    pub fn code(&self) -> i32 {
        match self {
            StopReason::Completed => 0,
            StopReason::Rejected => 1,
            StopReason::Aborted => 2,
            StopReason::ClosedByPeer => 3,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Completed => "completed",
            StopReason::Rejected => "rejected",
            StopReason::Aborted => "aborted",
            StopReason::ClosedByPeer => "closed by peer",
        };
        f.write_str(s)
    }
}
