//! Timestamped packet queues
//!
//! Each connection owns an RX and a TX `PacketQueue` behind its state
//! mutex. The queue itself does no locking.

use super::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Instant;

/// One buffer as it was received or enqueued
#[derive(Debug, Clone)]
pub struct Packet {
    timestamp: Instant,
    data: Bytes,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Packet {
            timestamp: Instant::now(),
            data: data.into(),
        }
    }

    /// When the packet entered its queue
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// FIFO of packets with a running byte total
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
    bytes: usize,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet stamped with the current time
    pub fn push(&mut self, data: impl Into<Bytes>) {
        self.push_packet(Packet::new(data));
    }

    pub fn push_packet(&mut self, packet: Packet) {
        self.bytes += packet.len();
        self.packets.push_back(packet);
    }

    /// Remove the oldest packet
    pub fn pop(&mut self) -> Result<Packet> {
        let packet = self.packets.pop_front().ok_or(Error::QueueEmpty)?;
        self.bytes -= packet.len();
        Ok(packet)
    }

    /// Concatenate every packet in arrival order, emptying the queue
    pub fn compact(&mut self) -> Bytes {
        self.bytes = 0;
        if self.packets.len() == 1 {
            if let Some(packet) = self.packets.pop_front() {
                return packet.into_bytes();
            }
        }

        let total = self.packets.iter().map(Packet::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for packet in self.packets.drain(..) {
            buf.extend_from_slice(&packet.data);
        }
        buf.freeze()
    }

    /// Drop everything; returns the number of packets discarded
    pub fn flush(&mut self) -> usize {
        let dropped = self.packets.len();
        self.packets.clear();
        self.bytes = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Sum of queued packet sizes
    pub fn byte_total(&self) -> usize {
        self.bytes
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }
}
