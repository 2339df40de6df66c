// Link to the board
//
// The bridge sees the link only through `Transport`: batches go out with a
// retry policy, packets come back through per-channel callbacks.

pub mod zenoh_link;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::protocol::{Channel, CommandId, ErrorKind, Packet};

pub use zenoh_link::ZenohLink;

/// Called for every packet the board sends on a channel
pub type PacketCallback = Arc<dyn Fn(Packet) + Send + Sync>;

/// Called for every error the link or the board reports
pub type ErrorCallback = Arc<dyn Fn(CommandId, ErrorKind) + Send + Sync>;

/// Retry discipline for one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    pub retries: u8,
    pub timeout: Duration,
}

impl SendPolicy {
    /// Longest a caller can be blocked by one send
    pub fn worst_case(&self) -> Duration {
        self.timeout * u32::from(self.retries)
    }
}

/// Successful delivery of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Attempt that got through (1-based)
    pub attempts: u8,
    /// Packets the board answered with, already delivered to callbacks
    pub replies: usize,
}

/// Ordered packets sent as one unit with one outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    packets: Vec<Packet>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.packets.iter()
    }

    /// Command ids in submission order
    pub fn commands(&self) -> Vec<CommandId> {
        self.packets.iter().map(Packet::command).collect()
    }
}

impl From<Vec<Packet>> for Batch {
    fn from(packets: Vec<Packet>) -> Self {
        Self { packets }
    }
}

impl From<Packet> for Batch {
    fn from(packet: Packet) -> Self {
        Self {
            packets: vec![packet],
        }
    }
}

impl Extend<Packet> for Batch {
    fn extend<I: IntoIterator<Item = Packet>>(&mut self, iter: I) {
        self.packets.extend(iter);
    }
}

impl IntoIterator for Batch {
    type Item = Packet;
    type IntoIter = std::vec::IntoIter<Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Packet;
    type IntoIter = std::slice::Iter<'a, Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.iter()
    }
}

/// Send/receive contract of the board link
pub trait Transport: Send + Sync {
    /// Deliver `batch` in order as one unit. Blocks for at most
    /// `policy.worst_case()`. Answers from the board are handed to the
    /// registered callbacks before this returns.
    fn send(&self, batch: &Batch, policy: SendPolicy) -> Result<Ack, TransportError>;

    /// Route packets arriving on `channel` to `callback`, replacing any previous one
    fn register_callback(&self, channel: Channel, callback: PacketCallback);

    fn register_error_callback(&self, callback: ErrorCallback);

    /// Drop the callback of `channel`, or every callback when `None`
    fn clear_callback(&self, channel: Option<Channel>);
}
