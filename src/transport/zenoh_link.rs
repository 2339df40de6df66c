// Zenoh link transport
//
// The serial framing lives in a separate link daemon that owns the port.
// Batches go to it as JSON queries on `<prefix>/link/tx`; the reply holds the
// packets the board answered with. Unsolicited packets and error reports are
// published by the daemon on `<prefix>/link/rx` and `<prefix>/link/error`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zenoh::Wait;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;
use zenoh::Session;

use super::{Ack, Batch, ErrorCallback, PacketCallback, SendPolicy, Transport};
use crate::config::{LINK_ERROR, LINK_RX, LINK_TX};
use crate::error::TransportError;
use crate::protocol::{Channel, CommandId, ErrorKind, Packet};

/// Answer of the link daemon to one batch
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LinkReply {
    #[serde(default)]
    pub packets: Vec<Packet>,
    #[serde(default)]
    pub error: Option<ErrorKind>,
}

/// Error report published by the link daemon
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkErrorReport {
    pub command: CommandId,
    pub kind: ErrorKind,
}

#[derive(Default)]
struct Callbacks {
    packets: RwLock<HashMap<Channel, PacketCallback>>,
    error: RwLock<Option<ErrorCallback>>,
}

impl Callbacks {
    fn deliver(&self, packet: Packet) {
        let callback = self
            .packets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&packet.channel())
            .cloned();
        match callback {
            Some(callback) => callback(packet),
            None => debug!(
                "No callback on channel {}, dropping {}",
                packet.channel(),
                packet.command()
            ),
        }
    }

    fn report(&self, command: CommandId, kind: ErrorKind) {
        let callback = self
            .error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(command, kind);
        }
    }
}

pub struct ZenohLink {
    session: Session,
    tx_key: String,
    callbacks: Arc<Callbacks>,
    // Kept alive for the lifetime of the link
    _rx: Subscriber<()>,
    _errors: Subscriber<()>,
}

impl ZenohLink {
    /// Attach to the link daemon under `prefix`
    pub async fn open(session: &Session, prefix: &str) -> Result<Self, TransportError> {
        let callbacks = Arc::new(Callbacks::default());

        let rx_callbacks = callbacks.clone();
        let rx = session
            .declare_subscriber(format!("{prefix}/{LINK_RX}"))
            .callback(move |sample: Sample| {
                match serde_json::from_slice::<Packet>(&sample.payload().to_bytes()) {
                    Ok(packet) => rx_callbacks.deliver(packet),
                    Err(e) => warn!("Failed to parse board packet: {}", e),
                }
            })
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;

        let error_callbacks = callbacks.clone();
        let errors = session
            .declare_subscriber(format!("{prefix}/{LINK_ERROR}"))
            .callback(move |sample: Sample| {
                match serde_json::from_slice::<LinkErrorReport>(&sample.payload().to_bytes()) {
                    Ok(report) => error_callbacks.report(report.command, report.kind),
                    Err(e) => warn!("Failed to parse link error report: {}", e),
                }
            })
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;

        Ok(Self {
            session: session.clone(),
            tx_key: format!("{prefix}/{LINK_TX}"),
            callbacks,
            _rx: rx,
            _errors: errors,
        })
    }
}

impl Transport for ZenohLink {
    fn send(&self, batch: &Batch, policy: SendPolicy) -> Result<Ack, TransportError> {
        if self.session.is_closed() {
            return Err(TransportError::Closed);
        }
        let request = serde_json::to_vec(batch)?;
        let first = batch.iter().next().map_or(CommandId(0), Packet::command);
        let attempts = policy.retries.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let replies = self
                .session
                .get(self.tx_key.as_str())
                .payload(request.clone())
                .timeout(policy.timeout)
                .wait()
                .map_err(|e| TransportError::Session(e.to_string()))?;

            let reply = match replies.recv() {
                Ok(reply) => reply,
                Err(_) => {
                    debug!("Attempt {}/{}: no reply from link", attempt, attempts);
                    reason = format!("no reply within {:?}", policy.timeout);
                    continue;
                }
            };
            let sample = match reply.result() {
                Ok(sample) => sample,
                Err(_) => {
                    debug!("Attempt {}/{}: link refused the batch", attempt, attempts);
                    reason = "link refused the batch".to_string();
                    continue;
                }
            };

            let answer: LinkReply = serde_json::from_slice(&sample.payload().to_bytes())?;
            if let Some(kind) = answer.error {
                self.callbacks.report(first, kind);
                if kind == ErrorKind::Nack {
                    return Err(TransportError::Link(kind));
                }
                reason = format!("board reported {kind}");
                continue;
            }

            let replies = answer.packets.len();
            for packet in answer.packets {
                self.callbacks.deliver(packet);
            }
            return Ok(Ack {
                attempts: attempt,
                replies,
            });
        }

        Err(TransportError::RetriesExhausted { attempts, reason })
    }

    fn register_callback(&self, channel: Channel, callback: PacketCallback) {
        self.callbacks
            .packets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, callback);
    }

    fn register_error_callback(&self, callback: ErrorCallback) {
        *self
            .callbacks
            .error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn clear_callback(&self, channel: Option<Channel>) {
        let mut packets = self
            .callbacks
            .packets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match channel {
            Some(channel) => {
                packets.remove(&channel);
            }
            None => {
                packets.clear();
                *self
                    .callbacks
                    .error
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = None;
            }
        }
    }
}
