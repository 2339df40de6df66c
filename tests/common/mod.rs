// Scripted board and in-memory bus for bridge scenarios
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use orbus_zenoh_bridge::Bridge;
use orbus_zenoh_bridge::bus::{FrameBroadcaster, TelemetryBus, Topic};
use orbus_zenoh_bridge::error::TransportError;
use orbus_zenoh_bridge::messages::{Telemetry, TransformStamped};
use orbus_zenoh_bridge::protocol::payload::{ProcessName, Service, ServiceCode};
use orbus_zenoh_bridge::protocol::{Channel, CommandId, ErrorKind, Packet, Payload};
use orbus_zenoh_bridge::store::MemoryStore;
use orbus_zenoh_bridge::transport::{Ack, Batch, ErrorCallback, PacketCallback, SendPolicy, Transport};

/// Board behind the link: answers requests from `values`, remembers writes
pub struct MockBoard {
    pub type_board: String,
    pub values: HashMap<CommandId, Payload>,
    pub processes: Vec<String>,
}

impl Default for MockBoard {
    fn default() -> Self {
        Self {
            type_board: "Motor Control".to_string(),
            values: HashMap::new(),
            processes: vec!["control".to_string(), "odometry".to_string()],
        }
    }
}

impl MockBoard {
    fn answer(&mut self, packet: &Packet) -> Option<Packet> {
        let channel = packet.channel();
        let command = packet.command();
        match packet.payload() {
            Payload::Service(service) => {
                let text = match service.code {
                    ServiceCode::Version => "v0.3".to_string(),
                    ServiceCode::Author => "Orbus".to_string(),
                    ServiceCode::NameBoard => "Orbus MC".to_string(),
                    ServiceCode::Date => "Oct 19 2026".to_string(),
                    ServiceCode::TypeBoard => format!("{}\0", self.type_board),
                    ServiceCode::Reset => return None,
                };
                let reply = Service {
                    code: service.code,
                    text,
                };
                Some(Packet::data(channel, command, Payload::Service(reply)))
            }
            Payload::ProcessName(asked) => {
                let reply = if asked.index < 0 {
                    ProcessName {
                        index: self.processes.len() as i16,
                        name: String::new(),
                    }
                } else {
                    ProcessName {
                        index: asked.index,
                        name: self.processes.get(asked.index as usize)?.clone(),
                    }
                };
                Some(Packet::data(channel, command, Payload::ProcessName(reply)))
            }
            _ if packet.is_request() => self
                .values
                .get(&command)
                .map(|payload| Packet::data(channel, command, payload.clone())),
            payload => {
                self.values.insert(command, payload.clone());
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Every attempt times out
    Exhausted,
    /// The board refuses the batch
    Nack,
}

#[derive(Default)]
pub struct MockTransport {
    pub board: Mutex<MockBoard>,
    callbacks: Mutex<HashMap<Channel, PacketCallback>>,
    error_callback: Mutex<Option<ErrorCallback>>,
    sent: Mutex<Vec<Batch>>,
    failure: Mutex<Option<Failure>>,
}

impl MockTransport {
    pub fn fail_with(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Every batch handed to `send`, failed ones included
    pub fn sent(&self) -> Vec<Batch> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_sent(&self) -> Batch {
        self.sent().pop().expect("nothing sent")
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn set_value(&self, command: CommandId, payload: Payload) {
        self.board.lock().unwrap().values.insert(command, payload);
    }
}

impl Transport for MockTransport {
    fn send(&self, batch: &Batch, policy: SendPolicy) -> Result<Ack, TransportError> {
        self.sent.lock().unwrap().push(batch.clone());

        match *self.failure.lock().unwrap() {
            Some(Failure::Exhausted) => {
                return Err(TransportError::RetriesExhausted {
                    attempts: policy.retries,
                    reason: "no reply".to_string(),
                });
            }
            Some(Failure::Nack) => {
                let callback = self.error_callback.lock().unwrap().clone();
                let first = batch.iter().next().map_or(CommandId(0), Packet::command);
                if let Some(callback) = callback {
                    callback(first, ErrorKind::Nack);
                }
                return Err(TransportError::Link(ErrorKind::Nack));
            }
            None => {}
        }

        let replies: Vec<Packet> = {
            let mut board = self.board.lock().unwrap();
            batch.iter().filter_map(|packet| board.answer(packet)).collect()
        };
        let count = replies.len();
        for packet in replies {
            let callback = self.callbacks.lock().unwrap().get(&packet.channel()).cloned();
            if let Some(callback) = callback {
                callback(packet);
            }
        }
        Ok(Ack {
            attempts: 1,
            replies: count,
        })
    }

    fn register_callback(&self, channel: Channel, callback: PacketCallback) {
        self.callbacks.lock().unwrap().insert(channel, callback);
    }

    fn register_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock().unwrap() = Some(callback);
    }

    fn clear_callback(&self, channel: Option<Channel>) {
        match channel {
            Some(channel) => {
                self.callbacks.lock().unwrap().remove(&channel);
            }
            None => {
                self.callbacks.lock().unwrap().clear();
                *self.error_callback.lock().unwrap() = None;
            }
        }
    }
}

#[derive(Default)]
pub struct MockBus {
    subscribers: Mutex<HashSet<Topic>>,
    source_active: AtomicBool,
    published: Mutex<Vec<(Topic, Telemetry)>>,
}

impl MockBus {
    pub fn subscribe(&self, topic: Topic) {
        self.subscribers.lock().unwrap().insert(topic);
    }

    pub fn set_source_active(&self, active: bool) {
        self.source_active.store(active, Ordering::SeqCst);
    }

    pub fn published(&self, topic: Topic) -> Vec<Telemetry> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl TelemetryBus for MockBus {
    fn has_subscribers(&self, topic: Topic) -> bool {
        self.subscribers.lock().unwrap().contains(&topic)
    }

    fn command_source_active(&self) -> bool {
        self.source_active.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: Topic, message: &Telemetry) {
        self.published.lock().unwrap().push((topic, message.clone()));
    }
}

#[derive(Default)]
pub struct MockFrames {
    transforms: Mutex<Vec<TransformStamped>>,
}

impl MockFrames {
    pub fn transforms(&self) -> Vec<TransformStamped> {
        self.transforms.lock().unwrap().clone()
    }
}

impl FrameBroadcaster for MockFrames {
    fn send_transform(&self, transform: &TransformStamped) {
        self.transforms.lock().unwrap().push(transform.clone());
    }
}

pub struct Harness {
    pub bridge: Bridge,
    pub transport: Arc<MockTransport>,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<MockBus>,
    pub frames: Arc<MockFrames>,
}

impl Harness {
    pub fn new(parameters: Value) -> Self {
        let transport = Arc::new(MockTransport::default());
        let store = Arc::new(MemoryStore::from_json(&parameters));
        let bus = Arc::new(MockBus::default());
        let frames = Arc::new(MockFrames::default());
        let bridge = Bridge::new(transport.clone(), store.clone(), bus.clone(), frames.clone());
        Self {
            bridge,
            transport,
            store,
            bus,
            frames,
        }
    }
}

/// Drive geometry of the reference robot
pub fn geometry() -> Value {
    serde_json::json!({
        "structure": {
            "wheelbase": 0.5,
            "radius": { "left": 0.1, "right": 0.1 }
        }
    })
}

/// Payloads of every packet with `command` across `batches`
pub fn payloads(batches: &[Batch], command: CommandId) -> Vec<Payload> {
    batches
        .iter()
        .flat_map(|batch| batch.iter())
        .filter(|packet| packet.command() == command)
        .map(|packet| packet.payload().clone())
        .collect()
}
