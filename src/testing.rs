// In-memory bus doubles for unit tests

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bus::{FrameBroadcaster, TelemetryBus, Topic};
use crate::messages::{Telemetry, TransformStamped};

/// Bus with no consumers and no command source
pub struct NullBus;

impl TelemetryBus for NullBus {
    fn has_subscribers(&self, _topic: Topic) -> bool {
        false
    }

    fn command_source_active(&self) -> bool {
        false
    }

    fn publish(&self, _topic: Topic, _message: &Telemetry) {}
}

#[derive(Default)]
pub struct RecordingBus {
    subscribers: Mutex<HashSet<Topic>>,
    source_active: AtomicBool,
    published: Mutex<Vec<(Topic, Telemetry)>>,
}

impl RecordingBus {
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

impl TelemetryBus for RecordingBus {
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
pub struct RecordingFrames {
    transforms: Mutex<Vec<TransformStamped>>,
}

impl RecordingFrames {
    pub fn transforms(&self) -> Vec<TransformStamped> {
        self.transforms.lock().unwrap().clone()
    }
}

impl FrameBroadcaster for RecordingFrames {
    fn send_transform(&self, transform: &TransformStamped) {
        self.transforms.lock().unwrap().push(transform.clone());
    }
}
