// Zenoh telemetry bus
//
// One publisher per topic under `<prefix>/`. Subscriber presence comes from
// zenoh matching status, so the bridge polls the board only for telemetry
// somebody is listening to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use zenoh::Session;
use zenoh::Wait;
use zenoh::matching::MatchingStatus;
use zenoh::pubsub::Publisher;

use super::{CommandClock, FrameBroadcaster, TelemetryBus, Topic};
use crate::messages::{Telemetry, TransformStamped};

pub struct ZenohBus {
    publishers: HashMap<Topic, Publisher<'static>>,
    clock: Arc<CommandClock>,
}

impl ZenohBus {
    pub async fn open(session: &Session, prefix: &str, source_timeout: Duration) -> zenoh::Result<Self> {
        let mut publishers = HashMap::new();
        for topic in Topic::ALL {
            let key = format!("{prefix}/{}", topic.key());
            let publisher = session.declare_publisher(key.clone()).await?;
            debug!("Publishing {:?} on {}", topic, key);
            publishers.insert(topic, publisher);
        }
        Ok(Self {
            publishers,
            clock: Arc::new(CommandClock::new(source_timeout)),
        })
    }

    /// Call `callback` whenever a topic gains its first subscriber
    pub async fn on_connect<F>(&self, callback: F) -> zenoh::Result<()>
    where
        F: Fn(Topic) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        for (&topic, publisher) in &self.publishers {
            let callback = callback.clone();
            publisher
                .matching_listener()
                .callback(move |status: MatchingStatus| {
                    if status.matching() {
                        callback(topic);
                    }
                })
                .background()
                .await?;
        }
        Ok(())
    }

    /// Liveness of the velocity command source, touched by the `cmd_vel` subscriber
    pub fn command_clock(&self) -> Arc<CommandClock> {
        self.clock.clone()
    }
}

impl TelemetryBus for ZenohBus {
    fn has_subscribers(&self, topic: Topic) -> bool {
        let Some(publisher) = self.publishers.get(&topic) else {
            return false;
        };
        match publisher.matching_status().wait() {
            Ok(status) => status.matching(),
            Err(e) => {
                warn!("Matching status of {:?} unavailable: {}", topic, e);
                false
            }
        }
    }

    fn command_source_active(&self) -> bool {
        self.clock.is_live()
    }

    fn publish(&self, topic: Topic, message: &Telemetry) {
        let Some(publisher) = self.publishers.get(&topic) else {
            return;
        };
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {:?}: {}", topic, e);
                return;
            }
        };
        if let Err(e) = publisher.put(payload).wait() {
            warn!("Failed to publish {:?}: {}", topic, e);
        }
    }
}

impl FrameBroadcaster for ZenohBus {
    fn send_transform(&self, transform: &TransformStamped) {
        self.publish(Topic::Tf, &Telemetry::Transform(transform.clone()));
    }
}
