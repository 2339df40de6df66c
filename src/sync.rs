// Configuration synchronization
//
// Presence in the store decides who is authoritative: a stored value is
// pushed to the board, a missing one is requested and written back to the
// store by the response handler.

use tracing::{info, warn};

use crate::config::KEY_PROCESS_LENGTH;
use crate::error::ConfigError;
use crate::protocol::payload::ProcessName;
use crate::protocol::{Channel, CommandId, Packet, Payload};
use crate::store::{ParamStore, ParamStoreExt};
use crate::transport::Batch;

/// Builds the board payload of an item from the store
pub type Encoder = Box<dyn Fn(&dyn ParamStore) -> Result<Payload, ConfigError> + Send + Sync>;

/// One configuration item shared with the board
pub struct ConfigItem {
    pub key: String,
    pub channel: Channel,
    pub command: CommandId,
    encode: Option<Encoder>,
}

impl ConfigItem {
    pub fn new<F>(key: impl Into<String>, channel: Channel, command: CommandId, encode: F) -> Self
    where
        F: Fn(&dyn ParamStore) -> Result<Payload, ConfigError> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            channel,
            command,
            encode: Some(Box::new(encode)),
        }
    }

    /// Item that is only ever learned from the board; a stored value is used as is
    pub fn pull_only(key: impl Into<String>, channel: Channel, command: CommandId) -> Self {
        Self {
            key: key.into(),
            channel,
            command,
            encode: None,
        }
    }

    pub fn request(&self) -> Packet {
        Packet::request(self.channel, self.command)
    }

    /// Data packet carrying the stored value, `None` for pull-only items
    pub fn data(&self, store: &dyn ParamStore) -> Result<Option<Packet>, ConfigError> {
        match &self.encode {
            Some(encode) => Ok(Some(Packet::data(self.channel, self.command, encode(store)?))),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for ConfigItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigItem")
            .field("key", &self.key)
            .field("channel", &self.channel)
            .field("command", &self.command)
            .field("pushable", &self.encode.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    PushToBoard,
    PullFromBoard,
    /// Stored and never pushed
    Local,
    /// Stored but unreadable; left as it is
    Skipped,
}

/// Packets and per-item decisions of one synchronization
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub batch: Batch,
    pub decisions: Vec<(String, Direction)>,
}

impl SyncPlan {
    pub fn direction(&self, key: &str) -> Option<Direction> {
        self.decisions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, direction)| *direction)
    }
}

/// Decide the direction of every item and build the batch
pub fn plan(items: &[ConfigItem], store: &dyn ParamStore) -> SyncPlan {
    let mut plan = SyncPlan::default();
    for item in items {
        let direction = if store.has(&item.key) {
            match item.data(store) {
                Ok(Some(packet)) => {
                    info!("Sync parameter {}: host -> board", item.key);
                    plan.batch.push(packet);
                    Direction::PushToBoard
                }
                Ok(None) => {
                    info!("Sync parameter {}: load", item.key);
                    Direction::Local
                }
                Err(e) => {
                    warn!("Sync parameter {} skipped: {}", item.key, e);
                    Direction::Skipped
                }
            }
        } else {
            info!("Sync parameter {}: board -> host", item.key);
            plan.batch.push(item.request());
            Direction::PullFromBoard
        };
        plan.decisions.push((item.key.clone(), direction));
    }
    plan
}

/// Data packets for `items`, every one of which must be in the store
pub fn push(items: &[ConfigItem], store: &dyn ParamStore) -> Result<Batch, ConfigError> {
    let mut batch = Batch::new();
    for item in items {
        if let Some(packet) = item.data(store)? {
            batch.push(packet);
        }
    }
    Ok(batch)
}

fn name_packet(index: i16) -> Packet {
    Packet::data(
        Channel::System,
        CommandId::NAME_PROCESS,
        Payload::ProcessName(ProcessName {
            index,
            name: String::new(),
        }),
    )
}

/// First phase of process-name resolution: ask for the count
pub fn process_count_request() -> Packet {
    name_packet(-1)
}

/// Second phase: ask for every name by index
pub fn process_name_requests(length: usize) -> Batch {
    (0..length)
        .filter_map(|i| i16::try_from(i).ok())
        .map(name_packet)
        .collect::<Vec<_>>()
        .into()
}

/// Process names already known to the store, if any
pub fn stored_process_names(store: &dyn ParamStore) -> Result<Option<Vec<String>>, ConfigError> {
    if !store.has(KEY_PROCESS_LENGTH) {
        return Ok(None);
    }
    let length = store.get_i64(KEY_PROCESS_LENGTH)?;
    let names = (0..length.max(0))
        .map(|i| store.get_string(&format!("process/{i}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(names))
}
