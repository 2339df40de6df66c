// Board controllers
//
// A controller owns no state of its own: it registers handlers, names its
// configuration items and telemetry polls, and acts on the shared
// `BridgeState` the bridge hands it under its lock.

pub mod motion;
pub mod system;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::bus::{FrameBroadcaster, TelemetryBus};
use crate::error::{BridgeError, ProtocolError};
use crate::protocol::{ErrorKind, Packet};
use crate::router::Router;
use crate::safety::SafetyAction;
use crate::store::ParamStore;
use crate::sync::ConfigItem;
use crate::transport::Batch;

pub use motion::{MotionController, MotionState};
pub use system::{SystemController, SystemState};

/// Error counts of one kind, host side and board side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCount {
    pub local: u32,
    pub board: u32,
}

/// Communication errors by kind for the lifetime of the bridge
#[derive(Debug, Clone, Default)]
pub struct ErrorCounters {
    counts: BTreeMap<ErrorKind, ErrorCount>,
}

impl ErrorCounters {
    pub fn record_local(&mut self, kind: ErrorKind) {
        let count = self.counts.entry(kind).or_default();
        count.local = count.local.saturating_add(1);
    }

    /// Board counters are absolute, the latest report wins
    pub fn set_board(&mut self, kind: ErrorKind, count: u32) {
        self.counts.entry(kind).or_default().board = count;
    }

    pub fn get(&self, kind: ErrorKind) -> ErrorCount {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    /// Human-readable listing, one kind per line
    pub fn report(&self) -> String {
        let mut text = String::from("Error list:\n");
        for (kind, count) in &self.counts {
            let _ = writeln!(
                text,
                "Type: {} - PC: {} - PIC: {}",
                kind, count.local, count.board
            );
        }
        text
    }
}

/// State shared by the timer, the packet path and the command path
#[derive(Debug, Default)]
pub struct BridgeState {
    pub system: SystemState,
    pub motion: MotionState,
    pub errors: ErrorCounters,
    /// Packets queued by handlers, sent on the next tick
    pub outbox: Vec<Packet>,
}

/// What a handler or controller hook may touch
pub struct HandlerContext<'a> {
    pub state: &'a mut BridgeState,
    pub store: &'a dyn ParamStore,
    pub bus: &'a dyn TelemetryBus,
}

/// Handler error for a packet whose payload does not match its command
pub fn unexpected(packet: &Packet) -> BridgeError {
    ProtocolError::UnexpectedPayload {
        command: packet.command(),
        found: packet.payload().variant(),
    }
    .into()
}

/// Capabilities a controller brings to the bridge
pub trait Controller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Install the packet handlers of this controller
    fn register(&self, router: &mut Router);

    /// Items synchronized at startup
    fn config_items(&self) -> Vec<ConfigItem>;

    /// Store values written when absent, before synchronization
    fn defaults(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    /// Poll packets for the telemetry someone is listening to
    fn telemetry_requests(&self, state: &BridgeState, bus: &dyn TelemetryBus, batch: &mut Batch);

    /// Safety obligations of this tick; may append packets
    fn check_safety(
        &self,
        _ctx: &mut HandlerContext<'_>,
        _elapsed: Duration,
        _batch: &mut Batch,
    ) -> SafetyAction {
        SafetyAction::Idle
    }

    /// Called after a tick's batch went through
    fn on_tick(&self, _ctx: &mut HandlerContext<'_>, _frames: &dyn FrameBroadcaster, _now: Instant) {}
}
