// Bridge between the host bus and the motor board
//
// `Bridge` is a cheap handle around the shared state. Three contexts call
// into it: the heartbeat tick, the transport's packet callbacks and the
// command/service entry points. All of them serialize on one state lock,
// which is never held across `Transport::send` since replies re-enter
// through the packet callbacks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::bus::{FrameBroadcaster, TelemetryBus};
use crate::config::{
    DEFAULT_TIMER_RATE_HZ, KEY_TIMER_RATE, KEY_TYPE_BOARD, MOTION_BOARD_TYPE, SEND_POLICY,
};
use crate::controller::system::{self, BoardIdentity};
use crate::controller::{
    BridgeState, Controller, ErrorCounters, HandlerContext, MotionController, SystemController,
};
use crate::error::{BridgeError, Result, TransportError};
use crate::messages::{EnableCommand, PoseCommand, VelocityCommand};
use crate::protocol::payload::Coordinate;
use crate::protocol::{Channel, CommandId, ControlState, ErrorKind, Packet};
use crate::router::Router;
use crate::safety::{ActuatorStatus, SafetyAction};
use crate::scheduler::TimerHandle;
use crate::store::{ParamStore, ParamStoreExt};
use crate::sync::{self, ConfigItem, SyncPlan};
use crate::transport::{Ack, Batch, Transport};

const SERVICE_HELP: &str = "HELP, commands: \nversion\ntype\nserial_info\nhelp";

/// What one heartbeat tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Batch of this many packets went through
    Sent(usize),
    /// Batch failed; counted and retried on the next tick
    Failed,
    /// Nothing to send but the watchdog is still running
    Waiting,
    /// Nothing to do; the timer was stopped
    Idle,
}

struct Shared {
    state: Mutex<BridgeState>,
    router: RwLock<Router>,
    system: SystemController,
    motion: MotionController,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ParamStore>,
    bus: Arc<dyn TelemetryBus>,
    frames: Arc<dyn FrameBroadcaster>,
    timer: Arc<TimerHandle>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.transport.clear_callback(None);
        self.router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear(None);
        debug!("Bridge handlers cleared");
    }
}

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Shared>,
}

impl Bridge {
    /// Wire the controllers to `transport`. Does no I/O; see [`Bridge::start`].
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ParamStore>,
        bus: Arc<dyn TelemetryBus>,
        frames: Arc<dyn FrameBroadcaster>,
    ) -> Self {
        let system = SystemController;
        let motion = MotionController;
        let mut router = Router::new();
        system.register(&mut router);
        motion.register(&mut router);
        debug!("{} packet handlers registered", router.len());

        let period = period_from_rate(DEFAULT_TIMER_RATE_HZ).unwrap_or(Duration::from_secs(1));
        let inner = Arc::new(Shared {
            state: Mutex::new(BridgeState::default()),
            router: RwLock::new(router),
            system,
            motion,
            transport,
            store,
            bus,
            frames,
            timer: Arc::new(TimerHandle::new(period)),
        });

        for channel in Channel::ALL {
            let weak: Weak<Shared> = Arc::downgrade(&inner);
            inner.transport.register_callback(
                channel,
                Arc::new(move |packet: Packet| {
                    if let Some(inner) = weak.upgrade() {
                        Bridge { inner }.on_packet(packet);
                    }
                }),
            );
        }
        let weak = Arc::downgrade(&inner);
        inner
            .transport
            .register_error_callback(Arc::new(move |command: CommandId, kind: ErrorKind| {
                if let Some(inner) = weak.upgrade() {
                    warn!("Link error {} on command {}", kind, command);
                    Bridge { inner }.lock().errors.record_local(kind);
                }
            }));

        let bridge = Self { inner };
        bridge.refresh_period();
        bridge
    }

    /// Identify the board, synchronize configuration and start the heartbeat
    pub fn start(&self) -> Result<BoardIdentity> {
        let identity = self.identify()?;
        if identity.type_board != MOTION_BOARD_TYPE {
            return Err(BridgeError::UnsupportedBoard {
                found: identity.type_board,
                expected: MOTION_BOARD_TYPE.to_string(),
            });
        }
        info!(
            "Connected to {} {} ({})",
            identity.name_board, identity.version, identity.type_board
        );
        self.synchronize();
        self.refresh_period();
        self.inner.timer.start();
        Ok(identity)
    }

    /// Ask the board for its identity strings
    pub fn identify(&self) -> Result<BoardIdentity> {
        self.send(&system::identity_requests())?;
        let identity = self.lock().system.identity.clone();
        self.inner
            .store
            .set(KEY_TYPE_BOARD, identity.type_board.clone().into())?;
        Ok(identity)
    }

    /// Write missing defaults, resolve process names, then push or pull
    /// every configuration item in one batch. A failed batch is logged.
    pub fn synchronize(&self) -> SyncPlan {
        let store = &*self.inner.store;
        for controller in self.controllers() {
            for (key, value) in controller.defaults() {
                match store.set_default(key, value) {
                    Ok(true) => debug!("{}: default for {}", controller.name(), key),
                    Ok(false) => {}
                    Err(e) => warn!("Default for {} not written: {}", key, e),
                }
            }
        }

        self.resolve_process_names();

        let items: Vec<ConfigItem> = self
            .controllers()
            .iter()
            .flat_map(|controller| {
                let items = controller.config_items();
                debug!("{}: {} configuration items", controller.name(), items.len());
                items
            })
            .collect();
        let plan = sync::plan(&items, store);
        if !plan.batch.is_empty() {
            match self.send(&plan.batch) {
                Ok(ack) => info!(
                    "Synchronized {} items ({} replies)",
                    items.len(),
                    ack.replies
                ),
                Err(e) => warn!("Synchronization failed: {}", e),
            }
        }
        plan
    }

    fn resolve_process_names(&self) {
        match sync::stored_process_names(&*self.inner.store) {
            Ok(Some(names)) => {
                debug!("Process names from store: {:?}", names);
                self.lock().system.process_names = names;
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Stored process names unusable: {}", e),
        }

        self.lock().system.awaiting_count = true;
        let counted = self.send(&Batch::from(sync::process_count_request()));
        let length = {
            let mut state = self.lock();
            state.system.awaiting_count = false;
            state.system.process_names.len()
        };
        match counted {
            Ok(_) if length > 0 => {
                if let Err(e) = self.send(&sync::process_name_requests(length)) {
                    warn!("Process names not resolved: {}", e);
                }
            }
            Ok(_) => debug!("Board reports no processes"),
            Err(e) => warn!("Process count not resolved: {}", e),
        }
    }

    /// One heartbeat: poll wanted telemetry, run the safety check, drain
    /// the handler outbox. Stops the timer when there is nothing to do.
    pub fn tick(&self, elapsed: Duration) -> TickOutcome {
        self.refresh_period();
        let inner = &*self.inner;
        let now = Instant::now();

        let (batch, queued) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let queued = std::mem::take(&mut state.outbox);
            let mut batch = Batch::from(queued.clone());
            for controller in self.controllers() {
                controller.telemetry_requests(state, &*inner.bus, &mut batch);
            }

            let mut ctx = self.context(state);
            let mut outstanding = false;
            for controller in self.controllers() {
                let action = controller.check_safety(&mut ctx, elapsed, &mut batch);
                if action == SafetyAction::EmergencyStop {
                    error!("{} watchdog expired, emergency stop", controller.name());
                }
                outstanding |= action.is_outstanding();
            }

            if batch.is_empty() {
                if !outstanding {
                    inner.timer.stop();
                    return TickOutcome::Idle;
                }
                return TickOutcome::Waiting;
            }
            (batch, queued)
        };

        match self.send(&batch) {
            Ok(_) => {
                let mut guard = self.lock();
                let mut ctx = self.context(&mut guard);
                for controller in self.controllers() {
                    controller.on_tick(&mut ctx, &*inner.frames, now);
                }
                TickOutcome::Sent(batch.len())
            }
            Err(e) => {
                warn!("Heartbeat batch failed: {}", e);
                // Handler packets go out again on the next tick, ahead of newer ones
                let mut state = self.lock();
                let newer = std::mem::replace(&mut state.outbox, queued);
                state.outbox.extend(newer);
                TickOutcome::Failed
            }
        }
    }

    fn on_packet(&self, packet: Packet) {
        let mut guard = self.lock();
        let router = self
            .inner
            .router
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut ctx = self.context(&mut guard);
        if let Err(e) = router.dispatch(&mut ctx, &packet) {
            warn!(
                "Dropped {} on {} channel: {}",
                packet.command(),
                packet.channel(),
                e
            );
        }
        if !guard.outbox.is_empty() {
            self.inner.timer.start();
        }
    }

    /// A consumer appeared on the bus
    pub fn wake(&self) {
        let _state = self.lock();
        self.inner.timer.start();
    }

    /// Drive both wheels from a body velocity. On a failed send the
    /// actuator status is rolled back so the next command enables again.
    pub fn velocity_command(&self, command: &VelocityCommand) -> Result<()> {
        let (batch, previous) = {
            let mut state = self.lock();
            let previous = state.motion.status;
            let batch =
                self.inner
                    .motion
                    .velocity_command(&mut state.motion, &*self.inner.store, command)?;
            self.inner.timer.start();
            (batch, previous)
        };

        if let Err(e) = self.send(&batch) {
            let mut state = self.lock();
            if !previous.all(ControlState::Velocity) && state.motion.status.all(ControlState::Velocity) {
                state.motion.status = previous;
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Switch both actuators to the commanded state. A failed send restores
    /// the previous status, so the board and the local view agree.
    pub fn enable_command(&self, command: &EnableCommand) -> Result<()> {
        let target = command.state();
        let (batch, previous) = {
            let mut state = self.lock();
            let previous = state.motion.status;
            let batch = self.inner.motion.enable_command(&mut state.motion, target);
            self.inner.timer.start();
            (batch, previous)
        };
        info!("Actuators -> {:?}", target);

        if let Err(e) = self.send(&batch) {
            let mut state = self.lock();
            if state.motion.status.all(target) {
                state.motion.status = previous;
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn set_pose(&self, pose: &PoseCommand) -> Result<()> {
        let batch = {
            let mut state = self.lock();
            self.inner.motion.pose_command(&mut state.motion, pose)
        };
        self.send(&batch)?;
        Ok(())
    }

    /// Send the reset service `repeat` times in one batch
    pub fn reset(&self, repeat: usize) -> Result<()> {
        let batch: Batch = std::iter::repeat_with(system::reset_request)
            .take(repeat)
            .collect::<Vec<_>>()
            .into();
        self.send(&batch)?;
        Ok(())
    }

    /// Text service on the system channel
    pub fn board_service(&self, name: &str) -> String {
        match name {
            "reset" => match self.reset(1) {
                Ok(()) => "reset".to_string(),
                Err(e) => e.to_string(),
            },
            "version" => self.identity().summary(),
            "type" => format!("Type board: {}\n", self.identity().type_board),
            "serial_info" => {
                if let Err(e) = self.send(&Batch::from(system::error_request())) {
                    warn!("Board error counters not refreshed: {}", e);
                }
                self.errors().report()
            }
            _ => SERVICE_HELP.to_string(),
        }
    }

    pub fn update_process(&self, name: &str) -> Result<()> {
        self.push(&self.inner.system.process_items(name)?)
    }

    pub fn update_pid(&self, name: &str) -> Result<()> {
        self.push(&self.inner.motion.pid_items(name)?)
    }

    pub fn update_parameter(&self, name: &str) -> Result<()> {
        self.push(&self.inner.motion.parameter_items(name)?)
    }

    pub fn update_constraint(&self) -> Result<()> {
        let packet = self.inner.motion.constraint_packet(&*self.inner.store)?;
        self.send(&Batch::from(packet))?;
        Ok(())
    }

    pub fn update_emergency(&self) -> Result<()> {
        let packet = self.inner.motion.emergency_packet(&*self.inner.store)?;
        self.send(&Batch::from(packet))?;
        Ok(())
    }

    fn push(&self, items: &[ConfigItem]) -> Result<()> {
        let batch = sync::push(items, &*self.inner.store)?;
        self.send(&batch)?;
        Ok(())
    }

    pub fn identity(&self) -> BoardIdentity {
        self.lock().system.identity.clone()
    }

    pub fn status(&self) -> ActuatorStatus {
        self.lock().motion.status
    }

    pub fn pose(&self) -> Coordinate {
        self.lock().motion.pose
    }

    pub fn errors(&self) -> ErrorCounters {
        self.lock().errors.clone()
    }

    pub fn process_names(&self) -> Vec<String> {
        self.lock().system.process_names.clone()
    }

    pub fn timer(&self) -> Arc<TimerHandle> {
        self.inner.timer.clone()
    }

    fn controllers(&self) -> [&dyn Controller; 2] {
        [&self.inner.system, &self.inner.motion]
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn context<'a>(&'a self, state: &'a mut BridgeState) -> HandlerContext<'a> {
        HandlerContext {
            state,
            store: &*self.inner.store,
            bus: &*self.inner.bus,
        }
    }

    fn send(&self, batch: &Batch) -> std::result::Result<Ack, TransportError> {
        let result = self.inner.transport.send(batch, SEND_POLICY);
        if let Err(e) = &result {
            // Link errors already came through the error callback
            if !matches!(e, TransportError::Link(_)) {
                self.lock().errors.record_local(e.kind());
            }
        }
        result
    }

    /// Follow `timer/rate` from the store
    fn refresh_period(&self) {
        match self
            .inner
            .store
            .get_f64_or(KEY_TIMER_RATE, DEFAULT_TIMER_RATE_HZ)
        {
            Ok(rate) => match period_from_rate(rate) {
                Some(period) => self.inner.timer.set_period(period),
                None => warn!("Ignoring timer rate {} Hz", rate),
            },
            Err(e) => warn!("Ignoring timer rate: {}", e),
        }
    }
}

fn period_from_rate(rate: f64) -> Option<Duration> {
    if rate > 0.0 {
        Duration::try_from_secs_f64(1.0 / rate).ok()
    } else {
        None
    }
}
