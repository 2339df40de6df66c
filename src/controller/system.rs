// System channel: board identity, process table, time base, error counters

use tracing::{debug, info, warn};

use super::{BridgeState, Controller, HandlerContext, unexpected};
use crate::bus::{TelemetryBus, Topic};
use crate::config::{
    ALL_TARGETS, DEFAULT_TIMER_RATE_HZ, DEFAULT_WATCHDOG_SECS, KEY_PROCESS_LENGTH, KEY_TIME_K,
    KEY_TIME_STEP, KEY_TIME_TM_MILL, KEY_TIMER_ALIVE, KEY_TIMER_RATE,
};
use crate::error::{BridgeError, ConfigError};
use crate::messages::{ProcessReport, Telemetry};
use crate::protocol::payload::{ProcessValues, Service, ServiceCode};
use crate::protocol::{Channel, CommandId, ErrorKind, Packet, Payload};
use crate::router::Router;
use crate::store::{ParamStore, ParamStoreExt};
use crate::sync::{ConfigItem, stored_process_names};
use crate::transport::Batch;

const KEY_PRIORITY_PARSE: &str = "priority/parse";
const PRIORITY: &str = "priority";
const FREQUENCY: &str = "frequency";

/// Identity strings reported by the board
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardIdentity {
    pub version: String,
    pub author: String,
    pub name_board: String,
    pub date: String,
    pub type_board: String,
}

impl BoardIdentity {
    fn set(&mut self, service: &Service) {
        let text = service.text.trim_end_matches('\0').to_string();
        match service.code {
            ServiceCode::Version => self.version = text,
            ServiceCode::Author => self.author = text,
            ServiceCode::NameBoard => self.name_board = text,
            ServiceCode::Date => self.date = text,
            ServiceCode::TypeBoard => self.type_board = text,
            ServiceCode::Reset => {}
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Name Board: {} {}\nType Board: {}\n{} - Build in: {}\n",
            self.name_board, self.version, self.type_board, self.author, self.date
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemState {
    pub identity: BoardIdentity,
    pub process_names: Vec<String>,
    /// Set while the process count (first phase of name resolution) is pending
    pub awaiting_count: bool,
}

/// Conversion of board process times to milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    pub step: f64,
    pub k_time: f64,
}

impl TimeBase {
    pub fn load(store: &dyn ParamStore) -> Result<Self, ConfigError> {
        Ok(Self {
            step: store.get_f64(KEY_TIME_STEP)?,
            k_time: store.get_f64(KEY_TIME_K)?,
        })
    }

    /// Negative values wrapped around the timer period
    pub fn convert(&self, time: f32) -> f64 {
        let time = f64::from(time);
        if time < 0.0 {
            self.k_time * (self.step + time)
        } else {
            self.k_time * time
        }
    }
}

fn service_packet(code: ServiceCode) -> Packet {
    Packet::data(
        Channel::System,
        CommandId::SERVICES,
        Payload::Service(Service::request(code)),
    )
}

/// The five identity queries, in one batch
pub fn identity_requests() -> Batch {
    [
        ServiceCode::Version,
        ServiceCode::Author,
        ServiceCode::NameBoard,
        ServiceCode::Date,
        ServiceCode::TypeBoard,
    ]
    .into_iter()
    .map(service_packet)
    .collect::<Vec<_>>()
    .into()
}

pub fn reset_request() -> Packet {
    service_packet(ServiceCode::Reset)
}

pub fn error_request() -> Packet {
    Packet::request(Channel::System, CommandId::ERROR_SERIAL)
}

fn process_key(root: &str, names: &[String], index: usize) -> String {
    match names.get(index) {
        Some(name) => format!("{root}/{name}"),
        None => format!("{root}/{index}"),
    }
}

/// Per-process table stored under `root/<name>`
fn process_table(store: &dyn ParamStore, root: &str) -> Result<Payload, ConfigError> {
    let names = stored_process_names(store)?.unwrap_or_default();
    let process = (0..names.len())
        .map(|i| store.get_f32(&process_key(root, &names, i)))
        .collect::<Result<Vec<_>, _>>()?;
    let parse_packet = if root == PRIORITY {
        store.get_f32(KEY_PRIORITY_PARSE)?
    } else {
        0.0
    };
    Ok(Payload::Process(ProcessValues {
        idle: 0.0,
        parse_packet,
        process,
    }))
}

fn priority_item() -> ConfigItem {
    ConfigItem::new(PRIORITY, Channel::System, CommandId::PRIORITY_PROCESS, |store| {
        process_table(store, PRIORITY)
    })
}

fn frequency_item() -> ConfigItem {
    ConfigItem::new(FREQUENCY, Channel::System, CommandId::FRQ_PROCESS, |store| {
        process_table(store, FREQUENCY)
    })
}

fn on_service(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Service(service) = packet.payload() else {
        return Err(unexpected(packet));
    };
    debug!("Service {:?}: {}", service.code, service.text);
    ctx.state.system.identity.set(service);
    Ok(())
}

fn on_time_process(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Process(values) = packet.payload() else {
        return Err(unexpected(packet));
    };
    let time = TimeBase::load(ctx.store)?;
    let report = ProcessReport {
        idle: time.convert(values.idle),
        parse_packet: time.convert(values.parse_packet),
        name: ctx.state.system.process_names.clone(),
        process: values.process.iter().map(|&t| time.convert(t)).collect(),
    };
    ctx.bus.publish(Topic::Process, &Telemetry::Process(report));
    Ok(())
}

fn store_process_table(
    ctx: &mut HandlerContext<'_>,
    root: &str,
    values: &ProcessValues,
) -> Result<(), ConfigError> {
    let names = &ctx.state.system.process_names;
    for (i, &value) in values.process.iter().enumerate() {
        ctx.store.set_f32(&process_key(root, names, i), value)?;
    }
    Ok(())
}

fn on_priority(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Process(values) = packet.payload() else {
        return Err(unexpected(packet));
    };
    store_process_table(ctx, PRIORITY, values)?;
    ctx.store.set_f32(KEY_PRIORITY_PARSE, values.parse_packet)?;
    Ok(())
}

fn on_frequency(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Process(values) = packet.payload() else {
        return Err(unexpected(packet));
    };
    store_process_table(ctx, FREQUENCY, values)?;
    Ok(())
}

fn on_parameter_system(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::SystemParameter(parameter) = packet.payload() else {
        return Err(unexpected(packet));
    };
    if parameter.step_timer <= 0.0 {
        return Err(ConfigError::Invalid {
            key: KEY_TIME_STEP.to_string(),
            reason: format!("board reported step {}", parameter.step_timer),
        }
        .into());
    }
    let k_time = f64::from(parameter.tm_mill) / f64::from(parameter.step_timer);
    ctx.store.set_f32(KEY_TIME_STEP, parameter.step_timer)?;
    ctx.store.set_i64(KEY_TIME_TM_MILL, i64::from(parameter.tm_mill))?;
    ctx.store.set(KEY_TIME_K, k_time.into())?;
    Ok(())
}

fn on_error_serial(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::BoardErrors(counts) = packet.payload() else {
        return Err(unexpected(packet));
    };
    for (slot, &count) in counts.iter().enumerate() {
        if let Some(kind) = ErrorKind::from_board_slot(slot) {
            ctx.state
                .errors
                .set_board(kind, u32::try_from(count).unwrap_or(0));
        }
    }
    Ok(())
}

fn on_name_process(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::ProcessName(process) = packet.payload() else {
        return Err(unexpected(packet));
    };
    let system = &mut ctx.state.system;
    if system.awaiting_count {
        let length = usize::try_from(process.index).unwrap_or(0);
        info!("Board runs {} processes", length);
        ctx.store.set_i64(KEY_PROCESS_LENGTH, length as i64)?;
        system.process_names.resize(length, String::new());
        system.awaiting_count = false;
        return Ok(());
    }

    let slot = usize::try_from(process.index)
        .ok()
        .and_then(|i| system.process_names.get_mut(i));
    match slot {
        Some(slot) => {
            *slot = process.name.clone();
            ctx.store
                .set(&format!("process/{}", process.index), process.name.clone().into())?;
        }
        None => warn!("Process index {} out of range", process.index),
    }
    Ok(())
}

/// Controller of the system channel
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemController;

impl SystemController {
    /// Items pushed by the `process` update service
    pub fn process_items(&self, name: &str) -> Result<Vec<ConfigItem>, BridgeError> {
        match name {
            PRIORITY => Ok(vec![priority_item()]),
            FREQUENCY => Ok(vec![frequency_item()]),
            ALL_TARGETS => Ok(vec![priority_item(), frequency_item()]),
            other => Err(BridgeError::UnknownTarget(other.to_string())),
        }
    }
}

impl Controller for SystemController {
    fn name(&self) -> &'static str {
        "system"
    }

    fn register(&self, router: &mut Router) {
        let channel = Channel::System;
        router.register(channel, CommandId::SERVICES, on_service);
        router.register(channel, CommandId::TIME_PROCESS, on_time_process);
        router.register(channel, CommandId::PRIORITY_PROCESS, on_priority);
        router.register(channel, CommandId::FRQ_PROCESS, on_frequency);
        router.register(channel, CommandId::PARAMETER_SYSTEM, on_parameter_system);
        router.register(channel, CommandId::ERROR_SERIAL, on_error_serial);
        router.register(channel, CommandId::NAME_PROCESS, on_name_process);
    }

    fn config_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::pull_only("time", Channel::System, CommandId::PARAMETER_SYSTEM),
            frequency_item(),
            priority_item(),
        ]
    }

    fn defaults(&self) -> Vec<(&'static str, serde_json::Value)> {
        vec![
            (KEY_TIMER_RATE, DEFAULT_TIMER_RATE_HZ.into()),
            (KEY_TIMER_ALIVE, DEFAULT_WATCHDOG_SECS.into()),
        ]
    }

    fn telemetry_requests(&self, _state: &BridgeState, bus: &dyn TelemetryBus, batch: &mut Batch) {
        if bus.has_subscribers(Topic::Process) {
            batch.push(Packet::request(Channel::System, CommandId::TIME_PROCESS));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::{ProcessName, SystemParameter};
    use crate::store::MemoryStore;
    use crate::testing::RecordingBus;
    use serde_json::json;

    fn dispatch(state: &mut BridgeState, store: &MemoryStore, bus: &RecordingBus, packet: Packet) {
        let mut router = Router::new();
        SystemController.register(&mut router);
        let mut ctx = HandlerContext { state, store, bus };
        router.dispatch(&mut ctx, &packet).unwrap();
    }

    fn data(command: CommandId, payload: Payload) -> Packet {
        Packet::data(Channel::System, command, payload)
    }

    #[test]
    fn test_time_base_conversion() {
        let time = TimeBase {
            step: 1000.0,
            k_time: 0.5,
        };
        assert_eq!(time.convert(100.0), 50.0);
        assert_eq!(time.convert(-100.0), 450.0);
    }

    #[test]
    fn test_parameter_system_stores_time_base() {
        let mut state = BridgeState::default();
        let store = MemoryStore::new();
        let bus = RecordingBus::default();
        let packet = data(
            CommandId::PARAMETER_SYSTEM,
            Payload::SystemParameter(SystemParameter {
                step_timer: 4000.0,
                tm_mill: 2,
            }),
        );
        dispatch(&mut state, &store, &bus, packet);
        assert_eq!(store.get_f64(KEY_TIME_STEP).unwrap(), 4000.0);
        assert_eq!(store.get_i64(KEY_TIME_TM_MILL).unwrap(), 2);
        assert_eq!(store.get_f64(KEY_TIME_K).unwrap(), 0.0005);
    }

    #[test]
    fn test_name_resolution_two_phases() {
        let mut state = BridgeState::default();
        let store = MemoryStore::new();
        let bus = RecordingBus::default();

        state.system.awaiting_count = true;
        let count = data(
            CommandId::NAME_PROCESS,
            Payload::ProcessName(ProcessName {
                index: 2,
                name: String::new(),
            }),
        );
        dispatch(&mut state, &store, &bus, count);
        assert!(!state.system.awaiting_count);
        assert_eq!(state.system.process_names.len(), 2);
        assert_eq!(store.get_i64(KEY_PROCESS_LENGTH).unwrap(), 2);

        for (index, name) in [(0, "control"), (1, "odometry")] {
            let packet = data(
                CommandId::NAME_PROCESS,
                Payload::ProcessName(ProcessName {
                    index,
                    name: name.to_string(),
                }),
            );
            dispatch(&mut state, &store, &bus, packet);
        }
        assert_eq!(state.system.process_names, vec!["control", "odometry"]);
        assert_eq!(store.get_string("process/1").unwrap(), "odometry");
    }

    #[test]
    fn test_priority_table_round_trip() {
        let mut state = BridgeState::default();
        state.system.process_names = vec!["control".to_string(), "odometry".to_string()];
        let store = MemoryStore::new();
        store.set("process/length", json!(2)).unwrap();
        store.set("process/0", json!("control")).unwrap();
        store.set("process/1", json!("odometry")).unwrap();
        let bus = RecordingBus::default();

        let values = ProcessValues {
            idle: 0.0,
            parse_packet: 3.0,
            process: vec![5.0, 2.0],
        };
        dispatch(
            &mut state,
            &store,
            &bus,
            data(CommandId::PRIORITY_PROCESS, Payload::Process(values.clone())),
        );
        assert_eq!(store.get_f64("priority/odometry").unwrap(), 2.0);
        assert_eq!(store.get_f64("priority/parse").unwrap(), 3.0);

        let pushed = process_table(&store, PRIORITY).unwrap();
        assert_eq!(pushed, Payload::Process(values));
    }

    #[test]
    fn test_error_serial_sets_board_counts() {
        let mut state = BridgeState::default();
        let store = MemoryStore::new();
        let bus = RecordingBus::default();
        let packet = data(CommandId::ERROR_SERIAL, Payload::BoardErrors(vec![0, 0, 0, 0, 0, 4]));
        dispatch(&mut state, &store, &bus, packet);
        assert_eq!(state.errors.get(ErrorKind::Checksum).board, 4);
    }

    #[test]
    fn test_time_process_published_only_when_wanted() {
        let controller = SystemController;
        let state = BridgeState::default();
        let bus = RecordingBus::default();
        let mut batch = Batch::new();
        controller.telemetry_requests(&state, &bus, &mut batch);
        assert!(batch.is_empty());

        bus.subscribe(Topic::Process);
        controller.telemetry_requests(&state, &bus, &mut batch);
        assert_eq!(batch.commands(), vec![CommandId::TIME_PROCESS]);
    }

    #[test]
    fn test_unknown_process_target() {
        assert!(matches!(
            SystemController.process_items("stack"),
            Err(BridgeError::UnknownTarget(_))
        ));
        assert_eq!(SystemController.process_items("all").unwrap().len(), 2);
    }

    #[test]
    fn test_identity_summary() {
        let mut identity = BoardIdentity::default();
        identity.set(&Service {
            code: ServiceCode::TypeBoard,
            text: "Motor Control\0\0".to_string(),
        });
        assert_eq!(identity.type_board, "Motor Control");
        assert!(identity.summary().contains("Type Board: Motor Control"));
    }
}
