// Motion channel: drive parameters, setpoints, safety and odometry

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use super::{BridgeState, Controller, HandlerContext, unexpected};
use crate::bus::{FrameBroadcaster, TelemetryBus, Topic};
use crate::config::{
    ALL_TARGETS, DEFAULT_FRAME_BASE_LINK, DEFAULT_FRAME_JOINT, DEFAULT_FRAME_ODOM,
    DEFAULT_WATCHDOG_SECS, KEY_TIMER_ALIVE,
};
use crate::error::{BridgeError, ConfigError};
use crate::messages::{
    EnableState, MotorState, Pose, PoseCommand, Telemetry, Twist, VelocityCommand, now_stamp,
};
use crate::motor::odometry::{
    self, KEY_FRAME_BASE_LINK, KEY_FRAME_JOINT, KEY_FRAME_ODOM, joint_state,
};
use crate::motor::{FrameNames, JointIntegrator, KinematicParameters, WheelSetpoints, wheel_setpoints};
use crate::protocol::payload::{
    Constraint, Coordinate, EmergencyParameter, MotorLimit, MotorMeasure, MotorParameter,
    PidGains, UnicycleParameter, Velocity,
};
use crate::protocol::{Channel, CommandId, ControlState, Packet, Payload, Side};
use crate::router::Router;
use crate::safety::{self, ActuatorStatus, SafetyAction, Watchdog};
use crate::store::{ParamStore, ParamStoreExt};
use crate::sync::ConfigItem;
use crate::transport::Batch;

const STRUCTURE: &str = "structure";
const EMERGENCY: &str = "emergency";
const DEFAULT_BACK_EMF: f64 = 1.0;

fn constraint_key(side: Side) -> String {
    format!("joint/constraint/{side}")
}

fn pid_key(side: Side) -> String {
    format!("pid/{side}")
}

fn joint_key(side: Side) -> String {
    format!("joint/{side}")
}

fn back_emf_key(side: Side) -> String {
    format!("joint/back_emf/{side}")
}

fn get_i8(store: &dyn ParamStore, key: &str) -> Result<i8, ConfigError> {
    let value = store.get_i64(key)?;
    i8::try_from(value).map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("{value} does not fit in 8 bits"),
    })
}

fn clamp_i16(value: f64) -> i16 {
    (value.round() as i64).clamp(-0x8000, 0x7FFF) as i16
}

// Store <-> payload conversions. Each pair reads and writes the same keys.

pub fn constraint(store: &dyn ParamStore, side: Side) -> Result<MotorLimit, ConfigError> {
    Ok(MotorLimit {
        velocity: store.get_f32(&format!("{}/velocity", constraint_key(side)))?,
    })
}

fn store_constraint(store: &dyn ParamStore, side: Side, limit: &MotorLimit) -> Result<(), ConfigError> {
    store.set_f32(&format!("{}/velocity", constraint_key(side)), limit.velocity)
}

/// Both per-motor limits in one packet
pub fn combined_constraint(store: &dyn ParamStore) -> Result<Constraint, ConfigError> {
    Ok(Constraint {
        max_left: clamp_i16(f64::from(constraint(store, Side::Left)?.velocity)),
        max_right: clamp_i16(f64::from(constraint(store, Side::Right)?.velocity)),
    })
}

pub fn pid(store: &dyn ParamStore, side: Side) -> Result<PidGains, ConfigError> {
    let root = pid_key(side);
    Ok(PidGains {
        kp: store.get_f32(&format!("{root}/P"))?,
        ki: store.get_f32(&format!("{root}/I"))?,
        kd: store.get_f32(&format!("{root}/D"))?,
    })
}

fn store_pid(store: &dyn ParamStore, side: Side, gains: &PidGains) -> Result<(), ConfigError> {
    let root = pid_key(side);
    store.set_f32(&format!("{root}/P"), gains.kp)?;
    store.set_f32(&format!("{root}/I"), gains.ki)?;
    store.set_f32(&format!("{root}/D"), gains.kd)
}

pub fn unicycle(store: &dyn ParamStore) -> Result<UnicycleParameter, ConfigError> {
    Ok(UnicycleParameter::from(&KinematicParameters::load(store)?))
}

pub fn motor_parameter(store: &dyn ParamStore, side: Side) -> Result<MotorParameter, ConfigError> {
    let root = joint_key(side);
    Ok(MotorParameter {
        cpr: store.get_f32(&format!("{root}/cpr"))?,
        ratio: store.get_f32(&format!("{root}/ratio"))?,
        encoder_pos: store.get_f32(&format!("{root}/encoder_pos"))?,
        volt_bridge: store.get_f32(&format!("{root}/volt_bridge"))?,
        versus: get_i8(store, &format!("{root}/versus"))?,
        enable_set: get_i8(store, &format!("{root}/default_enable"))?,
    })
}

fn store_motor_parameter(
    store: &dyn ParamStore,
    side: Side,
    parameter: &MotorParameter,
) -> Result<(), ConfigError> {
    let root = joint_key(side);
    store.set_f32(&format!("{root}/cpr"), parameter.cpr)?;
    store.set_f32(&format!("{root}/ratio"), parameter.ratio)?;
    store.set_f32(&format!("{root}/encoder_pos"), parameter.encoder_pos)?;
    store.set_f32(&format!("{root}/volt_bridge"), parameter.volt_bridge)?;
    store.set_i64(&format!("{root}/versus"), i64::from(parameter.versus))?;
    store.set_i64(&format!("{root}/default_enable"), i64::from(parameter.enable_set))
}

/// Emergency parameters; the timeout is stored in seconds and sent in ms
pub fn emergency(store: &dyn ParamStore) -> Result<EmergencyParameter, ConfigError> {
    Ok(EmergencyParameter {
        bridge_off: store.get_f32(&format!("{EMERGENCY}/bridge_off"))?,
        slope_time: store.get_f32(&format!("{EMERGENCY}/slope_time"))?,
        timeout: clamp_i16(store.get_f64(&format!("{EMERGENCY}/timeout"))? * 1000.0),
    })
}

fn store_emergency(store: &dyn ParamStore, parameter: &EmergencyParameter) -> Result<(), ConfigError> {
    store.set_f32(&format!("{EMERGENCY}/bridge_off"), parameter.bridge_off)?;
    store.set_f32(&format!("{EMERGENCY}/slope_time"), parameter.slope_time)?;
    store.set(
        &format!("{EMERGENCY}/timeout"),
        (f64::from(parameter.timeout) / 1000.0).into(),
    )
}

// Configuration items

fn constraint_item(side: Side) -> ConfigItem {
    ConfigItem::new(constraint_key(side), Channel::Motion, side.constraint_command(), move |store| {
        Ok(Payload::MotorLimit(constraint(store, side)?))
    })
}

fn pid_item(side: Side) -> ConfigItem {
    ConfigItem::new(pid_key(side), Channel::Motion, side.pid_command(), move |store| {
        Ok(Payload::Pid(pid(store, side)?))
    })
}

fn structure_item() -> ConfigItem {
    ConfigItem::new(STRUCTURE, Channel::Motion, CommandId::PARAMETER_UNICYCLE, |store| {
        Ok(Payload::Unicycle(unicycle(store)?))
    })
}

fn motor_parameter_item(side: Side) -> ConfigItem {
    ConfigItem::new(joint_key(side), Channel::Motion, side.parameter_command(), move |store| {
        Ok(Payload::MotorParameter(motor_parameter(store, side)?))
    })
}

fn emergency_item() -> ConfigItem {
    ConfigItem::new(EMERGENCY, Channel::Motion, CommandId::EMERGENCY, |store| {
        Ok(Payload::Emergency(emergency(store)?))
    })
}

/// Sides selected by an update target name
fn sides(name: &str) -> &'static [Side] {
    match name {
        "left" => &[Side::Left],
        "right" => &[Side::Right],
        ALL_TARGETS => &Side::BOTH,
        _ => &[],
    }
}

// Packets

fn motion_data(command: CommandId, payload: Payload) -> Packet {
    Packet::data(Channel::Motion, command, payload)
}

pub fn setpoint_packets(setpoints: &WheelSetpoints) -> Vec<Packet> {
    Side::BOTH
        .iter()
        .map(|&side| motion_data(side.setpoint_command(), Payload::Setpoint(setpoints.get(side))))
        .collect()
}

pub fn enable_packets(state: ControlState) -> Vec<Packet> {
    Side::BOTH
        .iter()
        .map(|&side| motion_data(side.enable_command(), Payload::ControlState(state)))
        .collect()
}

/// Motion-side state owned by the bridge
#[derive(Debug, Clone)]
pub struct MotionState {
    pub status: ActuatorStatus,
    pub setpoints: WheelSetpoints,
    pub watchdog: Watchdog,
    /// Emergency stop decided locally but not yet sent successfully
    pub emergency_pending: bool,
    /// Last pose relayed from the board
    pub pose: Coordinate,
    /// Last measured body velocity
    pub velocity: Velocity,
    pub motors: [MotorMeasure; 2],
    pub joints: JointIntegrator,
    pub last_joint_update: Option<Instant>,
}

impl Default for MotionState {
    fn default() -> Self {
        Self {
            status: ActuatorStatus::default(),
            setpoints: WheelSetpoints::zero(),
            watchdog: Watchdog::new(Duration::from_secs_f64(DEFAULT_WATCHDOG_SECS)),
            emergency_pending: false,
            pose: Coordinate::default(),
            velocity: Velocity::default(),
            motors: [MotorMeasure::default(); 2],
            joints: JointIntegrator::default(),
            last_joint_update: None,
        }
    }
}

// Handlers

fn on_constraint(ctx: &mut HandlerContext<'_>, packet: &Packet, side: Side) -> Result<(), BridgeError> {
    let Payload::MotorLimit(limit) = packet.payload() else {
        return Err(unexpected(packet));
    };
    store_constraint(ctx.store, side, limit)?;
    Ok(())
}

fn on_pid(ctx: &mut HandlerContext<'_>, packet: &Packet, side: Side) -> Result<(), BridgeError> {
    let Payload::Pid(gains) = packet.payload() else {
        return Err(unexpected(packet));
    };
    store_pid(ctx.store, side, gains)?;
    Ok(())
}

fn on_motor_parameter(
    ctx: &mut HandlerContext<'_>,
    packet: &Packet,
    side: Side,
) -> Result<(), BridgeError> {
    let Payload::MotorParameter(parameter) = packet.payload() else {
        return Err(unexpected(packet));
    };
    store_motor_parameter(ctx.store, side, parameter)?;
    Ok(())
}

fn on_motor(ctx: &mut HandlerContext<'_>, packet: &Packet, side: Side) -> Result<(), BridgeError> {
    let Payload::Motor(measure) = packet.payload() else {
        return Err(unexpected(packet));
    };
    ctx.state.motion.motors[side.index()] = *measure;
    ctx.bus
        .publish(Topic::motor(side), &Telemetry::Motor(MotorState::from(*measure)));
    Ok(())
}

fn on_unicycle(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Unicycle(parameter) = packet.payload() else {
        return Err(unexpected(packet));
    };
    KinematicParameters::from(parameter).save(ctx.store)?;
    Ok(())
}

fn on_emergency(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Emergency(parameter) = packet.payload() else {
        return Err(unexpected(packet));
    };
    store_emergency(ctx.store, parameter)?;
    Ok(())
}

fn on_coordinate(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Coordinate(coordinate) = packet.payload() else {
        return Err(unexpected(packet));
    };
    ctx.state.motion.pose = *coordinate;
    ctx.bus
        .publish(Topic::Pose, &Telemetry::Pose(Pose::from(*coordinate)));
    Ok(())
}

fn on_velocity(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Velocity(velocity) = packet.payload() else {
        return Err(unexpected(packet));
    };
    ctx.bus
        .publish(Topic::Velocity, &Telemetry::Twist(Twist::from(*velocity)));
    Ok(())
}

fn on_velocity_measure(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::Velocity(velocity) = packet.payload() else {
        return Err(unexpected(packet));
    };
    ctx.state.motion.velocity = *velocity;
    Ok(())
}

fn on_enable(ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
    let Payload::ControlState(reported) = packet.payload() else {
        return Err(unexpected(packet));
    };
    ctx.bus.publish(
        Topic::Enable,
        &Telemetry::Enable(EnableState { state: *reported }),
    );
    // The board has not caught up with a local emergency stop yet
    if ctx.state.motion.status.all(ControlState::Emergency) && *reported != ControlState::Emergency {
        warn!("Board reports {:?} during emergency, stopping again", reported);
        ctx.state
            .outbox
            .extend(enable_packets(ControlState::Emergency));
    }
    Ok(())
}

/// Controller of the motion channel
#[derive(Debug, Default, Clone, Copy)]
pub struct MotionController;

impl MotionController {
    /// Setpoint packets for a velocity command, plus enable packets on the
    /// transition into velocity control
    pub fn velocity_command(
        &self,
        state: &mut MotionState,
        store: &dyn ParamStore,
        command: &VelocityCommand,
    ) -> Result<Batch, ConfigError> {
        let params = KinematicParameters::load(store)?;
        let setpoints = wheel_setpoints(
            &params,
            f64::from(command.linear),
            f64::from(command.angular),
        );
        state.setpoints = setpoints;
        state.watchdog.reset();

        let mut batch = Batch::from(setpoint_packets(&setpoints));
        if !state.status.all(ControlState::Velocity) {
            info!("Actuators {:?} -> velocity control", state.status);
            state.status = ActuatorStatus::uniform(ControlState::Velocity);
            batch.extend(enable_packets(ControlState::Velocity));
        }
        Ok(batch)
    }

    pub fn enable_command(&self, state: &mut MotionState, target: ControlState) -> Batch {
        state.status = ActuatorStatus::uniform(target);
        state.watchdog.reset();
        enable_packets(target).into()
    }

    /// Move the pose to `pose`, keeping the space marker, and restart the joints
    pub fn pose_command(&self, state: &mut MotionState, pose: &PoseCommand) -> Batch {
        let coordinate = Coordinate {
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            space: state.pose.space,
        };
        state.pose = coordinate;
        state.joints.reset();
        state.last_joint_update = None;
        motion_data(CommandId::COORDINATE, Payload::Coordinate(coordinate)).into()
    }

    /// Items pushed by the `pid` update service
    pub fn pid_items(&self, name: &str) -> Result<Vec<ConfigItem>, BridgeError> {
        let items: Vec<_> = sides(name).iter().map(|&side| pid_item(side)).collect();
        if items.is_empty() {
            return Err(BridgeError::UnknownTarget(name.to_string()));
        }
        Ok(items)
    }

    /// Items pushed by the `parameter` update service
    pub fn parameter_items(&self, name: &str) -> Result<Vec<ConfigItem>, BridgeError> {
        let mut items: Vec<_> = sides(name)
            .iter()
            .map(|&side| motor_parameter_item(side))
            .collect();
        if name == STRUCTURE || name == ALL_TARGETS {
            items.push(structure_item());
        }
        if items.is_empty() {
            return Err(BridgeError::UnknownTarget(name.to_string()));
        }
        Ok(items)
    }

    pub fn constraint_packet(&self, store: &dyn ParamStore) -> Result<Packet, ConfigError> {
        Ok(motion_data(
            CommandId::CONSTRAINT,
            Payload::Constraint(combined_constraint(store)?),
        ))
    }

    pub fn emergency_packet(&self, store: &dyn ParamStore) -> Result<Packet, ConfigError> {
        Ok(motion_data(
            CommandId::EMERGENCY,
            Payload::Emergency(emergency(store)?),
        ))
    }
}

impl Controller for MotionController {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn register(&self, router: &mut Router) {
        let channel = Channel::Motion;
        for side in Side::BOTH {
            router.register(channel, side.constraint_command(), move |ctx, packet| {
                on_constraint(ctx, packet, side)
            });
            router.register(channel, side.pid_command(), move |ctx, packet| {
                on_pid(ctx, packet, side)
            });
            router.register(channel, side.parameter_command(), move |ctx, packet| {
                on_motor_parameter(ctx, packet, side)
            });
            router.register(channel, side.motor_command(), move |ctx, packet| {
                on_motor(ctx, packet, side)
            });
        }
        router.register(channel, CommandId::PARAMETER_UNICYCLE, on_unicycle);
        router.register(channel, CommandId::EMERGENCY, on_emergency);
        router.register(channel, CommandId::COORDINATE, on_coordinate);
        router.register(channel, CommandId::VELOCITY, on_velocity);
        router.register(channel, CommandId::VELOCITY_MIS, on_velocity_measure);
        router.register(channel, CommandId::ENABLE, on_enable);
    }

    fn config_items(&self) -> Vec<ConfigItem> {
        let mut items = Vec::new();
        for side in Side::BOTH {
            items.push(constraint_item(side));
        }
        for side in Side::BOTH {
            items.push(pid_item(side));
        }
        items.push(structure_item());
        for side in Side::BOTH {
            items.push(motor_parameter_item(side));
        }
        items.push(emergency_item());
        items
    }

    fn defaults(&self) -> Vec<(&'static str, Value)> {
        vec![
            (KEY_FRAME_ODOM, DEFAULT_FRAME_ODOM.into()),
            (KEY_FRAME_BASE_LINK, DEFAULT_FRAME_BASE_LINK.into()),
            (KEY_FRAME_JOINT, DEFAULT_FRAME_JOINT.into()),
            ("joint/back_emf/left", DEFAULT_BACK_EMF.into()),
            ("joint/back_emf/right", DEFAULT_BACK_EMF.into()),
        ]
    }

    fn telemetry_requests(&self, _state: &BridgeState, bus: &dyn TelemetryBus, batch: &mut Batch) {
        let wants = |topic| bus.has_subscribers(topic);
        let odom = wants(Topic::Odom);
        let joints = wants(Topic::JointStates);

        let mut request = |command| batch.push(Packet::request(Channel::Motion, command));
        if wants(Topic::Pose) || odom {
            request(CommandId::COORDINATE);
        }
        if wants(Topic::Velocity) {
            request(CommandId::VELOCITY);
        }
        if wants(Topic::Enable) {
            request(CommandId::ENABLE);
        }
        if odom {
            request(CommandId::VELOCITY_MIS);
        }
        for side in Side::BOTH {
            if wants(Topic::motor(side)) || joints {
                request(side.motor_command());
            }
        }
    }

    fn check_safety(
        &self,
        ctx: &mut HandlerContext<'_>,
        elapsed: Duration,
        batch: &mut Batch,
    ) -> SafetyAction {
        let motion = &mut ctx.state.motion;
        match ctx.store.get_f64_or(KEY_TIMER_ALIVE, DEFAULT_WATCHDOG_SECS) {
            Ok(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(window) => motion.watchdog.set_window(window),
                Err(_) => warn!("Ignoring watchdog window {} s", secs),
            },
            Err(e) => warn!("Ignoring watchdog window: {}", e),
        }

        let source_active = ctx.bus.command_source_active();
        let action = safety::evaluate(
            &mut motion.status,
            &mut motion.watchdog,
            elapsed,
            source_active,
        );
        match action {
            SafetyAction::KeepAlive => batch.extend(setpoint_packets(&motion.setpoints)),
            SafetyAction::EmergencyStop => {
                motion.emergency_pending = true;
                batch.extend(enable_packets(ControlState::Emergency));
            }
            SafetyAction::Idle | SafetyAction::Waiting | SafetyAction::Enforcing => {
                if motion.emergency_pending && motion.status.all(ControlState::Emergency) {
                    warn!("Emergency stop not delivered yet, sending again");
                    batch.extend(enable_packets(ControlState::Emergency));
                    return SafetyAction::Enforcing;
                }
            }
        }
        action
    }

    fn on_tick(&self, ctx: &mut HandlerContext<'_>, frames: &dyn FrameBroadcaster, now: Instant) {
        if ctx.state.motion.status.all(ControlState::Emergency) {
            ctx.state.motion.emergency_pending = false;
        }
        let names = FrameNames::load(ctx.store);
        let stamp = now_stamp();

        if ctx.bus.has_subscribers(Topic::Odom) {
            let motion = &ctx.state.motion;
            let message = odometry::odometry(&motion.pose, &motion.velocity, &names, stamp);
            ctx.bus.publish(Topic::Odom, &Telemetry::Odometry(message));
            frames.send_transform(&odometry::transform(&motion.pose, &names, stamp));
        }

        if ctx.bus.has_subscribers(Topic::JointStates) {
            let back_emf = Side::BOTH.map(|side| {
                ctx.store
                    .get_f64_or(&back_emf_key(side), DEFAULT_BACK_EMF)
                    .unwrap_or(DEFAULT_BACK_EMF)
            });
            let motion = &mut ctx.state.motion;
            let dt = motion
                .last_joint_update
                .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
            motion.last_joint_update = Some(now);
            let velocity = motion.motors.map(|m| f64::from(m.measure));
            let positions = motion.joints.advance(velocity, dt);
            let message = joint_state(&names, &motion.motors, positions, back_emf, stamp);
            ctx.bus
                .publish(Topic::JointStates, &Telemetry::JointState(message));
        }
    }
}
