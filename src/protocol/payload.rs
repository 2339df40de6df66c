// Typed payloads, one variant per kind of board structure
//
// Field widths follow what the board stores: gains and geometry are f32,
// setpoints and limits are signed 16-bit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    Service(Service),
    Process(ProcessValues),
    ProcessName(ProcessName),
    SystemParameter(SystemParameter),
    BoardErrors(Vec<i32>),
    Pid(PidGains),
    MotorLimit(MotorLimit),
    Constraint(Constraint),
    Unicycle(UnicycleParameter),
    MotorParameter(MotorParameter),
    Emergency(EmergencyParameter),
    Setpoint(i16),
    ControlState(ControlState),
    Motor(MotorMeasure),
    Coordinate(Coordinate),
    Velocity(Velocity),
}

impl Payload {
    /// Variant name, used in protocol error messages
    pub fn variant(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Service(_) => "service",
            Payload::Process(_) => "process",
            Payload::ProcessName(_) => "process_name",
            Payload::SystemParameter(_) => "system_parameter",
            Payload::BoardErrors(_) => "board_errors",
            Payload::Pid(_) => "pid",
            Payload::MotorLimit(_) => "motor_limit",
            Payload::Constraint(_) => "constraint",
            Payload::Unicycle(_) => "unicycle",
            Payload::MotorParameter(_) => "motor_parameter",
            Payload::Emergency(_) => "emergency",
            Payload::Setpoint(_) => "setpoint",
            Payload::ControlState(_) => "control_state",
            Payload::Motor(_) => "motor",
            Payload::Coordinate(_) => "coordinate",
            Payload::Velocity(_) => "velocity",
        }
    }
}

/// Board information services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCode {
    Reset,
    Version,
    Author,
    NameBoard,
    Date,
    TypeBoard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub code: ServiceCode,
    #[serde(default)]
    pub text: String,
}

impl Service {
    pub fn request(code: ServiceCode) -> Self {
        Self {
            code,
            text: String::new(),
        }
    }
}

/// Per-process values: execution times, priorities or frequencies
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessValues {
    pub idle: f32,
    pub parse_packet: f32,
    pub process: Vec<f32>,
}

/// Name of one board process. Index -1 asks for the count, which the board
/// answers in `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessName {
    pub index: i16,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemParameter {
    pub step_timer: f32,
    pub tm_mill: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Velocity limit of one motor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorLimit {
    pub velocity: f32,
}

/// Velocity limits of both motors
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Constraint {
    pub max_left: i16,
    pub max_right: i16,
}

/// Differential drive geometry as the board stores it
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UnicycleParameter {
    pub wheelbase: f32,
    pub radius_l: f32,
    pub radius_r: f32,
    pub sp_min: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorParameter {
    pub cpr: f32,
    pub ratio: f32,
    pub encoder_pos: f32,
    pub volt_bridge: f32,
    pub versus: i8,
    pub enable_set: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmergencyParameter {
    pub bridge_off: f32,
    pub slope_time: f32,
    /// Milliseconds
    pub timeout: i16,
}

/// Control mode of one actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    #[default]
    Disabled,
    Velocity,
    Emergency,
}

/// Measurement of one motor, angular values in rad/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorMeasure {
    pub reference: f32,
    pub measure: f32,
    pub current: f32,
    pub control: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
    pub space: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub v: f32,
    pub w: f32,
}
