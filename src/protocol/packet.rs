// Packet value type exchanged with the board
//
// A packet is identified by its command id (globally unique) and the
// channel it belongs to. Requests carry no payload; data packets carry the
// typed payload for their command.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::payload::Payload;

/// Handler group on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    System,
    Motion,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::System, Channel::Motion];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::System => f.write_str("system"),
            Channel::Motion => f.write_str("motion"),
        }
    }
}

/// Board command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u8);

impl CommandId {
    // System channel
    pub const SERVICES: Self = Self(1);
    pub const TIME_PROCESS: Self = Self(2);
    pub const PRIORITY_PROCESS: Self = Self(3);
    pub const FRQ_PROCESS: Self = Self(4);
    pub const PARAMETER_SYSTEM: Self = Self(5);
    pub const ERROR_SERIAL: Self = Self(6);
    pub const NAME_PROCESS: Self = Self(7);

    // Motion channel
    pub const PID_CONTROL_L: Self = Self(20);
    pub const PID_CONTROL_R: Self = Self(21);
    pub const CONSTRAINT_L: Self = Self(22);
    pub const CONSTRAINT_R: Self = Self(23);
    pub const CONSTRAINT: Self = Self(24);
    pub const PARAMETER_UNICYCLE: Self = Self(25);
    pub const PARAMETER_MOTOR_L: Self = Self(26);
    pub const PARAMETER_MOTOR_R: Self = Self(27);
    pub const EMERGENCY: Self = Self(28);
    pub const VEL_MOTOR_L: Self = Self(29);
    pub const VEL_MOTOR_R: Self = Self(30);
    pub const ENABLE_MOTOR_L: Self = Self(31);
    pub const ENABLE_MOTOR_R: Self = Self(32);
    pub const MOTOR_L: Self = Self(33);
    pub const MOTOR_R: Self = Self(34);
    pub const COORDINATE: Self = Self(35);
    pub const VELOCITY: Self = Self(36);
    pub const VELOCITY_MIS: Self = Self(37);
    pub const ENABLE: Self = Self(38);

    /// Symbolic name, if the id is one the bridge knows about
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SERVICES => "SERVICES",
            Self::TIME_PROCESS => "TIME_PROCESS",
            Self::PRIORITY_PROCESS => "PRIORITY_PROCESS",
            Self::FRQ_PROCESS => "FRQ_PROCESS",
            Self::PARAMETER_SYSTEM => "PARAMETER_SYSTEM",
            Self::ERROR_SERIAL => "ERROR_SERIAL",
            Self::NAME_PROCESS => "NAME_PROCESS",
            Self::PID_CONTROL_L => "PID_CONTROL_L",
            Self::PID_CONTROL_R => "PID_CONTROL_R",
            Self::CONSTRAINT_L => "CONSTRAINT_L",
            Self::CONSTRAINT_R => "CONSTRAINT_R",
            Self::CONSTRAINT => "CONSTRAINT",
            Self::PARAMETER_UNICYCLE => "PARAMETER_UNICYCLE",
            Self::PARAMETER_MOTOR_L => "PARAMETER_MOTOR_L",
            Self::PARAMETER_MOTOR_R => "PARAMETER_MOTOR_R",
            Self::EMERGENCY => "EMERGENCY",
            Self::VEL_MOTOR_L => "VEL_MOTOR_L",
            Self::VEL_MOTOR_R => "VEL_MOTOR_R",
            Self::ENABLE_MOTOR_L => "ENABLE_MOTOR_L",
            Self::ENABLE_MOTOR_R => "ENABLE_MOTOR_R",
            Self::MOTOR_L => "MOTOR_L",
            Self::MOTOR_R => "MOTOR_R",
            Self::COORDINATE => "COORDINATE",
            Self::VELOCITY => "VELOCITY",
            Self::VELOCITY_MIS => "VELOCITY_MIS",
            Self::ENABLE => "ENABLE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "#{}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// Ask the board for the current value
    Request,
    /// Carries a value, in either direction
    Data,
}

/// Immutable packet value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    command: CommandId,
    channel: Channel,
    kind: PacketKind,
    #[serde(default)]
    payload: Payload,
}

impl Packet {
    /// Request packet: asks the board to answer with a data packet
    pub fn request(channel: Channel, command: CommandId) -> Self {
        Self {
            command,
            channel,
            kind: PacketKind::Request,
            payload: Payload::Empty,
        }
    }

    /// Data packet carrying `payload`
    pub fn data(channel: Channel, command: CommandId, payload: Payload) -> Self {
        Self {
            command,
            channel,
            kind: PacketKind::Data,
            payload,
        }
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_request(&self) -> bool {
        self.kind == PacketKind::Request
    }
}
