// Board protocol: packet values, command identifiers and payloads
//
// Framing, checksums and retries belong to the link; this module only
// describes what travels over it.

mod packet;
pub mod payload;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use packet::{Channel, CommandId, Packet, PacketKind};
pub use payload::{ControlState, Payload};

/// Actuator side of the differential drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn pid_command(self) -> CommandId {
        match self {
            Side::Left => CommandId::PID_CONTROL_L,
            Side::Right => CommandId::PID_CONTROL_R,
        }
    }

    pub fn constraint_command(self) -> CommandId {
        match self {
            Side::Left => CommandId::CONSTRAINT_L,
            Side::Right => CommandId::CONSTRAINT_R,
        }
    }

    pub fn parameter_command(self) -> CommandId {
        match self {
            Side::Left => CommandId::PARAMETER_MOTOR_L,
            Side::Right => CommandId::PARAMETER_MOTOR_R,
        }
    }

    pub fn setpoint_command(self) -> CommandId {
        match self {
            Side::Left => CommandId::VEL_MOTOR_L,
            Side::Right => CommandId::VEL_MOTOR_R,
        }
    }

    pub fn enable_command(self) -> CommandId {
        match self {
            Side::Left => CommandId::ENABLE_MOTOR_L,
            Side::Right => CommandId::ENABLE_MOTOR_R,
        }
    }

    pub fn motor_command(self) -> CommandId {
        match self {
            Side::Left => CommandId::MOTOR_L,
            Side::Right => CommandId::MOTOR_R,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Communication error kinds, counted on both ends of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Framing,
    Overrun,
    Header,
    Length,
    Data,
    Checksum,
    Command,
    Nack,
    BadOption,
    Packet,
    CreatePacket,
    TimeoutSyncPacket,
    MaxAsyncCallback,
}

impl ErrorKind {
    /// Kinds in the order the board reports them in ERROR_SERIAL
    const BOARD_ORDER: [ErrorKind; 11] = [
        ErrorKind::Framing,
        ErrorKind::Overrun,
        ErrorKind::Header,
        ErrorKind::Length,
        ErrorKind::Data,
        ErrorKind::Checksum,
        ErrorKind::Command,
        ErrorKind::Nack,
        ErrorKind::BadOption,
        ErrorKind::Packet,
        ErrorKind::CreatePacket,
    ];

    /// Kind for slot `index` of an ERROR_SERIAL report (board code `-(index + 1)`)
    pub fn from_board_slot(index: usize) -> Option<Self> {
        Self::BOARD_ORDER.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Framing => "framing",
            ErrorKind::Overrun => "overrun",
            ErrorKind::Header => "header",
            ErrorKind::Length => "length",
            ErrorKind::Data => "data",
            ErrorKind::Checksum => "checksum",
            ErrorKind::Command => "command",
            ErrorKind::Nack => "nack",
            ErrorKind::BadOption => "option",
            ErrorKind::Packet => "packet",
            ErrorKind::CreatePacket => "create_packet",
            ErrorKind::TimeoutSyncPacket => "timeout_sync_packet",
            ErrorKind::MaxAsyncCallback => "max_async_callback",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
