// Host-side bridge to the Orbus motor board over zenoh

pub mod bridge;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod messages;
pub mod motor;
pub mod protocol;
pub mod router;
pub mod runtime;
pub mod safety;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, TickOutcome};
pub use error::{BridgeError, Result};
