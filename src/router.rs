// Packet dispatch
//
// One handler per (channel, command). Handlers run on the thread that
// received the packet, with the bridge state already locked; they must not
// do I/O and queue any outgoing packet in the context outbox instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::controller::HandlerContext;
use crate::error::{BridgeError, ProtocolError};
use crate::protocol::{Channel, CommandId, Packet};

pub type Handler =
    Arc<dyn Fn(&mut HandlerContext<'_>, &Packet) -> Result<(), BridgeError> + Send + Sync>;

#[derive(Default)]
pub struct Router {
    handlers: HashMap<(Channel, CommandId), Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, returning the one it replaces
    pub fn register<F>(&mut self, channel: Channel, command: CommandId, handler: F) -> Option<Handler>
    where
        F: Fn(&mut HandlerContext<'_>, &Packet) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        self.handlers.insert((channel, command), Arc::new(handler))
    }

    pub fn is_registered(&self, channel: Channel, command: CommandId) -> bool {
        self.handlers.contains_key(&(channel, command))
    }

    /// Run the handler for `packet`. Unknown commands are a `ProtocolError`
    /// for the caller to log; nothing else is affected.
    pub fn dispatch(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<(), BridgeError> {
        let key = (packet.channel(), packet.command());
        match self.handlers.get(&key) {
            Some(handler) => handler(ctx, packet),
            None => Err(ProtocolError::Unhandled {
                channel: packet.channel(),
                command: packet.command(),
            }
            .into()),
        }
    }

    /// Drop every handler of `channel`, or all of them
    pub fn clear(&mut self, channel: Option<Channel>) {
        match channel {
            Some(channel) => self.handlers.retain(|(c, _), _| *c != channel),
            None => self.handlers.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
