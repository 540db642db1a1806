use crate::core::reader::PacketReader;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::session::{NetworkSession, SessionHandler};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

type HandlerFn = dyn Fn(&NetworkSession, &mut PacketReader) -> Result<()> + Send + Sync + 'static;

/// Packet dispatcher routing on the leading `u16` opcode.
///
/// Handlers see the reader positioned just after the opcode. Handlers run while the
/// table's read lock is held, so they must not register new handlers.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<u16, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register the handler for `opcode`.
    ///
    /// # Errors
    /// `DuplicateHandler` if the opcode already has one.
    pub fn register<F>(&self, opcode: u16, handler: F) -> Result<()>
    where
        F: Fn(&NetworkSession, &mut PacketReader) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.into()))?;

        if handlers.contains_key(&opcode) {
            return Err(ProtocolError::DuplicateHandler(opcode));
        }
        handlers.insert(opcode, Box::new(handler));
        Ok(())
    }

    pub fn is_registered(&self, opcode: u16) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&opcode))
            .unwrap_or(false)
    }

    /// Route one packet. Unknown opcodes and packets too short to carry one are logged
    /// and dropped; only handler errors are returned.
    pub fn dispatch(&self, session: &NetworkSession, reader: &mut PacketReader) -> Result<()> {
        let Some(opcode) = reader.try_safe(|r| r.read_u16()) else {
            warn!(id = session.id(), len = reader.len(), "Packet too short for an opcode");
            return Ok(());
        };

        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.into()))?;

        match handlers.get(&opcode) {
            Some(handler) => handler(session, reader),
            None => {
                debug!(
                    id = session.id(),
                    opcode,
                    len = reader.remaining(),
                    "Unhandled opcode"
                );
                Ok(())
            }
        }
    }
}

impl SessionHandler for Dispatcher {
    fn on_packet(&self, session: &NetworkSession, mut reader: PacketReader) -> Result<()> {
        self.dispatch(session, &mut reader)
    }
}
