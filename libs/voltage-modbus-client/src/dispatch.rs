//! Outcome delivery
//!
//! A finalized request reaches exactly one sink: the awaiting caller of a
//! synchronous request, the combined response handler, or the data/error
//! handler pair. Outcomes without a sink are logged and dropped.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::ModbusError;
use crate::message::ModbusMessage;
use crate::queue::RequestEntry;

/// Receives validated responses with the caller token
pub type DataHandler = Arc<dyn Fn(ModbusMessage, u32) + Send + Sync>;
/// Receives error codes with the caller token
pub type ErrorHandler = Arc<dyn Fn(ModbusError, u32) + Send + Sync>;
/// Receives every outcome; errors arrive as messages carrying the error
pub type ResponseHandler = Arc<dyn Fn(ModbusMessage, u32) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_data: Option<DataHandler>,
    on_error: Option<ErrorHandler>,
    on_response: Option<ResponseHandler>,
}

/// Handler registry shared by the client and its worker
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<Handlers>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.handlers.read();
        f.debug_struct("Dispatcher")
            .field("on_data", &h.on_data.is_some())
            .field("on_error", &h.on_error.is_some())
            .field("on_response", &h.on_response.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refused while a response handler is registered
    pub fn set_data_handler(&self, handler: DataHandler) -> bool {
        let mut h = self.handlers.write();
        if h.on_response.is_some() {
            warn!("onData refused: onResponse handler already set");
            return false;
        }
        h.on_data = Some(handler);
        true
    }

    /// Refused while a response handler is registered
    pub fn set_error_handler(&self, handler: ErrorHandler) -> bool {
        let mut h = self.handlers.write();
        if h.on_response.is_some() {
            warn!("onError refused: onResponse handler already set");
            return false;
        }
        h.on_error = Some(handler);
        true
    }

    /// Refused while a data or error handler is registered
    pub fn set_response_handler(&self, handler: ResponseHandler) -> bool {
        let mut h = self.handlers.write();
        if h.on_data.is_some() || h.on_error.is_some() {
            warn!("onResponse refused: onData/onError handler already set");
            return false;
        }
        h.on_response = Some(handler);
        true
    }

    /// Deliver the outcome of a finalized entry
    pub fn dispatch(&self, entry: &RequestEntry, response: ModbusMessage) {
        let token = entry.token;

        if let Some(reply) = entry.take_reply() {
            if reply.send(response).is_err() {
                debug!("Sync caller gone: token={}", token);
            }
            return;
        }

        // clone handlers out so none runs under the lock
        let (on_data, on_error, on_response) = {
            let h = self.handlers.read();
            (h.on_data.clone(), h.on_error.clone(), h.on_response.clone())
        };

        if let Some(handler) = on_response {
            handler(response, token);
            return;
        }

        match response.error() {
            ModbusError::Success => match on_data {
                Some(handler) => handler(response, token),
                None => debug!("No onData handler: token={}", token),
            },
            error => match on_error {
                Some(handler) => handler(error, token),
                None => debug!("No onError handler: token={} error={}", token, error),
            },
        }
    }
}
