//! Modbus TCP client facade
//!
//! Producers queue requests from any task; a single worker task started by
//! [`ModbusClientTcp::begin`] serves them in order against one connection
//! and reports each outcome through the registered handlers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::constants::{DEFAULT_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
use crate::dispatch::Dispatcher;
use crate::error::{ConfigError, ModbusError};
use crate::message::ModbusMessage;
use crate::queue::RequestQueue;
use crate::target::TargetHost;
use crate::transport::Transport;
use crate::worker::Worker;

/// State shared between the client and its worker
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queue: RequestQueue,
    pub(crate) dispatcher: Dispatcher,
    /// Requests accepted into the queue
    pub(crate) messages: AtomicU32,
    /// Requests finalized with an error
    pub(crate) errors: AtomicU32,
}

#[derive(Debug, Clone, Copy)]
struct Defaults {
    timeout_ms: u32,
    interval_ms: u32,
}

/// Queued Modbus TCP client
pub struct ModbusClientTcp {
    shared: Arc<Shared>,
    target: Mutex<TargetHost>,
    defaults: Mutex<Defaults>,
    /// Handed to the worker by `begin`
    transport: Mutex<Option<Box<dyn Transport>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ModbusClientTcp {
    pub fn new<T>(transport: T, queue_limit: usize) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                queue: RequestQueue::new(queue_limit),
                dispatcher: Dispatcher::new(),
                messages: AtomicU32::new(0),
                errors: AtomicU32::new(0),
            }),
            target: Mutex::new(TargetHost::unset(DEFAULT_TIMEOUT_MS, DEFAULT_INTERVAL_MS)),
            defaults: Mutex::new(Defaults {
                timeout_ms: DEFAULT_TIMEOUT_MS,
                interval_ms: DEFAULT_INTERVAL_MS,
            }),
            transport: Mutex::new(Some(Box::new(transport))),
            worker: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Client with an initial target
    pub fn with_target<T>(transport: T, host: impl Into<String>, port: u16, queue_limit: usize) -> Self
    where
        T: Transport + 'static,
    {
        let client = Self::new(transport, queue_limit);
        client.set_target(host, port, 0, 0);
        client
    }

    pub fn from_config<T>(transport: T, config: &ClientConfig) -> Result<Self, ConfigError>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let client = Self::new(transport, config.queue_limit);
        client.set_timeout(config.default_timeout_ms, config.default_interval_ms);
        if let Some(target) = &config.target {
            client.set_target(
                target.host.clone(),
                target.port,
                target.timeout_ms,
                target.interval_ms,
            );
        }
        Ok(client)
    }

    /// Spawn the worker task on the current tokio runtime
    ///
    /// Returns `false` when already started, shut down, or called outside
    /// a runtime.
    pub fn begin(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shutdown.is_cancelled() {
            return false;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Worker not started: {}", e);
                return false;
            },
        };
        let Some(transport) = self.transport.lock().take() else {
            return false;
        };

        let task = Worker::new(Arc::clone(&self.shared), transport, self.shutdown.clone());
        *worker = Some(handle.spawn(task.run()));
        info!("Modbus TCP client started (queue limit {})", self.shared.queue.capacity());
        true
    }

    /// Default timeout and interval for targets that leave them at 0
    pub fn set_timeout(&self, timeout_ms: u32, interval_ms: u32) {
        *self.defaults.lock() = Defaults {
            timeout_ms,
            interval_ms,
        };
    }

    /// Set the target for subsequent requests
    ///
    /// A timeout or interval of 0 takes the configured default. Returns
    /// true if host or port differ from the previously configured target.
    pub fn set_target(&self, host: impl Into<String>, port: u16, timeout_ms: u32, interval_ms: u32) -> bool {
        let defaults = *self.defaults.lock();
        let next = TargetHost::new(
            host,
            port,
            if timeout_ms == 0 { defaults.timeout_ms } else { timeout_ms },
            if interval_ms == 0 { defaults.interval_ms } else { interval_ms },
        );
        debug!("Target set: {}", next);

        let mut target = self.target.lock();
        let changed = !target.same_endpoint(&next);
        *target = next;
        changed
    }

    /// Currently configured target
    pub fn target(&self) -> TargetHost {
        self.target.lock().clone()
    }

    /// Queue a request for the current target
    ///
    /// `Success` once queued; `RequestQueueFull` at capacity; a malformed
    /// message is rejected with its own error.
    pub fn add_request(&self, message: ModbusMessage, token: u32) -> ModbusError {
        let rc = match Self::check_request(&message) {
            Err(e) => e,
            Ok(()) => match self.shared.queue.enqueue(token, message, self.target()) {
                Ok(_) => {
                    self.shared.messages.fetch_add(1, Ordering::Relaxed);
                    ModbusError::Success
                },
                Err(e) => e,
            },
        };
        debug!("Add TCP request result: {:02X}", rc.code());
        rc
    }

    /// Queue a request and wait for its outcome
    ///
    /// The outcome bypasses the handlers. Errors, including rejection at
    /// enqueue time, come back as a message carrying the error. Requires a
    /// started worker.
    pub async fn sync_request(&self, message: ModbusMessage, token: u32) -> ModbusMessage {
        let server_id = message.server_id();
        let function_code = message.function_code();

        if let Err(e) = Self::check_request(&message) {
            return ModbusMessage::error_for(server_id, function_code, e);
        }

        let (tx, rx) = oneshot::channel();
        if let Err(e) = self
            .shared
            .queue
            .enqueue_with_reply(token, message, self.target(), tx)
        {
            return ModbusMessage::error_for(server_id, function_code, e);
        }
        self.shared.messages.fetch_add(1, Ordering::Relaxed);

        match rx.await {
            Ok(response) => response,
            Err(_) => {
                debug!("Sync request discarded: token={}", token);
                ModbusMessage::error_for(server_id, function_code, ModbusError::UndefinedError)
            },
        }
    }

    fn check_request(message: &ModbusMessage) -> Result<(), ModbusError> {
        if message.is_empty() {
            return Err(ModbusError::EmptyMessage);
        }
        match message.error() {
            ModbusError::Success => Ok(()),
            e => Err(e),
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Handler for successful responses
    pub fn on_data_handler<F>(&self, handler: F) -> bool
    where
        F: Fn(ModbusMessage, u32) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_data_handler(Arc::new(handler))
    }

    /// Handler for error outcomes
    pub fn on_error_handler<F>(&self, handler: F) -> bool
    where
        F: Fn(ModbusError, u32) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_error_handler(Arc::new(handler))
    }

    /// Handler for every outcome, exclusive with the data/error pair
    pub fn on_response_handler<F>(&self, handler: F) -> bool
    where
        F: Fn(ModbusMessage, u32) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_response_handler(Arc::new(handler))
    }

    // ========================================================================
    // Queue and statistics
    // ========================================================================

    pub fn pending_requests(&self) -> usize {
        self.shared.queue.len()
    }

    /// Discard every queued request without calling any handler
    pub fn clear_queue(&self) -> usize {
        let discarded = self.shared.queue.clear();
        debug!("Queue cleared: {} discarded", discarded);
        discarded
    }

    pub fn message_count(&self) -> u32 {
        self.shared.messages.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u32 {
        self.shared.errors.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the worker and wait for it to exit
    ///
    /// Queued requests are discarded without callbacks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Worker join: {}", e);
                }
            },
            None => {
                self.shared.queue.clear();
            },
        }
    }
}

impl Drop for ModbusClientTcp {
    fn drop(&mut self) {
        // the worker sees the signal at its next iteration and drains the queue
        self.shutdown.cancel();
        debug!("TCP client worker signalled to stop");
    }
}
