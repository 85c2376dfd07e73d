//! Voltage Modbus TCP Client
//!
//! A queued, retrying Modbus TCP client. Requests from any number of tasks
//! are accepted into a bounded FIFO, served one at a time by a single
//! worker task over one connection, matched to their response through the
//! MBAP header, and reported back asynchronously with the caller's token.
//!
//! # Architecture
//!
//! ```text
//! producers ──► RequestQueue ──► Worker
//!                                  ├── SessionManager (connect / reuse / pace)
//!                                  ├── frame (MBAP build / validate)
//!                                  ├── RetryController (connect + timeout budget)
//!                                  └── Dispatcher ──► handlers / sync caller
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use voltage_modbus_client::{ModbusClientTcp, ModbusError, ModbusMessage, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ModbusClientTcp::with_target(TcpTransport::new(), "10.0.0.5", 502, 100);
//!     client.on_data_handler(|response, token| {
//!         println!("token {token}: {:?}", response.registers());
//!     });
//!     client.on_error_handler(|error, token| {
//!         eprintln!("token {token}: {error}");
//!     });
//!     client.begin();
//!
//!     let rc = client.add_request(ModbusMessage::read_registers(1, 0x03, 0, 10), 42);
//!     assert_eq!(rc, ModbusError::Success);
//! }
//! ```

mod client;
mod config;
mod constants;
mod dispatch;
mod error;
mod frame;
mod message;
mod queue;
mod retry;
mod session;
mod target;
mod transport;
mod worker;

pub use client::ModbusClientTcp;
pub use config::{ClientConfig, TargetConfig, ENV_PREFIX};
pub use dispatch::{DataHandler, Dispatcher, ErrorHandler, ResponseHandler};
pub use error::{ConfigError, ModbusError, TransportError, TransportResult};
pub use frame::{build_frame, format_hex, frame_complete, validate_response, MbapHeader};
pub use message::ModbusMessage;
pub use queue::{RequestEntry, RequestQueue};
pub use retry::{Attempt, Decision, Phase, RetryController};
pub use session::SessionManager;
pub use target::TargetHost;
pub use transport::{TcpTransport, Transport};

pub use constants::{
    CONNECT_RETRY_BACKOFF, DEFAULT_INTERVAL_MS, DEFAULT_PORT, DEFAULT_QUEUE_LIMIT,
    DEFAULT_TIMEOUT_MS, MAX_MESSAGE_SIZE, MAX_PDU_SIZE, MBAP_HEADER_LEN, POLL_INTERVAL,
    RESPONSE_BUFFER_SIZE, RETRIES,
};
