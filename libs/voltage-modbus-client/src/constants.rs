//! Modbus TCP client constants

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length: Transaction ID(2) + Protocol ID(2) + Length(2)
///
/// The unit identifier that follows is counted as part of the message.
pub const MBAP_HEADER_LEN: usize = 6;

/// Protocol identifier for Modbus, always 0
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum PDU size (RS485 ADU 256 - address 1 - CRC 2)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum message size: unit id + PDU
pub const MAX_MESSAGE_SIZE: usize = 1 + MAX_PDU_SIZE;

/// Receive buffer size; the largest TCP frame is 6 + 254 = 260 bytes
pub const RESPONSE_BUFFER_SIZE: usize = 300;

/// Function code bit flagging an exception response
pub const EXCEPTION_BIT: u8 = 0x80;

// ============================================================================
// Operation Limits
// ============================================================================

/// FC01/FC02 maximum quantity
pub const MAX_READ_BITS: u16 = 2000;

/// FC03/FC04 maximum quantity
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC16 maximum quantity
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Client Defaults
// ============================================================================

/// Default response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 2000;

/// Default minimum gap between two requests to the same target, in milliseconds
pub const DEFAULT_INTERVAL_MS: u32 = 10;

/// Default request queue capacity
pub const DEFAULT_QUEUE_LIMIT: usize = 100;

/// Default Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Attempts granted beyond the first for connect failures and timeouts
pub const RETRIES: u8 = 2;

/// Worker polling granularity
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Pause after a failed connection attempt before the next one
pub const CONNECT_RETRY_BACKOFF: Duration = Duration::from_millis(10);
