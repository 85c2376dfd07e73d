//! Client Error Types
//!
//! `ModbusError` is the result code carried by every request outcome, both
//! the server exception codes defined by Modbus and the client-side
//! conditions detected by the queue, the session and the frame checks.
//! `TransportError` and `ConfigError` cover the socket and configuration
//! layers and never reach request callbacks directly.

use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Request outcome codes
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusError {
    #[error("Success")]
    Success = 0x00,

    // ======================================
    // Server exceptions
    // ======================================
    #[error("Illegal function")]
    IllegalFunction = 0x01,

    #[error("Illegal data address")]
    IllegalDataAddress = 0x02,

    #[error("Illegal data value")]
    IllegalDataValue = 0x03,

    #[error("Server device failure")]
    ServerDeviceFailure = 0x04,

    #[error("Acknowledge")]
    Acknowledge = 0x05,

    #[error("Server device busy")]
    ServerDeviceBusy = 0x06,

    #[error("Negative acknowledge")]
    NegativeAcknowledge = 0x07,

    #[error("Memory parity error")]
    MemoryParityError = 0x08,

    #[error("Gateway path unavailable")]
    GatewayPathUnavailable = 0x0A,

    #[error("Gateway target device failed to respond")]
    GatewayTargetNoResponse = 0x0B,

    // ======================================
    // Client conditions
    // ======================================
    #[error("Timeout")]
    Timeout = 0xE0,

    #[error("Invalid server id")]
    InvalidServer = 0xE1,

    #[error("CRC check error")]
    CrcError = 0xE2,

    #[error("Function code mismatch")]
    FcMismatch = 0xE3,

    #[error("Server id mismatch")]
    ServerIdMismatch = 0xE4,

    #[error("Packet length error")]
    PacketLengthError = 0xE5,

    #[error("Wrong number of parameters")]
    ParameterCountError = 0xE6,

    #[error("Parameter out of limits")]
    ParameterLimitError = 0xE7,

    #[error("Request queue full")]
    RequestQueueFull = 0xE8,

    #[error("Illegal IP or port")]
    IllegalIpOrPort = 0xE9,

    #[error("IP connection failed")]
    IpConnectionFailed = 0xEA,

    #[error("TCP header mismatch")]
    TcpHeadMismatch = 0xEB,

    #[error("Empty message")]
    EmptyMessage = 0xEC,

    #[error("Undefined error")]
    UndefinedError = 0xFF,
}

impl ModbusError {
    /// Wire value of this code
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ModbusError::Success
    }

    /// Exceptions reported by the server itself (as opposed to the client)
    pub fn is_server_exception(self) -> bool {
        (0x01..=0x0B).contains(&self.code())
    }
}

impl From<u8> for ModbusError {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ModbusError::Success,
            0x01 => ModbusError::IllegalFunction,
            0x02 => ModbusError::IllegalDataAddress,
            0x03 => ModbusError::IllegalDataValue,
            0x04 => ModbusError::ServerDeviceFailure,
            0x05 => ModbusError::Acknowledge,
            0x06 => ModbusError::ServerDeviceBusy,
            0x07 => ModbusError::NegativeAcknowledge,
            0x08 => ModbusError::MemoryParityError,
            0x0A => ModbusError::GatewayPathUnavailable,
            0x0B => ModbusError::GatewayTargetNoResponse,
            0xE0 => ModbusError::Timeout,
            0xE1 => ModbusError::InvalidServer,
            0xE2 => ModbusError::CrcError,
            0xE3 => ModbusError::FcMismatch,
            0xE4 => ModbusError::ServerIdMismatch,
            0xE5 => ModbusError::PacketLengthError,
            0xE6 => ModbusError::ParameterCountError,
            0xE7 => ModbusError::ParameterLimitError,
            0xE8 => ModbusError::RequestQueueFull,
            0xE9 => ModbusError::IllegalIpOrPort,
            0xEA => ModbusError::IpConnectionFailed,
            0xEB => ModbusError::TcpHeadMismatch,
            0xEC => ModbusError::EmptyMessage,
            _ => ModbusError::UndefinedError,
        }
    }
}

/// Socket level errors
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed or reset an open connection
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl TransportError {
    /// Check if this error leaves the connection unusable
    pub fn needs_reconnect(&self) -> bool {
        match self {
            TransportError::Io(msg) => {
                msg.contains("Broken pipe")
                    || msg.contains("Connection reset")
                    || msg.contains("Connection refused")
                    || msg.contains("Connection aborted")
                    || msg.contains("Network is unreachable")
            },
            TransportError::ConnectionFailed(_)
            | TransportError::ConnectionLost(_)
            | TransportError::NotConnected => true,
            TransportError::Timeout(_) => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
