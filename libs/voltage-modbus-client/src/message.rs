//! Modbus message buffer
//!
//! A message is laid out as `[server id, function code, data...]`, i.e. the
//! part of a Modbus TCP frame following the MBAP header. Requests and
//! responses share the type; an error outcome is a message whose function
//! code carries the exception bit followed by the error code.
//! Use a fixed-size stack array to avoid heap allocation per request.

use tracing::debug;

use crate::constants::{
    EXCEPTION_BIT, MAX_MESSAGE_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::ModbusError;

/// Modbus message (unit id + PDU)
#[derive(Clone)]
pub struct ModbusMessage {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_MESSAGE_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusMessage {
    /// Create an empty message
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_MESSAGE_SIZE],
            len: 0,
        }
    }

    /// Create a message from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self, ModbusError> {
        let mut msg = Self::new();
        msg.extend(data)?;
        Ok(msg)
    }

    /// Build an error message for a request
    pub fn error_for(server_id: u8, function_code: u8, error: ModbusError) -> Self {
        let mut msg = Self::new();
        msg.set_error(server_id, function_code, error);
        msg
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<(), ModbusError> {
        if self.len >= MAX_MESSAGE_SIZE {
            return Err(ModbusError::PacketLengthError);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<(), ModbusError> {
        self.extend(&value.to_be_bytes())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ModbusError> {
        if self.len + data.len() > MAX_MESSAGE_SIZE {
            return Err(ModbusError::PacketLengthError);
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Concatenate another message
    #[inline]
    pub fn append(&mut self, other: &ModbusMessage) -> Result<(), ModbusError> {
        self.extend(other.as_slice())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Server (unit) id, 0 for an empty message
    #[inline]
    pub fn server_id(&self) -> u8 {
        if self.len > 0 {
            self.data[0]
        } else {
            0
        }
    }

    /// Raw function code including the exception bit, 0 if absent
    #[inline]
    pub fn function_code(&self) -> u8 {
        if self.len > 1 {
            self.data[1]
        } else {
            0
        }
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code() & EXCEPTION_BIT != 0
    }

    /// Error carried by this message, `Success` for a regular one
    pub fn error(&self) -> ModbusError {
        if !self.is_exception() {
            return ModbusError::Success;
        }
        if self.len > 2 {
            ModbusError::from(self.data[2])
        } else {
            ModbusError::UndefinedError
        }
    }

    /// Replace the content with an error response
    pub fn set_error(&mut self, server_id: u8, function_code: u8, error: ModbusError) {
        self.data[0] = server_id;
        self.data[1] = function_code | EXCEPTION_BIT;
        self.data[2] = error.code();
        self.len = 3;
    }

    /// Payload after server id and function code
    #[inline]
    pub fn payload(&self) -> &[u8] {
        if self.len > 2 {
            &self.data[2..self.len]
        } else {
            &[]
        }
    }

    // ========================================================================
    // Request builders
    //
    // Parameter violations are stored in the message as its error, so
    // `add_request` rejects them before queuing.
    // ========================================================================

    /// FC01 / FC02 request
    pub fn read_bits(server_id: u8, function_code: u8, address: u16, quantity: u16) -> Self {
        Self::build_request(server_id, function_code, &[0x01, 0x02], || {
            check_quantity(quantity, MAX_READ_BITS)?;
            let mut msg = Self::header(server_id, function_code)?;
            msg.push_u16(address)?;
            msg.push_u16(quantity)?;
            Ok(msg)
        })
    }

    /// FC03 / FC04 request
    pub fn read_registers(server_id: u8, function_code: u8, address: u16, quantity: u16) -> Self {
        Self::build_request(server_id, function_code, &[0x03, 0x04], || {
            check_quantity(quantity, MAX_READ_REGISTERS)?;
            let mut msg = Self::header(server_id, function_code)?;
            msg.push_u16(address)?;
            msg.push_u16(quantity)?;
            Ok(msg)
        })
    }

    /// FC05 request
    pub fn write_single_coil(server_id: u8, address: u16, value: bool) -> Self {
        Self::build_request(server_id, 0x05, &[0x05], || {
            let mut msg = Self::header(server_id, 0x05)?;
            msg.push_u16(address)?;
            msg.push_u16(if value { 0xFF00 } else { 0x0000 })?;
            Ok(msg)
        })
    }

    /// FC06 request
    pub fn write_single_register(server_id: u8, address: u16, value: u16) -> Self {
        Self::build_request(server_id, 0x06, &[0x06], || {
            let mut msg = Self::header(server_id, 0x06)?;
            msg.push_u16(address)?;
            msg.push_u16(value)?;
            Ok(msg)
        })
    }

    /// FC16 request
    pub fn write_multiple_registers(server_id: u8, address: u16, values: &[u16]) -> Self {
        Self::build_request(server_id, 0x10, &[0x10], || {
            let quantity = u16::try_from(values.len()).map_err(|_| ModbusError::ParameterLimitError)?;
            check_quantity(quantity, MAX_WRITE_REGISTERS)?;
            let mut msg = Self::header(server_id, 0x10)?;
            msg.push_u16(address)?;
            msg.push_u16(quantity)?;
            msg.push((quantity * 2) as u8)?;
            for value in values {
                msg.push_u16(*value)?;
            }
            Ok(msg)
        })
    }

    fn header(server_id: u8, function_code: u8) -> Result<Self, ModbusError> {
        let mut msg = Self::new();
        msg.push(server_id)?;
        msg.push(function_code)?;
        Ok(msg)
    }

    fn build_request<F>(server_id: u8, function_code: u8, allowed: &[u8], build: F) -> Self
    where
        F: FnOnce() -> Result<Self, ModbusError>,
    {
        let result = if server_id == 0 {
            Err(ModbusError::InvalidServer)
        } else if !allowed.contains(&function_code) {
            Err(ModbusError::IllegalFunction)
        } else {
            build()
        };

        match result {
            Ok(msg) => {
                debug!(
                    "Request built: slave={} FC={:02X} ({}), len={}",
                    server_id,
                    function_code,
                    function_code_description(function_code),
                    msg.len()
                );
                msg
            },
            Err(e) => {
                debug!(
                    "Request rejected: slave={} FC={:02X}: {}",
                    server_id, function_code, e
                );
                Self::error_for(server_id, function_code, e)
            },
        }
    }

    // ========================================================================
    // Response decoding
    // ========================================================================

    /// Register values of an FC03/FC04 response
    pub fn registers(&self) -> Result<Vec<u16>, ModbusError> {
        let error = self.error();
        if !error.is_success() {
            return Err(error);
        }
        let payload = self.payload();
        let Some((&byte_count, words)) = payload.split_first() else {
            return Err(ModbusError::PacketLengthError);
        };
        if words.len() != byte_count as usize || words.len() % 2 != 0 {
            return Err(ModbusError::PacketLengthError);
        }
        Ok(words
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect())
    }
}

impl Default for ModbusMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ModbusMessage {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ModbusMessage {}

impl std::fmt::Debug for ModbusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusMessage")
            .field("data", &crate::frame::format_hex(self.as_slice()))
            .finish()
    }
}

fn check_quantity(quantity: u16, max: u16) -> Result<(), ModbusError> {
    if quantity == 0 || quantity > max {
        return Err(ModbusError::ParameterLimitError);
    }
    Ok(())
}

/// Get human-readable function code description
pub(crate) fn function_code_description(fc: u8) -> &'static str {
    match fc & 0x7F {
        // Remove exception bit for lookup
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        0x17 => "Read/Write Multiple Registers",
        _ => "Unknown Function",
    }
}
