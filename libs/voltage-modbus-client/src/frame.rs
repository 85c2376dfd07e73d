//! MBAP framing
//!
//! Builds the Modbus TCP frame for a queued request and checks a received
//! frame against it. Frame layout:
//!
//! ```text
//! [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][FC(1)][Data...]
//! ```
//!
//! The length field counts every byte after the header, unit id included.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::constants::{EXCEPTION_BIT, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};
use crate::error::ModbusError;
use crate::message::ModbusMessage;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (fixed to 0)
    pub protocol_id: u16,
    /// Number of bytes following the header
    pub length: u16,
}

impl MbapHeader {
    /// Header for a message of `length` bytes
    pub fn new(transaction_id: u16, length: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length,
        }
    }

    /// Big-endian wire form
    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1]]
    }

    /// Read a header from the start of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MBAP_HEADER_LEN {
            return None;
        }
        Some(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
        })
    }
}

/// Header + message in one contiguous buffer
pub fn build_frame(header: &MbapHeader, msg: &ModbusMessage) -> Bytes {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + msg.len());
    frame.put_slice(&header.to_bytes());
    frame.put_slice(msg.as_slice());

    debug!(
        "Building TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, len={}",
        header.transaction_id,
        msg.server_id(),
        msg.function_code(),
        msg.len()
    );

    frame.freeze()
}

/// True once `data` holds the whole frame its header announces
pub fn frame_complete(data: &[u8]) -> bool {
    match MbapHeader::parse(data) {
        Some(header) => data.len() >= MBAP_HEADER_LEN + header.length as usize,
        None => false,
    }
}

/// Check a received frame against the request it answers
///
/// First match wins: header (transaction id, protocol id, length against
/// the bytes actually received), server id, function code with the
/// exception bit masked off. A frame passing all checks yields the message
/// part; otherwise the returned message carries the error.
pub fn validate_response(sent: &MbapHeader, request: &ModbusMessage, data: &[u8]) -> ModbusMessage {
    let server_id = request.server_id();
    let function_code = request.function_code();

    let received_len = data.len().saturating_sub(MBAP_HEADER_LEN);
    let expected = u16::try_from(received_len)
        .ok()
        .map(|len| MbapHeader::new(sent.transaction_id, len).to_bytes());

    let head_matches = data.len() >= MBAP_HEADER_LEN
        && expected.is_some_and(|head| head[..] == data[..MBAP_HEADER_LEN]);
    if !head_matches {
        debug!(
            "TCP header mismatch: trans_id={:04X}, got {}",
            sent.transaction_id,
            format_hex(&data[..data.len().min(MBAP_HEADER_LEN)])
        );
        return ModbusMessage::error_for(server_id, function_code, ModbusError::TcpHeadMismatch);
    }

    if data.len() < MBAP_HEADER_LEN + 2 {
        return ModbusMessage::error_for(server_id, function_code, ModbusError::PacketLengthError);
    }

    if data[MBAP_HEADER_LEN] != server_id {
        debug!(
            "Server id mismatch: expected={}, got={}",
            server_id, data[MBAP_HEADER_LEN]
        );
        return ModbusMessage::error_for(server_id, function_code, ModbusError::ServerIdMismatch);
    }

    if data[MBAP_HEADER_LEN + 1] & !EXCEPTION_BIT != function_code {
        debug!(
            "FC mismatch: expected={:02X}, got={:02X}",
            function_code,
            data[MBAP_HEADER_LEN + 1]
        );
        return ModbusMessage::error_for(server_id, function_code, ModbusError::FcMismatch);
    }

    match ModbusMessage::from_slice(&data[MBAP_HEADER_LEN..]) {
        Ok(msg) => msg,
        Err(e) => ModbusMessage::error_for(server_id, function_code, e),
    }
}

/// Compact hex dump for frame logging
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
