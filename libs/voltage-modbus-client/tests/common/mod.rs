//! Shared test helpers
//!
//! `MockTransport` is a scripted transport: each write pops the next
//! `Reply` from the script and schedules its bytes for later `try_read`
//! calls. Its state is shared so tests can inspect it after handing the
//! transport to a client.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use voltage_modbus_client::{
    ModbusClientTcp, ModbusError, ModbusMessage, Transport, TransportError, TransportResult,
};

/// Scripted answer to one written frame
#[derive(Debug, Clone)]
pub enum Reply {
    /// Unit id + PDU, framed with the request's transaction id
    Respond(Vec<u8>),
    /// Exact bytes
    Raw(Vec<u8>),
    /// Framed response arriving after a delay
    Delayed(Vec<u8>, Duration),
    /// Framed response split at `split`, second part after `gap`
    Fragmented {
        message: Vec<u8>,
        split: usize,
        gap: Duration,
    },
    /// Nothing at all
    Silent,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub connected: bool,
    /// Refuse this many connection attempts (`usize::MAX` = always)
    pub refuse_connects: usize,
    pub connects: Vec<String>,
    pub stops: usize,
    pub sent: Vec<Vec<u8>>,
    pub sent_at: Vec<Instant>,
    pub script: VecDeque<Reply>,
    pending: VecDeque<(Instant, Vec<u8>)>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.state.lock().script.extend(replies);
    }

    pub fn refuse_connects(&self, count: usize) {
        self.state.lock().refuse_connects = count;
    }

    /// Bytes that arrive without being asked for
    pub fn inject(&self, bytes: Vec<u8>) {
        self.state.lock().pending.push_back((Instant::now(), bytes));
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.state.lock().sent_at.clone()
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().connects.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }
}

fn frame_for(request: &[u8], message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + message.len());
    frame.extend_from_slice(&request[..2]);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&(message.len() as u16).to_be_bytes());
    frame.extend_from_slice(message);
    frame
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, host: &str, port: u16, _timeout: Duration) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.connects.push(format!("{host}:{port}"));
        if state.refuse_connects > 0 {
            if state.refuse_connects != usize::MAX {
                state.refuse_connects -= 1;
            }
            return Err(TransportError::ConnectionFailed("mock refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn stop(&mut self) {
        let mut state = self.state.lock();
        if state.connected {
            state.stops += 1;
        }
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn try_read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let ready = matches!(state.pending.front(), Some((at, _)) if *at <= Instant::now());
        if !ready {
            return Ok(0);
        }
        let Some((at, mut bytes)) = state.pending.pop_front() else {
            return Ok(0);
        };
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        if n < bytes.len() {
            let rest = bytes.split_off(n);
            state.pending.push_front((at, rest));
        }
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(data.to_vec());
        state.sent_at.push(Instant::now());

        let now = Instant::now();
        match state.script.pop_front().unwrap_or(Reply::Silent) {
            Reply::Respond(message) => state.pending.push_back((now, frame_for(data, &message))),
            Reply::Raw(bytes) => state.pending.push_back((now, bytes)),
            Reply::Delayed(message, delay) => {
                state.pending.push_back((now + delay, frame_for(data, &message)))
            },
            Reply::Fragmented {
                message,
                split,
                gap,
            } => {
                let mut frame = frame_for(data, &message);
                let tail = frame.split_off(split);
                state.pending.push_back((now, frame));
                state.pending.push_back((now + gap, tail));
            },
            Reply::Silent => {},
        }
        Ok(())
    }

    async fn flush(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// Outcome seen by the handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Data(u32, ModbusMessage),
    Error(u32, ModbusError),
}

impl Outcome {
    pub fn token(&self) -> u32 {
        match self {
            Outcome::Data(token, _) | Outcome::Error(token, _) => *token,
        }
    }
}

/// Wire data/error handlers into a channel
pub fn collect_outcomes(client: &ModbusClientTcp) -> mpsc::UnboundedReceiver<Outcome> {
    let (tx, rx) = mpsc::unbounded_channel();
    let data_tx = tx.clone();
    client.on_data_handler(move |msg, token| {
        let _ = data_tx.send(Outcome::Data(token, msg));
    });
    client.on_error_handler(move |err, token| {
        let _ = tx.send(Outcome::Error(token, err));
    });
    rx
}

/// Read-holding-registers request for unit 1
pub fn read_request(quantity: u16) -> ModbusMessage {
    ModbusMessage::read_registers(1, 0x03, 0x0000, quantity)
}

/// Matching FC03 response message part with `values`
pub fn read_response(values: &[u16]) -> Vec<u8> {
    let mut message = vec![0x01, 0x03, (values.len() * 2) as u8];
    for v in values {
        message.extend_from_slice(&v.to_be_bytes());
    }
    message
}

/// Transaction id of a sent frame
pub fn transaction_id(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[0], frame[1]])
}
