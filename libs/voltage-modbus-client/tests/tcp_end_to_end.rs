//! End-to-end tests over real sockets
//!
//! A small in-memory Modbus TCP server stands in for the device; the client
//! runs with its production `TcpTransport`.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{collect_outcomes, Outcome};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use voltage_modbus_client::{ModbusClientTcp, ModbusError, ModbusMessage, TcpTransport};

/// Registers 0..REGISTER_COUNT exist; anything beyond is an illegal address
const REGISTER_COUNT: u16 = 100;

#[derive(Clone, Default)]
struct Simulator {
    holding: Arc<Mutex<HashMap<u16, u16>>>,
}

impl Simulator {
    fn with_test_data() -> Self {
        let sim = Self::default();
        {
            let mut holding = sim.holding.lock();
            for addr in 0..REGISTER_COUNT {
                holding.insert(addr, addr * 10);
            }
        }
        sim
    }

    async fn start(self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let sim = self.clone();
                tokio::spawn(async move { sim.serve(stream).await });
            }
        });
        addr
    }

    async fn serve(&self, mut stream: TcpStream) {
        let mut buf = [0u8; 260];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if n < 12 || buf[2] != 0 || buf[3] != 0 {
                continue;
            }
            let tid = u16::from_be_bytes([buf[0], buf[1]]);
            let reply = self.handle(buf[6], buf[7], &buf[8..n]);

            let mut frame = Vec::with_capacity(6 + reply.len());
            frame.extend_from_slice(&tid.to_be_bytes());
            frame.extend_from_slice(&[0x00, 0x00]);
            frame.extend_from_slice(&(reply.len() as u16).to_be_bytes());
            frame.extend_from_slice(&reply);
            if stream.write_all(&frame).await.is_err() {
                break;
            }
        }
    }

    /// Message part of the response: unit id, function code, data
    fn handle(&self, unit: u8, fc: u8, data: &[u8]) -> Vec<u8> {
        let first = u16::from_be_bytes([data[0], data[1]]);
        let second = u16::from_be_bytes([data[2], data[3]]);
        let mut holding = self.holding.lock();
        match fc {
            0x03 => {
                if first.saturating_add(second) > REGISTER_COUNT {
                    return vec![unit, fc | 0x80, 0x02];
                }
                let mut reply = vec![unit, fc, (second * 2) as u8];
                for addr in first..first + second {
                    let value = holding.get(&addr).copied().unwrap_or(0);
                    reply.extend_from_slice(&value.to_be_bytes());
                }
                reply
            },
            0x06 => {
                if first >= REGISTER_COUNT {
                    return vec![unit, fc | 0x80, 0x02];
                }
                holding.insert(first, second);
                let mut reply = vec![unit, fc];
                reply.extend_from_slice(&data[..4]);
                reply
            },
            _ => vec![unit, fc | 0x80, 0x01],
        }
    }
}

async fn next(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_read_holding_registers_end_to_end() {
    let addr = Simulator::with_test_data().start().await;
    let client = ModbusClientTcp::with_target(TcpTransport::new(), "127.0.0.1", addr.port(), 10);
    let mut rx = collect_outcomes(&client);
    client.begin();

    let rc = client.add_request(ModbusMessage::read_registers(1, 0x03, 0x0000, 3), 42);
    assert_eq!(rc, ModbusError::Success);

    match next(&mut rx).await {
        Outcome::Data(token, msg) => {
            assert_eq!(token, 42);
            assert_eq!(msg.len(), 9);
            assert_eq!(msg.server_id(), 1);
            assert_eq!(msg.function_code(), 0x03);
            assert_eq!(msg.registers().unwrap(), vec![0, 10, 20]);
        },
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(client.pending_requests(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test]
async fn test_write_then_read_back() {
    let addr = Simulator::with_test_data().start().await;
    let client = ModbusClientTcp::with_target(TcpTransport::new(), "127.0.0.1", addr.port(), 10);
    client.begin();

    let written = client
        .sync_request(ModbusMessage::write_single_register(1, 0x0005, 0xBEEF), 1)
        .await;
    assert_eq!(written.error(), ModbusError::Success);
    assert_eq!(written.as_slice(), &[0x01, 0x06, 0x00, 0x05, 0xBE, 0xEF]);

    let read = client
        .sync_request(ModbusMessage::read_registers(1, 0x03, 0x0004, 2), 2)
        .await;
    assert_eq!(read.registers().unwrap(), vec![40, 0xBEEF]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_exception_end_to_end() {
    let addr = Simulator::with_test_data().start().await;
    let client = ModbusClientTcp::with_target(TcpTransport::new(), "127.0.0.1", addr.port(), 10);
    let mut rx = collect_outcomes(&client);
    client.begin();

    client.add_request(ModbusMessage::read_registers(1, 0x03, 98, 5), 7);
    assert_eq!(next(&mut rx).await, Outcome::Error(7, ModbusError::IllegalDataAddress));
    assert_eq!(client.error_count(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_switch_between_servers() {
    let first = Simulator::with_test_data().start().await;
    let second_sim = Simulator::with_test_data();
    second_sim.holding.lock().insert(0, 0x0BAD);
    let second = second_sim.start().await;

    let client = ModbusClientTcp::with_target(TcpTransport::new(), "127.0.0.1", first.port(), 10);
    let mut rx = collect_outcomes(&client);
    client.begin();

    client.add_request(ModbusMessage::read_registers(1, 0x03, 0, 1), 1);
    assert!(client.set_target("127.0.0.1", second.port(), 0, 0));
    client.add_request(ModbusMessage::read_registers(1, 0x03, 0, 1), 2);

    match next(&mut rx).await {
        Outcome::Data(1, msg) => assert_eq!(msg.registers().unwrap(), vec![0]),
        other => panic!("unexpected outcome: {other:?}"),
    }
    match next(&mut rx).await {
        Outcome::Data(2, msg) => assert_eq!(msg.registers().unwrap(), vec![0x0BAD]),
        other => panic!("unexpected outcome: {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = ModbusClientTcp::with_target(TcpTransport::new(), "127.0.0.1", port, 10);
    client.set_target("127.0.0.1", port, 200, 0);
    let mut rx = collect_outcomes(&client);
    client.begin();

    client.add_request(ModbusMessage::read_registers(1, 0x03, 0, 1), 3);
    assert_eq!(next(&mut rx).await, Outcome::Error(3, ModbusError::IpConnectionFailed));

    client.shutdown().await;
}
