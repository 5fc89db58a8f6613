//! In-process stand-in for a wallbox, used by tests across the workspace.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{FUNCTION_READ_HOLDING_REGISTERS, MBAP_HEADER_LEN};

const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Misbehaviour injected for a single register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Accept the request and never answer.
    Silent,
    /// Answer with a header announcing a payload, then hang up.
    Truncate,
    /// Answer with a zero byte count and no value bytes.
    EmptyPayload,
}

#[derive(Debug, Default)]
struct SimState {
    values: HashMap<u16, i32>,
    faults: HashMap<u16, Fault>,
    requests: Vec<Vec<u8>>,
    connections: usize,
}

/// Serves holding-register reads from a fixed value table.
pub struct DeviceSimulator {
    addr: SocketAddr,
    state: Arc<Mutex<SimState>>,
    handle: JoinHandle<()>,
}

impl DeviceSimulator {
    pub async fn start(values: HashMap<u16, i32>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(SimState {
            values,
            ..SimState::default()
        }));

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!(%peer, "simulator accepted connection");
                if let Ok(mut guard) = accept_state.lock() {
                    guard.connections += 1;
                }
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_value(&self, address: u16, raw: i32) {
        if let Ok(mut guard) = self.state.lock() {
            guard.values.insert(address, raw);
        }
    }

    pub fn set_fault(&self, address: u16, fault: Fault) {
        if let Ok(mut guard) = self.state.lock() {
            guard.faults.insert(address, fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut guard) = self.state.lock() {
            guard.faults.clear();
        }
    }

    /// Raw request frames received so far, in arrival order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|guard| guard.requests.clone())
            .unwrap_or_default()
    }

    /// Register addresses requested so far, in arrival order.
    pub fn requested_addresses(&self) -> Vec<u16> {
        self.requests()
            .iter()
            .filter_map(|frame| {
                let hi = *frame.get(MBAP_HEADER_LEN + 1)?;
                let lo = *frame.get(MBAP_HEADER_LEN + 2)?;
                Some(u16::from_be_bytes([hi, lo]))
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().map(|guard| guard.connections).unwrap_or(0)
    }
}

impl Drop for DeviceSimulator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Reply {
    Frame(Vec<u8>),
    Hangup(Vec<u8>),
    Nothing,
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<SimState>>) {
    loop {
        let mut header = [0u8; MBAP_HEADER_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let mut request = header.to_vec();
        request.extend_from_slice(&pdu);

        let reply = {
            let Ok(mut guard) = state.lock() else {
                return;
            };
            guard.requests.push(request);
            build_reply(&guard, &header, &pdu)
        };

        match reply {
            Reply::Frame(frame) => {
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            }
            Reply::Hangup(partial) => {
                let _ = stream.write_all(&partial).await;
                let _ = stream.shutdown().await;
                return;
            }
            Reply::Nothing => {}
        }
    }
}

fn build_reply(state: &SimState, header: &[u8; MBAP_HEADER_LEN], pdu: &[u8]) -> Reply {
    let function = pdu.first().copied().unwrap_or(0);
    let address = match (pdu.get(1), pdu.get(2)) {
        (Some(hi), Some(lo)) => u16::from_be_bytes([*hi, *lo]),
        _ => return Reply::Frame(response(header, &[function | 0x80, 0x03])),
    };

    if function != FUNCTION_READ_HOLDING_REGISTERS {
        return Reply::Frame(response(header, &[function | 0x80, 0x01]));
    }

    match state.faults.get(&address) {
        Some(Fault::Silent) => return Reply::Nothing,
        Some(Fault::Truncate) => {
            let mut partial = response(header, &[function, 4, 0, 0, 0, 0]);
            partial.truncate(MBAP_HEADER_LEN + 2);
            return Reply::Hangup(partial);
        }
        Some(Fault::EmptyPayload) => return Reply::Frame(response(header, &[function, 0])),
        None => {}
    }

    match state.values.get(&address) {
        Some(value) => {
            let mut body = vec![function, 4];
            body.extend_from_slice(&value.to_be_bytes());
            Reply::Frame(response(header, &body))
        }
        None => Reply::Frame(response(header, &[function | 0x80, ILLEGAL_DATA_ADDRESS])),
    }
}

fn response(request_header: &[u8; MBAP_HEADER_LEN], body: &[u8]) -> Vec<u8> {
    let length = (1 + body.len()) as u16;
    let [len_hi, len_lo] = length.to_be_bytes();
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + body.len());
    frame.extend_from_slice(&request_header[..4]);
    frame.extend_from_slice(&[len_hi, len_lo, request_header[6]]);
    frame.extend_from_slice(body);
    frame
}
