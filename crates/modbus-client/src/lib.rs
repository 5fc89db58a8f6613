#![allow(dead_code)]

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

#[cfg(feature = "simulator")]
pub mod simulator;

pub const DEFAULT_PORT: u16 = 502;
pub const FUNCTION_READ_HOLDING_REGISTERS: u8 = 0x03;
/// The wallbox expects every request under the same transaction id.
pub const TRANSACTION_ID: u16 = 1;
pub const MBAP_HEADER_LEN: usize = 7;
/// Unit id (1) plus the largest Modbus PDU (253).
pub const MAX_MBAP_LENGTH: usize = 254;
/// Register count byte sent after the address.
const REGISTER_COUNT: u8 = 0x01;
const EXCEPTION_FLAG: u8 = 0x80;

/// Configuration options for connecting to and reading from the wallbox.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Unit identifier placed in the MBAP header.
    pub unit_id: u8,
    /// Upper bound for establishing the TCP session, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound for one request/response exchange, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            unit_id: 0,
            connect_timeout_ms: 3_000,
            timeout_ms: 300,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("wallbox host must not be empty")]
    EmptyHost,
    #[error("invalid wallbox port {0}")]
    InvalidPort(u16),
    #[error("connect to {host}:{port} timed out after {timeout_ms}ms")]
    Timeout {
        host: String,
        port: u16,
        timeout_ms: u64,
    },
    #[error("connect to {host}:{port} failed: {source}")]
    Io {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("short response frame: {actual} bytes, expected {expected}")]
    ShortFrame { expected: usize, actual: usize },
    #[error("device answered function {function:#04x} with exception {code:#04x}")]
    Exception { function: u8, code: u8 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One TCP session to the wallbox. Exchanges are strictly sequential.
#[derive(Debug)]
pub struct Connection {
    peer: String,
    unit_id: u8,
    timeout_ms: u64,
    stream: Option<TcpStream>,
}

pub async fn connect(config: &ClientConfig) -> Result<Connection, ConnectionError> {
    if config.host.trim().is_empty() {
        return Err(ConnectionError::EmptyHost);
    }
    if config.port == 0 {
        return Err(ConnectionError::InvalidPort(config.port));
    }

    let attempt = TcpStream::connect((config.host.as_str(), config.port));
    let stream = match timeout(Duration::from_millis(config.connect_timeout_ms), attempt).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(ConnectionError::Io {
                host: config.host.clone(),
                port: config.port,
                source,
            })
        }
        Err(_) => {
            return Err(ConnectionError::Timeout {
                host: config.host.clone(),
                port: config.port,
                timeout_ms: config.connect_timeout_ms,
            })
        }
    };
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "could not disable nagle");
    }

    let peer = format!("{}:{}", config.host, config.port);
    debug!(peer = %peer, "modbus session opened");
    Ok(Connection {
        peer,
        unit_id: config.unit_id,
        timeout_ms: config.timeout_ms,
        stream: Some(stream),
    })
}

/// Builds the request frame for a single holding register read.
pub fn read_request(unit_id: u8, address: u16) -> Vec<u8> {
    let [address_hi, address_lo] = address.to_be_bytes();
    let pdu = [
        FUNCTION_READ_HOLDING_REGISTERS,
        address_hi,
        address_lo,
        REGISTER_COUNT,
    ];
    // Length counts the unit id plus the PDU.
    let length = (1 + pdu.len()) as u16;
    let [txn_hi, txn_lo] = TRANSACTION_ID.to_be_bytes();
    let [len_hi, len_lo] = length.to_be_bytes();

    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&[txn_hi, txn_lo, 0x00, 0x00, len_hi, len_lo, unit_id]);
    frame.extend_from_slice(&pdu);
    frame
}

impl Connection {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Reads one holding register and returns the response payload that follows
    /// the function code (byte count, then the register bytes).
    pub async fn read_holding_register(&mut self, address: u16) -> Result<Vec<u8>, TransportError> {
        let timeout_ms = self.timeout_ms;
        let unit_id = self.unit_id;
        let stream = self.stream.as_mut().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection already closed",
            ))
        })?;

        let request = read_request(unit_id, address);
        let result = timeout(Duration::from_millis(timeout_ms), exchange(stream, &request)).await;
        match result {
            Ok(Ok(payload)) => {
                debug!(address, len = payload.len(), "modbus read ok");
                Ok(payload)
            }
            Ok(Err(err)) => {
                warn!(address, error = %err, "modbus read error");
                Err(err)
            }
            Err(_) => {
                warn!(address, timeout_ms, "modbus read timeout");
                Err(TransportError::Timeout { timeout_ms })
            }
        }
    }

    /// Closes the session. Calling it again is a no-op.
    pub async fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if let Err(err) = stream.shutdown().await {
            warn!(peer = %self.peer, error = %err, "modbus session shutdown failed");
        } else {
            debug!(peer = %self.peer, "modbus session closed");
        }
    }
}

async fn exchange(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>, TransportError> {
    stream.write_all(request).await?;

    let mut header = [0u8; MBAP_HEADER_LEN];
    read_exact_or_short(stream, &mut header, 0).await?;

    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    if length > MAX_MBAP_LENGTH {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid mbap length {length}"),
        )));
    }
    // Unit id is part of the header; a response needs at least a function code on top.
    if length < 2 {
        return Err(TransportError::ShortFrame {
            expected: MBAP_HEADER_LEN + 1,
            actual: MBAP_HEADER_LEN + length.saturating_sub(1),
        });
    }

    let total = MBAP_HEADER_LEN + length - 1;
    let mut frame = vec![0u8; total];
    frame[..MBAP_HEADER_LEN].copy_from_slice(&header);
    read_exact_or_short(stream, &mut frame[MBAP_HEADER_LEN..], MBAP_HEADER_LEN).await?;

    let function = frame[MBAP_HEADER_LEN];
    if function & EXCEPTION_FLAG != 0 {
        let code = frame.get(MBAP_HEADER_LEN + 1).copied().unwrap_or(0);
        return Err(TransportError::Exception {
            function: function & !EXCEPTION_FLAG,
            code,
        });
    }

    Ok(frame.split_off(MBAP_HEADER_LEN + 1))
}

/// Like `read_exact`, but reports a peer hang-up mid-frame as a short frame.
async fn read_exact_or_short(
    stream: &mut TcpStream,
    buf: &mut [u8],
    already_read: usize,
) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TransportError::ShortFrame {
                expected: already_read + buf.len(),
                actual: already_read + filled,
            });
        }
        filled += n;
    }
    Ok(())
}
