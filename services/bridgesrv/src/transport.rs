//! Bus transports
//!
//! The wallpad bus reaches us either through a local RS485 serial adapter or
//! through an Elfin EW11 TCP bridge. Both are plain byte pipes; framing is
//! the decoder's job.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

use crate::config::{SerialConfig, TcpConfig, TransportConfig, TransportMode};
use crate::error::{BridgeError, Result};

/// Byte pipe to the wallpad bus.
#[async_trait]
pub trait BusTransport: Send {
    /// Read the next burst of bus bytes; may return fewer than `buf.len()`.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write one complete frame.
    async fn send(&mut self, frame: &[u8]) -> Result<()>;
}

#[async_trait]
impl BusTransport for Box<dyn BusTransport> {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).recv(buf).await
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        (**self).send(frame).await
    }
}

/// Open the transport selected by the configuration.
pub async fn connect(config: &TransportConfig) -> Result<Box<dyn BusTransport>> {
    match config.mode {
        TransportMode::Serial => {
            let serial = config.serial.as_ref().ok_or_else(|| {
                BridgeError::Config("serial transport selected without a serial section".into())
            })?;
            Ok(Box::new(SerialTransport::open(serial)?))
        }
        TransportMode::Tcp => {
            let tcp = config.tcp.as_ref().ok_or_else(|| {
                BridgeError::Config("tcp transport selected without a tcp section".into())
            })?;
            Ok(Box::new(TcpTransport::connect(tcp).await?))
        }
    }
}

/// Direct RS485 serial adapter.
pub struct SerialTransport {
    stream: SerialStream,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let parity = parse_parity(&config.parity)?;
        let stop_bits = parse_stop_bits(config.stop_bits)?;
        let data_bits = parse_data_bits(config.data_bits)?;
        let stream = tokio_serial::new(&config.device, config.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .open_native_async()?;
        info!(
            "Serial transport open: {} @ {} {}{}{}",
            config.device, config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );
        Ok(Self { stream })
    }
}

#[async_trait]
impl BusTransport for SerialTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream.read(buf).await?;
        if n == 0 {
            return Err(BridgeError::Transport("serial stream closed".into()));
        }
        Ok(n)
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Elfin EW11 (or compatible) TCP-to-RS485 bridge.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub async fn connect(config: &TcpConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| BridgeError::Transport(format!("connect to {} timed out", addr)))??;
        stream
            .set_nodelay(true)
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        info!("TCP transport connected to {}", addr);
        Ok(Self { stream })
    }
}

#[async_trait]
impl BusTransport for TcpTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream.read(buf).await?;
        if n == 0 {
            return Err(BridgeError::Transport("bus connection closed by peer".into()));
        }
        Ok(n)
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

fn parse_parity(value: &str) -> Result<Parity> {
    match value.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "even" => Ok(Parity::Even),
        "odd" => Ok(Parity::Odd),
        other => Err(BridgeError::Config(format!("unknown parity '{}'", other))),
    }
}

fn parse_stop_bits(value: u8) -> Result<StopBits> {
    match value {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(BridgeError::Config(format!(
            "unsupported stop bits: {}",
            other
        ))),
    }
}

fn parse_data_bits(value: u8) -> Result<DataBits> {
    match value {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(BridgeError::Config(format!(
            "unsupported data bits: {}",
            other
        ))),
    }
}
