//! EW11 adapter reset
//!
//! The Elfin EW11 exposes a telnet console; logging in and issuing `Restart`
//! power-cycles its RS485 side. The watchdog calls this when the bus goes
//! quiet. Failures are reported to the caller, which logs and tries again on
//! the next watchdog cycle.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ResetConfig;
use crate::error::{BridgeError, Result};

pub struct BusReset {
    config: ResetConfig,
}

impl BusReset {
    pub fn new(config: ResetConfig) -> Self {
        Self { config }
    }

    /// Log in to the adapter console and issue a restart.
    pub async fn trigger(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let io_timeout = Duration::from_millis(self.config.timeout_ms);
        debug!("Connecting to bus adapter console at {}", addr);

        let mut stream = timeout(io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BridgeError::Transport(format!("connect to {} timed out", addr)))??;

        read_until(&mut stream, "login:", io_timeout).await?;
        stream
            .write_all(format!("{}\n", self.config.username).as_bytes())
            .await?;
        read_until(&mut stream, "password:", io_timeout).await?;
        stream
            .write_all(format!("{}\n", self.config.password).as_bytes())
            .await?;
        stream.write_all(b"Restart\n").await?;
        stream.flush().await?;

        info!("Bus adapter restart issued to {}", addr);
        Ok(())
    }
}

async fn read_until(stream: &mut TcpStream, token: &str, io_timeout: Duration) -> Result<()> {
    let mut seen = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = timeout(io_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| {
                BridgeError::Transport(format!("timed out waiting for console prompt '{}'", token))
            })??;
        if n == 0 {
            return Err(BridgeError::Transport(format!(
                "console closed while waiting for '{}'",
                token
            )));
        }
        seen.extend_from_slice(&buf[..n]);
        if String::from_utf8_lossy(&seen)
            .to_ascii_lowercase()
            .contains(token)
        {
            return Ok(());
        }
    }
}
