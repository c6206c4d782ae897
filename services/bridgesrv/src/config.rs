//! Service configuration
//!
//! Loaded from a YAML file merged with `BRIDGE_`-prefixed environment
//! variables (nested keys separated by `__`, e.g. `BRIDGE_MQTT__HOST`).

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub rs485: Rs485Config,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Root of the bridge's own state/command topics
    #[serde(default = "default_topic_prefix")]
    pub prefix: String,
    /// Root of the Home Assistant discovery/status topics
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Serial,
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Bytes per read; the EW11 forwards bus data in small bursts
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub tcp: Option<TcpConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Bus-side command pacing
#[derive(Debug, Clone, Deserialize)]
pub struct Rs485Config {
    /// Copies of the frame written per attempt
    #[serde(default = "default_send_count")]
    pub send_count: u32,
    /// Wait after the first transmission before retrying
    #[serde(default = "default_first_delay_ms")]
    pub first_delay_ms: u64,
    /// Randomized backoff window for later retries
    #[serde(default = "default_retry_min_ms")]
    pub retry_min_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Total transmissions before a command is dropped
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds of bus silence before the adapter is reset
    #[serde(default = "default_watchdog_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds to wait after a reset before expecting traffic again
    #[serde(default = "default_watchdog_settle_secs")]
    pub settle_secs: u64,
    #[serde(default)]
    pub reset: Option<ResetConfig>,
}

/// Telnet login endpoint of the EW11 adapter
#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    pub host: String,
    #[serde(default = "default_reset_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_reset_timeout_ms")]
    pub timeout_ms: u64,
}

/// Periodic unconditional republish of all known state
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_refresh_duration_secs")]
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Announcement window after startup or a Home Assistant birth message
    #[serde(default = "default_discovery_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs also go to daily-rolling files in this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "bridgesrv".to_string()
}

fn default_topic_prefix() -> String {
    "ezville".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    64
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_data_bits() -> u8 {
    8
}

fn default_tcp_port() -> u16 {
    8899
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_send_count() -> u32 {
    1
}

fn default_first_delay_ms() -> u64 {
    150
}

fn default_retry_min_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    600
}

fn default_retry_limit() -> u32 {
    5
}

fn default_watchdog_timeout_secs() -> u64 {
    10
}

fn default_watchdog_settle_secs() -> u64 {
    10
}

fn default_reset_port() -> u16 {
    23
}

fn default_reset_timeout_ms() -> u64 {
    3000
}

fn default_refresh_period_secs() -> u64 {
    300
}

fn default_refresh_duration_secs() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_discovery_duration_secs() -> u64 {
    20
}

fn default_node_id() -> String {
    "ezville_wallpad".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_prefix() -> String {
    "bridgesrv".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            prefix: default_topic_prefix(),
            discovery_prefix: default_discovery_prefix(),
            qos: 0,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Tcp,
            chunk_size: default_chunk_size(),
            serial: None,
            tcp: None,
        }
    }
}

impl Default for Rs485Config {
    fn default() -> Self {
        Self {
            send_count: default_send_count(),
            first_delay_ms: default_first_delay_ms(),
            retry_min_ms: default_retry_min_ms(),
            retry_max_ms: default_retry_max_ms(),
            retry_limit: default_retry_limit(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_watchdog_timeout_secs(),
            settle_secs: default_watchdog_settle_secs(),
            reset: None,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            period_secs: default_refresh_period_secs(),
            duration_secs: default_refresh_duration_secs(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: default_discovery_duration_secs(),
            node_id: default_node_id(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        match self.transport.mode {
            TransportMode::Serial if self.transport.serial.is_none() => {
                return Err(BridgeError::Config(
                    "transport.mode is 'serial' but no transport.serial section is present"
                        .to_string(),
                ));
            }
            TransportMode::Tcp if self.transport.tcp.is_none() => {
                return Err(BridgeError::Config(
                    "transport.mode is 'tcp' but no transport.tcp section is present".to_string(),
                ));
            }
            _ => {}
        }
        if self.transport.chunk_size == 0 {
            return Err(BridgeError::Config(
                "transport.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.rs485.retry_min_ms > self.rs485.retry_max_ms {
            return Err(BridgeError::Config(format!(
                "rs485.retry_min_ms ({}) exceeds rs485.retry_max_ms ({})",
                self.rs485.retry_min_ms, self.rs485.retry_max_ms
            )));
        }
        if self.rs485.retry_limit == 0 {
            return Err(BridgeError::Config(
                "rs485.retry_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate the configuration from a YAML file plus environment.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    let config: BridgeConfig = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("BRIDGE_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yml")
            .tempfile()
            .expect("temp file");
        file.write_all(content.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn minimal_tcp_config_fills_defaults() {
        let file = write_config(
            r#"
transport:
  mode: tcp
  tcp:
    host: 192.168.0.10
"#,
        );
        let config = load_config(file.path()).expect("load");
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.prefix, "ezville");
        assert_eq!(config.mqtt.discovery_prefix, "homeassistant");
        assert_eq!(config.transport.chunk_size, 64);
        let tcp = config.transport.tcp.expect("tcp section");
        assert_eq!(tcp.host, "192.168.0.10");
        assert_eq!(tcp.port, 8899);
        assert_eq!(config.rs485.retry_limit, 5);
        assert_eq!(config.refresh.period_secs, 300);
        assert_eq!(config.refresh.duration_secs, 3);
        assert_eq!(config.discovery.duration_secs, 20);
        assert_eq!(config.watchdog.timeout_secs, 10);
    }

    #[test]
    fn serial_mode_requires_serial_section() {
        let file = write_config("transport:\n  mode: serial\n");
        let err = load_config(file.path()).expect_err("must fail");
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn serial_section_defaults() {
        let file = write_config(
            r#"
transport:
  mode: serial
  serial:
    device: /dev/ttyUSB0
"#,
        );
        let config = load_config(file.path()).expect("load");
        let serial = config.transport.serial.expect("serial section");
        assert_eq!(serial.baud_rate, 9600);
        assert_eq!(serial.parity, "none");
        assert_eq!(serial.stop_bits, 1);
        assert_eq!(serial.data_bits, 8);
    }

    #[test]
    fn inverted_retry_window_rejected() {
        let file = write_config(
            r#"
transport:
  mode: tcp
  tcp:
    host: 127.0.0.1
rs485:
  retry_min_ms: 700
  retry_max_ms: 300
"#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
