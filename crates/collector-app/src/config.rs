use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use modbus_client::ClientConfig;
use poller_actor::SchedulerConfig;

const DEFAULT_STATE_WAIT_MS: u64 = 10_000;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub modbus: ClientConfig,
    pub poller: SchedulerConfig,
    /// Port the HTTP API listens on. Mandatory.
    pub api_port: Option<u16>,
    pub bind_address: String,
    /// How long `/state` waits for the first snapshot before answering 503.
    pub state_wait_ms: u64,
    pub debug: bool,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.modbus.host.trim().is_empty() {
            anyhow::bail!("wallbox.host is unset; set KEBA_HOST (or wallboxName)");
        }
        if self.modbus.port == 0 {
            anyhow::bail!("wallbox.port must be between 1 and 65535");
        }
        if self.modbus.timeout_ms == 0 {
            anyhow::bail!("wallbox.read_timeout_ms must be >= 1");
        }
        if self.modbus.connect_timeout_ms == 0 {
            anyhow::bail!("wallbox.connect_timeout_ms must be >= 1");
        }
        match self.api_port {
            None => anyhow::bail!("api.port is unset; set KEBA_API_PORT (or apiPort)"),
            Some(0) => anyhow::bail!("api.port must be between 1 and 65535"),
            Some(_) => {}
        }
        if self.bind_address.trim().is_empty() {
            anyhow::bail!("api.bind_address must be non-empty");
        }
        if self.state_wait_ms == 0 {
            anyhow::bail!("api.state_wait_ms must be >= 1");
        }
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.poller.pacing_delay.as_millis() == 0 {
            anyhow::bail!("poller.pacing_ms must be >= 1");
        }

        Ok(())
    }

    pub fn state_wait(&self) -> Duration {
        Duration::from_millis(self.state_wait_ms)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            modbus: ClientConfig {
                host: String::new(),
                ..ClientConfig::default()
            },
            poller: SchedulerConfig::default(),
            api_port: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            state_wait_ms: DEFAULT_STATE_WAIT_MS,
            debug: false,
        }
    }
}

/// Looks up `key`, falling back to the variable name used by earlier deployments.
/// Returns the name of the variable that supplied the value alongside it.
fn env_entry<'a>(key: &'a str, legacy: Option<&'a str>) -> Option<(&'a str, String)> {
    env::var(key)
        .ok()
        .map(|value| (key, value))
        .or_else(|| legacy.and_then(|name| env::var(name).ok().map(|value| (name, value))))
}

fn env_value(key: &str, legacy: Option<&str>) -> Option<String> {
    env_entry(key, legacy).map(|(_, value)| value)
}

fn parse_env<T>(key: &str, legacy: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_entry(key, legacy) {
        Some((name, value)) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value {value:?} for {name}")),
        None => Ok(None),
    }
}

/// Accepts the boolean spellings earlier deployments used: `1`, `t`, `T`,
/// `TRUE`, `true`, `True` and their false counterparts.
fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_flag_env(key: &str, legacy: Option<&str>) -> Result<Option<bool>> {
    match env_entry(key, legacy) {
        Some((name, value)) => match parse_flag(value.trim()) {
            Some(flag) => Ok(Some(flag)),
            None => anyhow::bail!("invalid value {value:?} for {name}: expected a boolean"),
        },
        None => Ok(None),
    }
}

fn apply_env_overrides(config: &mut CollectorConfig) -> Result<()> {
    if let Some(host) = env_value("KEBA_HOST", Some("wallboxName")) {
        config.modbus.host = host;
    }
    if let Some(port) = parse_env::<u16>("KEBA_PORT", Some("wallboxPort"))? {
        config.modbus.port = port;
    }
    if let Some(port) = parse_env::<u16>("KEBA_API_PORT", Some("apiPort"))? {
        config.api_port = Some(port);
    }
    if let Some(debug) = parse_flag_env("KEBA_DEBUG", Some("debug"))? {
        config.debug = debug;
    }
    if let Some(address) = env_value("KEBA_BIND_ADDRESS", None) {
        config.bind_address = address;
    }
    if let Some(interval_ms) = parse_env::<u64>("KEBA_POLL_INTERVAL_MS", None)? {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }
    if let Some(pacing_ms) = parse_env::<u64>("KEBA_PACING_MS", None)? {
        config.poller.pacing_delay = Duration::from_millis(pacing_ms);
    }
    if let Some(timeout_ms) = parse_env::<u64>("KEBA_READ_TIMEOUT_MS", None)? {
        config.modbus.timeout_ms = timeout_ms;
    }
    if let Some(timeout_ms) = parse_env::<u64>("KEBA_CONNECT_TIMEOUT_MS", None)? {
        config.modbus.connect_timeout_ms = timeout_ms;
    }
    if let Some(wait_ms) = parse_env::<u64>("KEBA_STATE_WAIT_MS", None)? {
        config.state_wait_ms = wait_ms;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    wallbox: Option<FileWallboxConfig>,
    poller: Option<FilePollerConfig>,
    api: Option<FileApiConfig>,
    debug: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FileWallboxConfig {
    host: Option<String>,
    port: Option<u16>,
    unit_id: Option<u8>,
    read_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    pacing_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileApiConfig {
    port: Option<u16>,
    bind_address: Option<String>,
    state_wait_ms: Option<u64>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("KEBA_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) {
    if let Some(wallbox) = file.wallbox {
        if let Some(host) = wallbox.host {
            config.modbus.host = host;
        }
        if let Some(port) = wallbox.port {
            config.modbus.port = port;
        }
        if let Some(unit_id) = wallbox.unit_id {
            config.modbus.unit_id = unit_id;
        }
        if let Some(timeout_ms) = wallbox.read_timeout_ms {
            config.modbus.timeout_ms = timeout_ms;
        }
        if let Some(timeout_ms) = wallbox.connect_timeout_ms {
            config.modbus.connect_timeout_ms = timeout_ms;
        }
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(pacing_ms) = poller.pacing_ms {
            config.poller.pacing_delay = Duration::from_millis(pacing_ms);
        }
    }

    if let Some(api) = file.api {
        if let Some(port) = api.port {
            config.api_port = Some(port);
        }
        if let Some(address) = api.bind_address {
            config.bind_address = address;
        }
        if let Some(wait_ms) = api.state_wait_ms {
            config.state_wait_ms = wait_ms;
        }
    }

    if let Some(debug) = file.debug {
        config.debug = debug;
    }
}
