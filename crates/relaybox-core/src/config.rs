/*!
 * Configuration management for RelayBox.
 *
 * This module provides the fixed configuration key set, the typed
 * configuration snapshot, and the store that loads it from an INI file or the
 * process environment and writes it back to disk.
 */
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config::{Config as ConfigLib, File, FileFormat};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{Value, ValueType};

/// INI section holding every configuration entry
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Fallback poll interval used when the stored value is not numeric
pub const DEFAULT_READING_INTERVAL_SECS: u64 = 10;

/// The closed set of configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    /// Whether polling publishes readings (bool-as-int)
    Enable,
    /// MQTT client identifier, also the `module` of every reading
    ClientId,
    /// MQTT broker host
    MqttHostname,
    /// MQTT broker port
    MqttPort,
    /// Seconds between polls
    ReadingInterval,
    /// Synthesize readings instead of talking to the device (bool-as-int)
    DummyData,
    /// Modbus device address
    ModbusIp,
    /// Modbus device port
    ModbusPort,
    /// Modbus unit id
    ModbusUnit,
}

impl ConfigKey {
    /// Every key, in persistence order
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::Enable,
        ConfigKey::ClientId,
        ConfigKey::MqttHostname,
        ConfigKey::MqttPort,
        ConfigKey::ReadingInterval,
        ConfigKey::DummyData,
        ConfigKey::ModbusIp,
        ConfigKey::ModbusPort,
        ConfigKey::ModbusUnit,
    ];

    /// Canonical (upper case) key name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Enable => "ENABLE",
            ConfigKey::ClientId => "CLIENT_ID",
            ConfigKey::MqttHostname => "MQTT_HOSTNAME",
            ConfigKey::MqttPort => "MQTT_PORT",
            ConfigKey::ReadingInterval => "READING_INTERVAL",
            ConfigKey::DummyData => "DUMMY_DATA",
            ConfigKey::ModbusIp => "MODBUS_IP",
            ConfigKey::ModbusPort => "MODBUS_PORT",
            ConfigKey::ModbusUnit => "MODBUS_UNIT",
        }
    }

    /// Look up a key by its exact canonical name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.as_str() == name)
    }

    /// The kind of value this key is declared with
    pub fn kind(&self) -> ValueType {
        match self {
            ConfigKey::ClientId | ConfigKey::MqttHostname | ConfigKey::ModbusIp => {
                ValueType::String
            }
            _ => ValueType::Integer,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn default_value(&self) -> Value {
        match self {
            ConfigKey::Enable => Value::Integer(0),
            ConfigKey::ClientId => Value::String(random_client_id()),
            ConfigKey::MqttHostname => Value::from("mosquitto"),
            ConfigKey::MqttPort => Value::Integer(1883),
            ConfigKey::ReadingInterval => Value::Integer(DEFAULT_READING_INTERVAL_SECS as i64),
            ConfigKey::DummyData => Value::Integer(0),
            ConfigKey::ModbusIp => Value::from("192.168.2.253"),
            ConfigKey::ModbusPort => Value::Integer(502),
            ConfigKey::ModbusUnit => Value::Integer(1),
        }
    }

    /// Bring a value into the form it has after a save and load.
    ///
    /// Text keys hold trimmed strings. Numeric keys hold a number whenever
    /// the value reads as a finite one and keep the trimmed text otherwise.
    pub fn normalize(&self, value: Value) -> Value {
        match (self.kind(), value) {
            (ValueType::String, value) => Value::String(value.to_string().trim().to_string()),
            (_, Value::String(text)) => {
                let text = text.trim();
                if let Ok(i) = text.parse::<i64>() {
                    Value::Integer(i)
                } else if let Some(f) = text.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    Value::Float(f)
                } else {
                    Value::String(text.to_string())
                }
            }
            (_, Value::Float(f)) if !f.is_finite() => Value::String(Value::Float(f).to_string()),
            (_, value) => value,
        }
    }

    fn parse_raw(&self, raw: &str) -> Value {
        self.normalize(Value::String(raw.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::config(format!("unknown configuration key '{}'", s)))
    }
}

/// Generate a client identifier of the form `RB_<n>`
pub fn random_client_id() -> String {
    format!("RB_{}", rand::rng().random_range(1..=20))
}

/// An immutable-by-convention snapshot of every configuration value
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    values: [Value; 9],
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            values: ConfigKey::ALL.map(|key| key.default_value()),
        }
    }
}

impl Configuration {
    /// Build a configuration where every key comes from `lookup`, falling
    /// back to the default when `lookup` has nothing for it
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        for key in ConfigKey::ALL {
            if let Some(raw) = lookup(key.as_str()) {
                config.values[key.index()] = key.parse_raw(&raw);
            }
        }
        config
    }

    /// Build a configuration where every key must be supplied by `lookup`
    fn from_required<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        for key in ConfigKey::ALL {
            let raw = lookup(key.as_str())
                .ok_or_else(|| Error::config(format!("missing configuration key {}", key)))?;
            config.values[key.index()] = key.parse_raw(&raw);
        }
        Ok(config)
    }

    /// Build a configuration from process environment variables, using the
    /// defaults for anything unset
    pub fn from_env() -> Self {
        Self::from_lookup(|name| match env::var_os(name)?.into_string() {
            Ok(raw) => Some(raw),
            Err(_) => {
                warn!("Ignoring {}: value is not valid UTF-8", name);
                None
            }
        })
    }

    /// Get the value stored for a key
    pub fn get(&self, key: ConfigKey) -> &Value {
        &self.values[key.index()]
    }

    /// Replace the value stored for a key.
    ///
    /// The value is stored normalized, see [`ConfigKey::normalize`].
    pub fn set(&mut self, key: ConfigKey, value: Value) {
        self.values[key.index()] = key.normalize(value);
    }

    /// Copy of this configuration with one value replaced
    pub fn with_value(&self, key: ConfigKey, value: Value) -> Self {
        let mut next = self.clone();
        next.set(key, value);
        next
    }

    /// Iterate over every key and its value in persistence order
    pub fn iter(&self) -> impl Iterator<Item = (ConfigKey, &Value)> {
        ConfigKey::ALL.into_iter().map(move |key| (key, self.get(key)))
    }

    /// Whether polling should publish readings
    pub fn is_enabled(&self) -> bool {
        self.get(ConfigKey::Enable).is_truthy()
    }

    /// Whether the device reader synthesizes data
    pub fn dummy_data(&self) -> bool {
        self.get(ConfigKey::DummyData).is_truthy()
    }

    /// MQTT client identifier
    pub fn client_id(&self) -> String {
        self.get(ConfigKey::ClientId).to_string()
    }

    /// MQTT broker host
    pub fn mqtt_hostname(&self) -> String {
        self.get(ConfigKey::MqttHostname).to_string()
    }

    /// MQTT broker port
    pub fn mqtt_port(&self) -> Result<u16> {
        self.ranged(ConfigKey::MqttPort)
    }

    /// Time between polls, never shorter than one second
    pub fn reading_interval(&self) -> Duration {
        let secs = self
            .get(ConfigKey::ReadingInterval)
            .as_integer()
            .map(|secs| secs.max(1) as u64)
            .unwrap_or(DEFAULT_READING_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    /// Modbus device address
    pub fn modbus_ip(&self) -> String {
        self.get(ConfigKey::ModbusIp).to_string()
    }

    /// Modbus device port
    pub fn modbus_port(&self) -> Result<u16> {
        self.ranged(ConfigKey::ModbusPort)
    }

    /// Modbus unit id
    pub fn modbus_unit(&self) -> Result<u8> {
        self.ranged(ConfigKey::ModbusUnit)
    }

    fn ranged<T: TryFrom<i64>>(&self, key: ConfigKey) -> Result<T> {
        let value = self.get(key);
        value
            .as_integer()
            .and_then(|i| T::try_from(i).ok())
            .ok_or_else(|| Error::config(format!("{} out of range: '{}'", key, value)))
    }
}

/// Loads and persists a [`Configuration`] as an INI file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store backed by the given file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load from the file when present, from the environment otherwise
    pub fn resolve(&self) -> Result<Configuration> {
        if self.exists() {
            info!("Loading configuration from {}", self.path.display());
            self.load()
        } else {
            info!(
                "Configuration file {} does not exist, using environment",
                self.path.display()
            );
            Ok(Configuration::from_env())
        }
    }

    /// Load the configuration from the backing file
    pub fn load(&self) -> Result<Configuration> {
        let sections: HashMap<String, config::Value> = ConfigLib::builder()
            .add_source(
                File::from(self.path.as_path())
                    .format(FileFormat::Ini)
                    .required(true),
            )
            .build()?
            .try_deserialize()?;

        let section = sections
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(DEFAULT_SECTION))
            .map(|(_, section)| section)
            .ok_or_else(|| {
                Error::config(format!(
                    "{} has no [{}] section",
                    self.path.display(),
                    DEFAULT_SECTION
                ))
            })?;

        let entries: HashMap<String, String> = section
            .into_table()?
            .into_iter()
            .map(|(name, value)| Ok((name.to_ascii_uppercase(), value.into_string()?)))
            .collect::<Result<_>>()?;

        Configuration::from_required(|name| entries.get(name).cloned())
    }

    /// Write the full configuration to the backing file
    pub fn save(&self, config: &Configuration) -> Result<()> {
        debug!("Saving configuration to {}", self.path.display());
        fs::write(&self.path, Self::render(config)).map_err(|e| {
            Error::persistence(format!("failed to write {}: {}", self.path.display(), e))
        })
    }

    /// Render a configuration as INI text
    pub fn render(config: &Configuration) -> String {
        let mut out = format!("[{}]\n", DEFAULT_SECTION);
        for (key, value) in config.iter() {
            let text = match value {
                Value::String(text) => quote(text),
                other => other.to_string(),
            };
            out.push_str(&format!("{} = {}\n", key.as_str().to_ascii_lowercase(), text));
        }
        out.push('\n');
        out
    }
}

/// Double-quote `text` using the escapes the INI reader understands
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\x{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
