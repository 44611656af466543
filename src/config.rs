use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Version written by this crate. Version 1 entries predate the stored
/// email/password and are migrated on load.
pub const CONFIG_VERSION: u32 = 2;
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PORT: u16 = 6578;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub imei: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub auth_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    /// Email and password, when both are set. Only entries with these can
    /// recover from an expired auth code on their own.
    pub fn login_details(&self) -> Option<(&str, &str)> {
        let email = self.email.as_deref().filter(|s| !s.is_empty())?;
        let password = self.password.as_deref().filter(|s| !s.is_empty())?;
        Some((email, password))
    }
}

/// One configured device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConfig {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

fn legacy_version() -> u32 {
    1
}

impl EntryConfig {
    pub fn new(credentials: Credentials, device_name: Option<String>) -> Self {
        let device_name = device_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            version: CONFIG_VERSION,
            credentials,
            device_name,
        }
    }

    pub fn imei(&self) -> &str {
        &self.credentials.imei
    }

    pub fn title(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| default_device_name(self.imei()))
    }

    /// Bring an older entry up to [`CONFIG_VERSION`]. Returns true when the
    /// entry changed and should be written back.
    pub fn migrate(&mut self) -> bool {
        if self.version >= CONFIG_VERSION {
            return false;
        }
        log::debug!(
            "Migrating SolidGPS config entry {} from version {} to {CONFIG_VERSION}",
            self.imei(),
            self.version
        );
        self.version = CONFIG_VERSION;
        log::info!(
            "SolidGPS config entry migrated to version {CONFIG_VERSION}. \
             Re-authentication will be required when auth_code expires."
        );
        true
    }
}

pub fn default_device_name(imei: &str) -> String {
    let tail: String = {
        let chars: Vec<char> = imei.chars().collect();
        chars[chars.len().saturating_sub(4)..].iter().collect()
    };
    format!("SolidGPS {tail}")
}

/// Contents of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between polls.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address announced to discovery queries; discovery is off without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub devices: Vec<EntryConfig>,
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL.as_secs()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            port: DEFAULT_PORT,
            advertise_ip: None,
            devices: Vec::new(),
        }
    }
}

impl Config {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval.max(1))
    }

    pub fn entry(&self, imei: &str) -> Option<&EntryConfig> {
        self.devices.iter().find(|e| e.imei() == imei)
    }

    pub fn entry_mut(&mut self, imei: &str) -> Option<&mut EntryConfig> {
        self.devices.iter_mut().find(|e| e.imei() == imei)
    }

    /// Replace the entry with the same IMEI, or append it.
    pub fn upsert(&mut self, entry: EntryConfig) {
        match self.entry_mut(entry.imei()) {
            Some(existing) => *existing = entry,
            None => self.devices.push(entry),
        }
    }

    pub fn migrate(&mut self) -> bool {
        self.devices
            .iter_mut()
            .fold(false, |changed, entry| entry.migrate() || changed)
    }
}

/// Where refreshed credentials get written.
pub trait ConfigStore: Send + Sync {
    fn save_entry(&self, entry: &EntryConfig) -> Result<(), ConfigError>;
}

/// A pretty-printed JSON config file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, migrating old entries. A missing file is an empty config.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = self.read()?;
        if config.migrate() {
            self.write(&config)?;
        }
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write(config)
    }

    fn read(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let f = File::open(&self.path)?;
        let config = serde_json::from_reader(BufReader::new(f))?;
        Ok(config)
    }

    fn write(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let f = File::create(&self.path)?;
        let mut writer = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut writer, config)?;
        writer.flush()?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn save_entry(&self, entry: &EntryConfig) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = self.read()?;
        if config.entry(entry.imei()).is_none() {
            return Err(ConfigError::UnknownEntry(entry.imei().to_string()));
        }
        config.upsert(entry.clone());
        self.write(&config)
    }
}
