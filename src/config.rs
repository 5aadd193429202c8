//! The configuration contract (see spec §6): a string-keyed map loaded from
//! a TOML file, plus a secondary operators file loaded the same way. This is
//! deliberately thin — the core only ever asks for named string values and
//! a handful of durations, never a rich typed settings struct.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const REQUIRED_KEYS: &[&str] = &[
    "listen-host",
    "listen-port",
    "server-name",
    "server-info",
    "version",
    "created-date",
    "motd",
    "wakeup-time",
    "ping-time",
    "dead-time",
    "opers-config",
];

/// A loaded configuration map, plus the operator credentials it points at.
#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, String>,
    pub operators: HashMap<String, String>,
}

impl Config {
    /// Loads `path` as TOML into the string map the core consumes, then
    /// loads the file named by `opers-config` the same way into a
    /// name-to-password map.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let values = load_string_map(path)?;
        for key in REQUIRED_KEYS {
            if !values.contains_key(*key) {
                return Err(ConfigError::MissingKey((*key).to_string()));
            }
        }
        let opers_path = PathBuf::from(&values["opers-config"]);
        let operators = load_string_map(&opers_path)?;
        Ok(Self { values, operators })
    }

    fn get(&self, key: &str) -> &str {
        // Safe: `load` rejects any config missing a REQUIRED_KEYS entry.
        self.values.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn listen_host(&self) -> &str {
        self.get("listen-host")
    }

    pub fn listen_port(&self) -> &str {
        self.get("listen-port")
    }

    pub fn server_name(&self) -> &str {
        self.get("server-name")
    }

    pub fn server_info(&self) -> &str {
        self.get("server-info")
    }

    pub fn version(&self) -> &str {
        self.get("version")
    }

    pub fn created_date(&self) -> &str {
        self.get("created-date")
    }

    pub fn motd(&self) -> &str {
        self.get("motd")
    }

    pub fn wakeup_time(&self) -> Result<std::time::Duration, ConfigError> {
        self.duration("wakeup-time")
    }

    pub fn ping_time(&self) -> Result<std::time::Duration, ConfigError> {
        self.duration("ping-time")
    }

    pub fn dead_time(&self) -> Result<std::time::Duration, ConfigError> {
        self.duration("dead-time")
    }

    fn duration(&self, key: &str) -> Result<std::time::Duration, ConfigError> {
        humantime::parse_duration(self.get(key))
            .map_err(|e| ConfigError::Duration(key.to_string(), e))
    }
}

fn load_string_map(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}
