//! Load daemon config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/peertalk/config.toml or
/// /etc/peertalk/config.toml.
/// Env overrides: PEERTALK_NAME, PEERTALK_DISCOVERY_PORT,
/// PEERTALK_LISTEN_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name announced to the network (default: hostname, else "peertalk").
    #[serde(default)]
    pub name: String,
    /// Discovery UDP port (0 = engine default).
    #[serde(default)]
    pub discovery_port: u16,
    /// Stream listen TCP port (0 = engine default).
    #[serde(default)]
    pub listen_port: u16,
    /// Ticks (ms) between announce beacons (0 = engine default).
    #[serde(default)]
    pub discovery_interval: u64,
    /// Largest message accepted or sent (0 = engine default).
    #[serde(default)]
    pub max_message_size: u32,
    /// Connect to every discovered peer automatically.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            discovery_port: 0,
            listen_port: 0,
            discovery_interval: 0,
            max_message_size: 0,
            auto_connect: true,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("PEERTALK_NAME") {
        c.name = s;
    }
    if let Ok(s) = std::env::var("PEERTALK_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("PEERTALK_LISTEN_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.listen_port = p;
        }
    }
    c
}

fn load_file() -> Option<Config> {
    for path in candidate_paths() {
        if let Ok(text) = std::fs::read_to_string(&path) {
            match toml::from_str(&text) {
                Ok(cfg) => return Some(cfg),
                Err(e) => {
                    eprintln!("ignoring bad config {}: {e}", path.display());
                }
            }
        }
    }
    None
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut v = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        v.push(PathBuf::from(home).join(".config/peertalk/config.toml"));
    }
    v.push(PathBuf::from("/etc/peertalk/config.toml"));
    v
}

impl Config {
    /// Map onto the engine configuration, zero fields deferring to engine
    /// defaults.
    pub fn to_engine(&self) -> peertalk_core::Config {
        let mut name = if self.name.is_empty() {
            hostname().unwrap_or_else(|| "peertalk".to_string())
        } else {
            self.name.clone()
        };
        // Beacon names are capped at 31 bytes.
        while name.len() > 31 {
            name.pop();
        }
        peertalk_core::Config {
            local_name: name,
            discovery_port: self.discovery_port,
            listen_port: self.listen_port,
            discovery_interval: self.discovery_interval,
            max_message_size: self.max_message_size,
            ..peertalk_core::Config::default()
        }
    }
}

fn hostname() -> Option<String> {
    let name = std::fs::read_to_string("/proc/sys/kernel/hostname").ok()?;
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip() {
        let cfg: Config =
            toml::from_str("name = \"kitchen\"\ndiscovery_port = 9000\n").unwrap();
        assert_eq!(cfg.name, "kitchen");
        assert_eq!(cfg.discovery_port, 9000);
        assert_eq!(cfg.listen_port, 0);
        assert!(cfg.auto_connect);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1\n").is_err());
    }

    #[test]
    fn engine_config_caps_name_length() {
        let cfg = Config {
            name: "x".repeat(50),
            ..Config::default()
        };
        assert_eq!(cfg.to_engine().local_name.len(), 31);
    }
}
