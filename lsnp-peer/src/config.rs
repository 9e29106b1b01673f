//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/lsnp/config.toml or
/// /etc/lsnp/config.toml. Env overrides: LSNP_PORT,
/// LSNP_PRESENCE_INTERVAL, LSNP_CHUNK_SIZE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP port (default 50999).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between presence broadcasts (default 30).
    #[serde(default = "default_presence_interval")]
    pub presence_interval_secs: u64,
    /// File transfer chunk size in bytes (default 1024).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
}

fn default_port() -> u16 {
    50999
}
fn default_presence_interval() -> u64 {
    30
}
fn default_chunk_size() -> u32 {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            presence_interval_secs: default_presence_interval(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LSNP_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("LSNP_PRESENCE_INTERVAL") {
        if let Ok(p) = s.parse::<u64>() {
            c.presence_interval_secs = p;
        }
    }
    if let Ok(s) = std::env::var("LSNP_CHUNK_SIZE") {
        if let Ok(p) = s.parse::<u32>() {
            c.chunk_size = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lsnp/config.toml"));
    }
    out.push(PathBuf::from("/etc/lsnp/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert_eq!(c.port, 50999);
        assert_eq!(c.presence_interval_secs, 30);
        assert_eq!(c.chunk_size, 1024);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let c: Config = toml::from_str("port = 51000").unwrap();
        assert_eq!(c.port, 51000);
        assert_eq!(c.chunk_size, 1024);
    }
}
