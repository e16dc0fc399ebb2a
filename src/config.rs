use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Upstream HTTP client settings (optional `[upstream]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Time allowed to establish a connection to the upstream.
    pub connect_timeout_secs: u64,
    /// Time allowed for the HEAD probe as a whole.
    pub head_timeout_secs: u64,
    /// Time allowed between two reads of an upstream body.
    pub read_timeout_secs: u64,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            head_timeout_secs: 15,
            read_timeout_secs: 30,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    /// Builds the shared client. There is no whole-request timeout; bodies
    /// are bounded per read.
    pub fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .read_timeout(Duration::from_secs(self.read_timeout_secs))
            .user_agent(self.user_agent.clone())
            .build()
    }
}

/// Server configuration, loaded from a TOML file and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,
    /// Local file served when no `url` is given.
    pub file: PathBuf,
    /// If set and `file` is missing, a filler file of this many bytes is created.
    pub fill_missing_bytes: Option<u64>,
    pub upstream: UpstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            file: PathBuf::from("temp/large-file.bin"),
            fill_missing_bytes: None,
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Config {
    /// Reads a TOML config file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Config = toml::from_str(&data)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!("127.0.0.1:3000".parse::<SocketAddr>().unwrap(), cfg.bind);
        assert_eq!(PathBuf::from("temp/large-file.bin"), cfg.file);
        assert_eq!(None, cfg.fill_missing_bytes);
        assert_eq!(15, cfg.upstream.head_timeout_secs);
        assert_eq!(Duration::from_secs(15), cfg.upstream.head_timeout());
    }

    #[test]
    fn config_toml_partial() {
        let toml = r#"
            bind = "0.0.0.0:8080"
            fill_missing_bytes = 10_485_760

            [upstream]
            head_timeout_secs = 3
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!("0.0.0.0:8080".parse::<SocketAddr>().unwrap(), cfg.bind);
        assert_eq!(Some(10 * 1024 * 1024), cfg.fill_missing_bytes);
        assert_eq!(PathBuf::from("temp/large-file.bin"), cfg.file);
        assert_eq!(3, cfg.upstream.head_timeout_secs);
        assert_eq!(30, cfg.upstream.read_timeout_secs);
    }

    #[test]
    fn config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "file = \"/srv/files/big.iso\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(PathBuf::from("/srv/files/big.iso"), cfg.file);
        assert_eq!(Config::default().bind, cfg.bind);
    }

    #[test]
    fn config_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bind = 12").unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn upstream_client_builds() {
        assert!(UpstreamConfig::default().client().is_ok());
    }
}
