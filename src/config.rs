//! Relay configuration.
//!
//! Resolution order, later wins: built-in defaults, TOML file, environment,
//! command-line flags (applied by the binary).

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 3001;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `memory`, or a NATS server URL such as `nats://127.0.0.1:4222`.
    pub store_url: String,
    /// JetStream KV bucket holding account records (NATS store only).
    pub kv_bucket: String,
    /// Allowed origin for cross-domain browser calls.
    pub origin: String,
    /// Skip fan-out subscriptions. Always on for the memory store.
    pub singleton: bool,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            store_url: "memory".into(),
            kv_bucket: "callmydouble".into(),
            origin: "http://localhost:3000".into(),
            singleton: false,
            max_body_bytes: 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// `<config dir>/callmydouble/config.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "callmydouble").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from `path` (which must exist) or from the default location (which
    /// may not), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "Loading config file");
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CALLMYDOUBLE_*` variables, falling back to the bare names
    /// (`PORT`, `NATS_URL`, `ORIGIN`) used by container platforms.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |primary: &str, fallback: &str| {
            lookup(primary)
                .or_else(|| lookup(fallback))
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(port) = var("CALLMYDOUBLE_PORT", "PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid port in environment: {port}"))?;
        }
        if let Some(url) = var("CALLMYDOUBLE_STORE_URL", "NATS_URL") {
            self.store_url = url;
        }
        if let Some(origin) = var("CALLMYDOUBLE_ORIGIN", "ORIGIN") {
            self.origin = origin;
        }
        Ok(())
    }

    pub fn uses_memory_store(&self) -> bool {
        let url = self.store_url.trim();
        url.is_empty() || url.eq_ignore_ascii_case("memory")
    }

    /// A memory store is invisible to other instances, so fan-out is pointless.
    pub fn is_singleton(&self) -> bool {
        self.singleton || self.uses_memory_store()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.bind_addr(), "0.0.0.0:3001");
        assert!(config.uses_memory_store());
        assert!(config.is_singleton());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 8080\nstore_url = \"nats://10.0.0.5:4222\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_url, "nats://10.0.0.5:4222");
        assert_eq!(config.kv_bucket, "callmydouble");
        assert!(!config.is_singleton());
    }

    #[test]
    fn explicit_singleton_with_shared_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "store_url = \"nats://localhost\"\nsingleton = true").unwrap();
        assert!(Config::from_file(file.path()).unwrap().is_singleton());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(Config::from_file(file.path()).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn env_overrides_prefer_prefixed_names() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("PORT", "9000"),
                ("CALLMYDOUBLE_PORT", "9100"),
                ("NATS_URL", "nats://nats:4222"),
                ("ORIGIN", "https://app.example.com"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.store_url, "nats://nats:4222");
        assert_eq!(config.origin, "https://app.example.com");
    }

    #[test]
    fn bad_port_in_env_is_an_error() {
        let mut config = Config::default();
        assert!(config.apply_overrides(env(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("CALLMYDOUBLE_ORIGIN", "  ")])).unwrap();
        assert_eq!(config.origin, "http://localhost:3000");
    }
}
