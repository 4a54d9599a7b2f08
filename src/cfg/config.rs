// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level server configuration, as loaded from a YAML file.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// One entry per TCP listener / virtual server (§6 "Listener contract").
    pub listeners: Vec<ListenerConfig>,
    /// Multi-round state store sizing and lifetime knobs (§4.1).
    pub state_store: StateStoreConfig,
    /// Implementation/runtime parameters that live outside the TACACS+ wire
    /// protocol.
    pub runtime: RuntimeConfig,
    /// Structured logging configuration.
    #[serde(default)]
    pub logger: LoggerSettings,
}

/// One TCP listener / virtual server.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ListenerConfig {
    #[serde(rename = "Name")]
    /// Virtual server name, used only for logging.
    pub name: String,

    #[serde(rename = "BindAddress")]
    /// Local address to bind and listen on.
    pub bind_address: SocketAddr,

    #[serde(rename = "Secret", skip_serializing_if = "Option::is_none")]
    /// Shared secret used for packet body obfuscation. `None` means
    /// unobfuscated transport (RFC 8907 discourages this in production).
    pub secret: Option<String>,
}

/// `StateStore` sizing and lifetime knobs (§4.1, §6 "Configuration knobs").
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StateStoreConfig {
    #[serde(rename = "MaxSessions")]
    /// Hard cap on the number of concurrently tracked multi-round
    /// conversations.
    pub max_sessions: u32,

    #[serde(rename = "Timeout", with = "serde_secs")]
    /// How long an idle conversation may hold a `StateEntry` before it is
    /// reaped.
    pub timeout: Duration,

    #[serde(rename = "StateSeed", default)]
    /// Optional prefix byte for generated tokens, letting an external load
    /// balancer shard sessions by token prefix. Values `>= 256` are treated
    /// as disabled (stored here as `Option<u8>` once validated).
    pub state_seed: Option<u32>,
}

/// Runtime-only settings that do not map to wire-protocol keys.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "SpawnWorkers")]
    /// Whether to run the multi-thread work-stealing runtime (`true`) or a
    /// single current-thread runtime (`false`). Gates whether the
    /// `StateStore` mutex can ever see contention in practice.
    pub spawn_workers: bool,

    #[serde(rename = "ConnectionTimeout", with = "serde_secs")]
    /// Per-I/O-operation timeout for a connection's read/write calls.
    pub connection_timeout: Duration,
}

/// Structured logging configuration, trimmed of distributed-tracing
/// span-export plumbing this crate does not need.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggerSettings {
    #[serde(rename = "Level", default = "default_log_level")]
    pub level: String,
    #[serde(rename = "Output", default)]
    pub output: LogOutput,
    #[serde(rename = "File", skip_serializing_if = "Option::is_none")]
    pub file: Option<LogFileConfig>,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: LogOutput::default(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFileConfig {
    pub path: String,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.listeners.is_empty(), "at least one listener is required");
        for l in &self.listeners {
            ensure!(!l.name.is_empty(), "listener Name must not be empty");
        }

        ensure!(
            self.state_store.max_sessions >= 1,
            "StateStore.MaxSessions must be >= 1"
        );
        ensure!(
            !self.state_store.timeout.is_zero(),
            "StateStore.Timeout must be > 0"
        );
        if let Some(seed) = self.state_store.state_seed
            && seed >= 256
        {
            // Values >= 256 disable the feature; normalize to None so the
            // rest of the crate only ever sees a valid prefix byte.
            self.state_store.state_seed = None;
        }

        Ok(())
    }

    /// The configured `state_seed`, already range-checked to fit a byte.
    pub fn state_seed_byte(&self) -> Option<u8> {
        self.state_store
            .state_seed
            .filter(|v| *v < 256)
            .map(|v| v as u8)
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
listeners:
  - Name: default
    BindAddress: "0.0.0.0:49"
    Secret: "s3cr3t"
state_store:
  MaxSessions: 4096
  Timeout: 60
  StateSeed: 7
runtime:
  SpawnWorkers: true
  ConnectionTimeout: 10
"#
    }

    #[test]
    fn parses_minimal_config() {
        let mut cfg: Config = serde_yaml::from_str(sample_yaml()).expect("valid yaml");
        cfg.validate_and_normalize().expect("valid config");
        assert_eq!(cfg.listeners.len(), 1);
        assert_eq!(cfg.state_store.max_sessions, 4096);
        assert_eq!(cfg.state_seed_byte(), Some(7));
    }

    #[test]
    fn out_of_range_state_seed_is_disabled() {
        let mut cfg: Config = serde_yaml::from_str(sample_yaml()).expect("valid yaml");
        cfg.state_store.state_seed = Some(9999);
        cfg.validate_and_normalize().expect("valid config");
        assert_eq!(cfg.state_seed_byte(), None);
    }

    #[test]
    fn rejects_empty_listeners() {
        let mut cfg: Config = serde_yaml::from_str(sample_yaml()).expect("valid yaml");
        cfg.listeners.clear();
        assert!(cfg.validate_and_normalize().is_err());
    }
}
