//! Harness configuration.
//!
//! A [`Config`] is either [`Config::default`] or deserialized from a JSON file.
//! Every section uses `#[serde(default)]`, so a file only needs the keys it
//! overrides. The CLI applies its own flags on top afterwards.

use crate::common::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level harness configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub loader: LoaderConfig,
    pub log: LogConfig,
    pub lock: LockConfig,
    pub registry: RegistryConfig,
    /// Default marker wait, in seconds, for both load and unload markers.
    pub timeout_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            log: LogConfig::default(),
            lock: LockConfig::default(),
            registry: RegistryConfig::default(),
            timeout_secs: 5.0,
        }
    }
}

impl Config {
    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| HarnessError::io(format!("reading config {}", path.display()), e))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            return Err(HarnessError::Config(format!(
                "timeout_secs must be a non-negative number of seconds that fits a duration, got {}",
                self.timeout_secs
            )));
        }
        if self.log.poll_interval_ms == 0 {
            return Err(HarnessError::Config(
                "log.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.loader.insmod.trim().is_empty() || self.loader.rmmod.trim().is_empty() {
            return Err(HarnessError::Config(
                "loader.insmod and loader.rmmod must name a program".into(),
            ));
        }
        Ok(())
    }

    /// Marker wait as a [`Duration`]. Values [`validate`](Self::validate)
    /// rejects saturate instead of panicking.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(if self.timeout_secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }
}

/// Which privileged primitive inserts and removes modules.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoaderBackend {
    /// `finit_module(2)` / `delete_module(2)` issued directly.
    #[default]
    Syscall,
    /// The `insmod` / `rmmod` tools.
    Command,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    pub backend: LoaderBackend,
    /// Program used by the command backend to insert modules.
    pub insmod: String,
    /// Program used by the command backend to remove modules.
    pub rmmod: String,
    /// Module parameter string, e.g. `"debug=1 name=foo"`.
    pub params: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            backend: LoaderBackend::Syscall,
            insmod: "insmod".to_string(),
            rmmod: "rmmod".to_string(),
            params: String::new(),
        }
    }
}

/// Kind of kernel log sink the observer reads.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSourceKind {
    /// Structured records from `/dev/kmsg`.
    #[default]
    Kmsg,
    /// A plain append-only text log such as `/var/log/kern.log`.
    File,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub source: LogSourceKind,
    pub path: PathBuf,
    pub poll_interval_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            source: LogSourceKind::Kmsg,
            path: PathBuf::from("/dev/kmsg"),
            poll_interval_ms: 50,
        }
    }
}

impl LogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// Directory holding one lock file per module name.
    pub dir: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Consult the registry before load and after unload.
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("/proc/modules"),
        }
    }
}
