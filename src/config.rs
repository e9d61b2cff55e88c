//! Configuration types for the shim

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::session::ProxySessionConfig;
use crate::{Result, ShimError};

/// Proxy operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Record mode: the proxy forwards to the upstream and captures the exchange
    Record,
    /// Playback mode: the proxy answers from a previous capture
    #[default]
    Playback,
}

impl Mode {
    /// Wire name, used both in control paths and the `x-recording-mode` header
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Record => "record",
            Mode::Playback => "playback",
        }
    }

    /// Check if mode is Record
    #[must_use]
    pub fn is_record(self) -> bool {
        matches!(self, Mode::Record)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "record" => Ok(Mode::Record),
            "playback" => Ok(Mode::Playback),
            other => Err(ShimError::Config(format!(
                "Unknown proxy mode '{other}' (expected 'record' or 'playback')"
            ))),
        }
    }
}

/// Environment variable names read by [`ShimConfig::from_env`]
pub mod env {
    /// Enables routing through the proxy (`true`/`false`)
    pub const USE_PROXY: &str = "USE_PROXY";
    /// Proxy host
    pub const PROXY_HOST: &str = "PROXY_HOST";
    /// Proxy port, `0` for the scheme default
    pub const PROXY_PORT: &str = "PROXY_PORT";
    /// `record` or `playback`
    pub const PROXY_MODE: &str = "PROXY_MODE";
    /// Explicit recording file path
    pub const PROXY_RECORDING_FILE: &str = "PROXY_RECORDING_FILE";
    /// Directory holding exactly one recording file
    pub const PROXY_RECORDINGS_DIR: &str = "PROXY_RECORDINGS_DIR";
    /// Control channel scheme (`http`/`https`)
    pub const PROXY_SCHEME: &str = "PROXY_SCHEME";
    /// Accept unverified certificates on the control channel
    pub const PROXY_INSECURE_TLS: &str = "PROXY_INSECURE_TLS";
    /// Save directive sent on stop
    pub const PROXY_SAVE_RECORDING: &str = "PROXY_SAVE_RECORDING";
    /// Request timeout in milliseconds
    pub const PROXY_TIMEOUT_MS: &str = "PROXY_TIMEOUT_MS";
}

/// Shim configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimConfig {
    /// Route traffic through the proxy at all
    #[serde(default)]
    pub use_proxy: bool,
    /// Proxy host
    #[serde(default = "default_host")]
    pub host: String,
    /// Proxy port; `0` means the default port for the scheme
    #[serde(default = "default_port")]
    pub port: u16,
    /// Operating mode
    #[serde(default)]
    pub mode: Mode,
    /// Scheme of the control channel
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Recording file handed to the proxy on start
    #[serde(default)]
    pub recording_file: Option<PathBuf>,
    /// Directory searched for the recording file when none is given
    #[serde(default)]
    pub recordings_dir: Option<PathBuf>,
    /// Accept self-signed proxy certificates (control channel only)
    #[serde(default = "default_true")]
    pub insecure_tls: bool,
    /// Ask the proxy to persist the recording on stop
    #[serde(default = "default_true")]
    pub save_recording: bool,
    /// Request timeout in milliseconds; unset means no timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            use_proxy: false,
            host: default_host(),
            port: default_port(),
            mode: Mode::default(),
            scheme: default_scheme(),
            recording_file: None,
            recordings_dir: None,
            insecure_tls: true,
            save_recording: true,
            timeout_ms: None,
        }
    }
}

impl ShimConfig {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShimError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ShimError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from process environment
    ///
    /// # Errors
    ///
    /// Returns error if a variable is malformed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key/value source
    ///
    /// Unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or the result fails validation
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get(env::USE_PROXY) {
            config.use_proxy = parse_bool(env::USE_PROXY, &v)?;
        }
        if let Some(v) = get(env::PROXY_HOST) {
            config.host = v.trim().to_string();
        }
        if let Some(v) = get(env::PROXY_PORT) {
            config.port = v.trim().parse().map_err(|e| {
                ShimError::Config(format!("{}: invalid port '{v}': {e}", env::PROXY_PORT))
            })?;
        }
        if let Some(v) = get(env::PROXY_MODE) {
            config.mode = v.parse()?;
        }
        if let Some(v) = get(env::PROXY_SCHEME) {
            config.scheme = v.trim().to_ascii_lowercase();
        }
        config.recording_file = get(env::PROXY_RECORDING_FILE).map(PathBuf::from);
        config.recordings_dir = get(env::PROXY_RECORDINGS_DIR).map(PathBuf::from);
        if let Some(v) = get(env::PROXY_INSECURE_TLS) {
            config.insecure_tls = parse_bool(env::PROXY_INSECURE_TLS, &v)?;
        }
        if let Some(v) = get(env::PROXY_SAVE_RECORDING) {
            config.save_recording = parse_bool(env::PROXY_SAVE_RECORDING, &v)?;
        }
        if let Some(v) = get(env::PROXY_TIMEOUT_MS) {
            let ms = v.trim().parse().map_err(|e| {
                ShimError::Config(format!(
                    "{}: invalid timeout '{v}': {e}",
                    env::PROXY_TIMEOUT_MS
                ))
            })?;
            config.timeout_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// Proxy settings are only checked when `use_proxy` is set.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == Some(0) {
            return Err(ShimError::Config(
                "timeout_ms must be > 0 when set".to_string(),
            ));
        }

        if !self.use_proxy {
            return Ok(());
        }

        if self.host.trim().is_empty() {
            return Err(ShimError::Config(
                "Proxy host cannot be empty".to_string(),
            ));
        }

        if self.scheme != "http" && self.scheme != "https" {
            return Err(ShimError::Config(format!(
                "Unsupported proxy scheme '{}' (expected 'http' or 'https')",
                self.scheme
            )));
        }

        if self.recording_file.is_none() && self.recordings_dir.is_none() {
            return Err(ShimError::Config(format!(
                "Either {} or {} must be set when the proxy is enabled",
                env::PROXY_RECORDING_FILE,
                env::PROXY_RECORDINGS_DIR
            )));
        }

        Ok(())
    }

    /// Request timeout, if configured
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Build the session config, resolving the recording file once
    ///
    /// # Errors
    ///
    /// Returns error if no recording file can be resolved
    pub fn session_config(&self) -> Result<ProxySessionConfig> {
        let recording_file = match (&self.recording_file, &self.recordings_dir) {
            (Some(file), _) => file.clone(),
            (None, Some(dir)) => discover_recording_file(dir)?,
            (None, None) => {
                return Err(ShimError::Config(
                    "No recording file configured".to_string(),
                ))
            }
        };

        Ok(ProxySessionConfig::new(
            self.host.clone(),
            self.port,
            self.mode,
            recording_file,
        ))
    }
}

/// Find the single recording file in `dir`
///
/// Exactly one regular file must be present; with zero or several the
/// choice would depend on directory order, so that is an error.
///
/// # Errors
///
/// Returns error if the directory cannot be read or does not hold exactly one file
pub fn discover_recording_file(dir: &Path) -> Result<PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }

    match files.len() {
        0 => Err(ShimError::Config(format!(
            "No recording file found in {}",
            dir.display()
        ))),
        1 => Ok(files.remove(0)),
        n => {
            files.sort();
            Err(ShimError::Config(format!(
                "Found {n} recording files in {} (first: {}); set {} explicitly",
                dir.display(),
                files[0].display(),
                env::PROXY_RECORDING_FILE
            )))
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ShimError::Config(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}
