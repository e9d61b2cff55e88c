//! Session configuration and state

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Mode;
use crate::{Result, ShimError};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No recording id yet
    Unstarted,
    /// Recording id issued, requests may be redirected
    Started,
    /// Stop has been issued
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Started => "started",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Proxy location, mode and recording identity for one session
///
/// Everything except the recording id is fixed at construction. The
/// recording id is written once, by [`ProxyController::start`].
///
/// [`ProxyController::start`]: super::ProxyController::start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySessionConfig {
    host: String,
    port: u16,
    mode: Mode,
    recording_file: PathBuf,
    recording_id: Option<String>,
    stopped: bool,
}

impl ProxySessionConfig {
    /// Create an unstarted session config
    ///
    /// A `port` of `0` means the default port for the scheme.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        mode: Mode,
        recording_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            mode,
            recording_file: recording_file.into(),
            recording_id: None,
            stopped: false,
        }
    }

    /// Proxy host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port, `0` when unset
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Operating mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Recording file handed to the proxy on start
    #[must_use]
    pub fn recording_file(&self) -> &Path {
        &self.recording_file
    }

    /// Recording id, once the session has started
    #[must_use]
    pub fn recording_id(&self) -> Option<&str> {
        self.recording_id.as_deref()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        match (&self.recording_id, self.stopped) {
            (None, _) => SessionState::Unstarted,
            (Some(_), false) => SessionState::Started,
            (Some(_), true) => SessionState::Stopped,
        }
    }

    /// Adopt a session that was started elsewhere, e.g. by another process
    ///
    /// # Errors
    ///
    /// Returns error if this session already has a recording id or `recording_id` is empty
    pub fn attach(&mut self, recording_id: impl Into<String>) -> Result<()> {
        self.mark_started(recording_id.into())
    }

    /// `host[:port]` of the proxy, bracketing IPv6 literals
    pub(crate) fn authority(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == 0 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Control endpoint for `action` (`start` or `stop`)
    pub(crate) fn control_url(&self, scheme: &str, action: &str) -> String {
        format!("{scheme}://{}/{}/{action}", self.authority(), self.mode)
    }

    pub(crate) fn mark_started(&mut self, recording_id: String) -> Result<()> {
        let state = self.state();
        if state != SessionState::Unstarted {
            return Err(ShimError::SessionState(format!(
                "Cannot start a session that is already {state}"
            )));
        }

        if recording_id.trim().is_empty() {
            return Err(ShimError::ProxyProtocol(
                "Proxy issued an empty recording id".to_string(),
            ));
        }

        self.recording_id = Some(recording_id);
        Ok(())
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.stopped = true;
    }

    /// Recording id of a started session
    ///
    /// # Errors
    ///
    /// Returns error unless the session is started
    pub(crate) fn require_started(&self) -> Result<&str> {
        match (self.state(), self.recording_id.as_deref()) {
            (SessionState::Started, Some(id)) => Ok(id),
            (state, _) => Err(ShimError::SessionState(format!(
                "Session is {state}; start it before redirecting or stopping"
            ))),
        }
    }
}
