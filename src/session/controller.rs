//! Control channel to the record/playback proxy

use std::borrow::Cow;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ShimConfig;
use crate::protocol;
use crate::{Result, ShimError};

use super::ProxySessionConfig;

/// Control channel settings
#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// `http` or `https`
    pub scheme: String,
    /// Accept unverified proxy certificates. Applies to this client only.
    pub insecure_tls: bool,
    /// Save directive sent on stop
    pub save_recording: bool,
    /// Per-request timeout; `None` leaves requests unbounded
    pub timeout: Option<Duration>,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            insecure_tls: true,
            save_recording: true,
            timeout: None,
        }
    }
}

impl From<&ShimConfig> for ControlOptions {
    fn from(config: &ShimConfig) -> Self {
        Self {
            scheme: config.scheme.clone(),
            insecure_tls: config.insecure_tls,
            save_recording: config.save_recording,
            timeout: config.timeout(),
        }
    }
}

/// JSON body of the start call
#[derive(Serialize)]
struct StartBody<'a> {
    #[serde(rename = "x-recording-file")]
    recording_file: Cow<'a, str>,
}

/// Starts and stops proxy sessions
///
/// After a record session, [`stop`](Self::stop) must be called. If it is
/// skipped, the proxy never persists the capture and it is lost.
pub struct ProxyController {
    client: reqwest::Client,
    scheme: String,
    save_recording: bool,
}

impl ProxyController {
    /// Create a controller with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(options: ControlOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(options.insecure_tls);

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| ShimError::Config(format!("Failed to build control client: {e}")))?;

        Ok(Self {
            client,
            scheme: options.scheme,
            save_recording: options.save_recording,
        })
    }

    /// Create a controller from shim configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &ShimConfig) -> Result<Self> {
        Self::new(ControlOptions::from(config))
    }

    /// Save directive this controller sends on stop
    #[must_use]
    pub fn save_recording(&self) -> bool {
        self.save_recording
    }

    /// Start a session and store the issued recording id
    ///
    /// # Errors
    ///
    /// - `SessionState` if the session was already started
    /// - `ProxyUnavailable` if the proxy cannot be reached
    /// - `ProxyProtocol` on a non-2xx status or a missing `x-recording-id` header
    pub async fn start(&self, session: &mut ProxySessionConfig) -> Result<String> {
        if let Some(id) = session.recording_id() {
            return Err(ShimError::SessionState(format!(
                "Session already started with recording id {id}"
            )));
        }

        let url = session.control_url(&self.scheme, "start");
        let body = StartBody {
            recording_file: session.recording_file().to_string_lossy(),
        };

        debug!("Starting {} session at {}", session.mode(), url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&url, &e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Proxy rejected start: {} {}", status, url);
            return Err(ShimError::ProxyProtocol(format!(
                "Start returned {status} from {url}"
            )));
        }

        let recording_id = recording_id_header(response.headers())?;
        session.mark_started(recording_id.clone())?;

        info!(
            "Started {} session {} ({})",
            session.mode(),
            recording_id,
            session.recording_file().display()
        );

        Ok(recording_id)
    }

    /// Stop a started session
    ///
    /// The stop call is made once and never retried. The session counts as
    /// stopped even if the call fails, and the failure is returned so the
    /// caller can report an unsaved recording.
    ///
    /// # Errors
    ///
    /// - `SessionState` if the session is not started; no request is made
    /// - `ProxyUnavailable` if the proxy cannot be reached
    /// - `ProxyProtocol` on a non-2xx status
    pub async fn stop(&self, session: &mut ProxySessionConfig) -> Result<()> {
        let recording_id = session.require_started()?.to_string();
        let url = session.control_url(&self.scheme, "stop");
        session.mark_stopped();

        debug!("Stopping session {} at {}", recording_id, url);

        let response = self
            .client
            .post(&url)
            .header(protocol::RECORDING_ID, &recording_id)
            .header(
                protocol::RECORDING_SAVE,
                if self.save_recording { "true" } else { "false" },
            )
            .send()
            .await
            .map_err(|e| {
                warn!("Recording {} not saved: stop failed", recording_id);
                classify(&url, &e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Recording {} not saved: proxy returned {}",
                recording_id, status
            );
            return Err(ShimError::ProxyProtocol(format!(
                "Stop returned {status} from {url}"
            )));
        }

        info!(
            "Stopped {} session {} (save: {})",
            session.mode(),
            recording_id,
            self.save_recording
        );

        Ok(())
    }
}

fn recording_id_header(headers: &HeaderMap) -> Result<String> {
    let value = headers.get(protocol::RECORDING_ID).ok_or_else(|| {
        ShimError::ProxyProtocol(format!(
            "Start response is missing the {} header",
            protocol::RECORDING_ID
        ))
    })?;

    let id = value.to_str().map_err(|e| {
        ShimError::ProxyProtocol(format!("Malformed {} header: {e}", protocol::RECORDING_ID))
    })?;

    if id.trim().is_empty() {
        return Err(ShimError::ProxyProtocol(format!(
            "Start response carries an empty {} header",
            protocol::RECORDING_ID
        )));
    }

    Ok(id.to_string())
}

/// Connection and timeout failures mean the proxy is unreachable; anything
/// else happened after it answered.
fn classify(url: &str, error: &reqwest::Error) -> ShimError {
    if error.is_connect() || error.is_timeout() {
        ShimError::ProxyUnavailable {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        ShimError::ProxyProtocol(format!("Request to {url} failed: {error}"))
    }
}
