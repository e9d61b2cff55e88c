//! Request redirection through the record/playback proxy

use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::http::uri::{Authority, PathAndQuery};
use hyper::Uri;
use tracing::debug;

use crate::config::Mode;
use crate::error::InterceptError;
use crate::protocol;
use crate::session::ProxySessionConfig;
use crate::{Result, ShimError};

use super::{HttpRequest, HttpResponse, Transport};

/// Immutable redirection parameters taken from a started session
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    authority: Authority,
    mode: Mode,
    recording_id: HeaderValue,
}

impl RedirectTarget {
    /// Capture the proxy location and recording id of a started session
    ///
    /// # Errors
    ///
    /// Returns `SessionState` unless the session is started, and `Config`
    /// if the proxy address or recording id cannot be used in a request
    pub fn from_session(session: &ProxySessionConfig) -> Result<Self> {
        let recording_id = session.require_started()?;

        let authority = session.authority().parse::<Authority>().map_err(|e| {
            ShimError::Config(format!("Invalid proxy address '{}': {e}", session.authority()))
        })?;

        let recording_id = HeaderValue::from_str(recording_id).map_err(|e| {
            ShimError::Config(format!("Recording id is not a valid header value: {e}"))
        })?;

        Ok(Self {
            authority,
            mode: session.mode(),
            recording_id,
        })
    }

    /// Proxy authority requests are sent to
    #[must_use]
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Operating mode stamped on each request
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Rewrite `request` in place so it goes to the proxy
    ///
    /// Only the authority changes in the URI; scheme, path and query stay
    /// as they were. The recording headers and `Content-Type` are replaced,
    /// never appended, so applying this twice gives the same request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the request URI is not absolute
    pub fn redirect(&self, request: &mut HttpRequest) -> Result<()> {
        // A request already pointing at the proxy keeps its recorded upstream
        let existing = request
            .headers()
            .get(protocol::UPSTREAM_BASE_URI)
            .filter(|_| request.uri().authority() == Some(&self.authority))
            .cloned();

        let base_value = match existing {
            Some(value) => value,
            None => {
                let base_uri = upstream_base_uri(request.uri())?;
                HeaderValue::from_str(&base_uri).map_err(|e| {
                    ShimError::InvalidRequest(format!("Upstream base URI '{base_uri}': {e}"))
                })?
            }
        };

        let mut parts = request.uri().clone().into_parts();
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        let proxied = Uri::from_parts(parts)
            .map_err(|e| ShimError::InvalidRequest(format!("Cannot rebuild URI: {e}")))?;

        debug!(
            "Redirecting {} {:?} via {}",
            request.method(),
            base_value,
            self.authority
        );

        let headers = request.headers_mut();
        headers.insert(
            HeaderName::from_static(protocol::RECORDING_ID),
            self.recording_id.clone(),
        );
        headers.insert(
            HeaderName::from_static(protocol::RECORDING_MODE),
            HeaderValue::from_static(self.mode.as_str()),
        );
        headers.insert(HeaderName::from_static(protocol::UPSTREAM_BASE_URI), base_value);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(protocol::JSON_CONTENT_TYPE),
        );

        *request.uri_mut() = proxied;
        Ok(())
    }
}

/// Original URL truncated before its final path segment
///
/// `https://host/table1/entity1` gives `https://host/table1`; a URL without
/// a path segment gives `https://host`. The query never takes part, and
/// userinfo is dropped so credentials never reach the proxy.
///
/// # Errors
///
/// Returns `InvalidRequest` if `uri` has no scheme or authority
pub fn upstream_base_uri(uri: &Uri) -> Result<String> {
    let (Some(scheme), Some(host)) = (uri.scheme_str(), uri.host()) else {
        return Err(ShimError::InvalidRequest(format!(
            "Request URI '{uri}' must be absolute to be redirected"
        )));
    };

    let path = uri.path();
    let prefix = path.rfind('/').map_or("", |i| &path[..i]);

    match uri.port_u16() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}{prefix}")),
        None => Ok(format!("{scheme}://{host}{prefix}")),
    }
}

/// Transport that routes every request through the proxy
///
/// Holds only immutable session data, so one instance can serve concurrent
/// requests. Responses and errors of the wrapped transport are returned
/// untouched.
#[derive(Debug, Clone)]
pub struct InterceptingTransport<T> {
    target: RedirectTarget,
    inner: T,
}

impl<T: Transport> InterceptingTransport<T> {
    /// Bind `inner` to a started session
    ///
    /// # Errors
    ///
    /// Returns `SessionState` if the session has not been started (or was
    /// already stopped)
    pub fn new(session: &ProxySessionConfig, inner: T) -> Result<Self> {
        Ok(Self {
            target: RedirectTarget::from_session(session)?,
            inner,
        })
    }

    /// Redirection parameters in use
    #[must_use]
    pub fn target(&self) -> &RedirectTarget {
        &self.target
    }

    /// Wrapped transport
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for InterceptingTransport<T> {
    type Error = InterceptError<T::Error>;

    async fn send(
        &self,
        mut request: HttpRequest,
    ) -> std::result::Result<HttpResponse, Self::Error> {
        self.target.redirect(&mut request)?;
        self.inner
            .send(request)
            .await
            .map_err(InterceptError::Upstream)
    }
}
