//! Proxy-or-direct routing

use crate::config::ShimConfig;
use crate::error::InterceptError;
use crate::session::ProxySessionConfig;
use crate::{Result, ShimError};

use super::{HttpRequest, HttpResponse, InterceptingTransport, Transport};

/// Either sends straight to the upstream or through the proxy
///
/// When the proxy is disabled no intercepting transport is ever built.
#[derive(Debug, Clone)]
pub enum RoutedTransport<T> {
    /// Requests go to their real destination
    Direct(T),
    /// Requests are redirected through the proxy
    Proxied(InterceptingTransport<T>),
}

impl<T: Transport> RoutedTransport<T> {
    /// Pick the route from configuration
    ///
    /// `session` must be a started session when `config.use_proxy` is set
    /// and is ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the proxy is enabled without a session, and
    /// `SessionState` if the session is not started
    pub fn from_config(
        config: &ShimConfig,
        session: Option<&ProxySessionConfig>,
        inner: T,
    ) -> Result<Self> {
        if !config.use_proxy {
            return Ok(Self::Direct(inner));
        }

        let session = session.ok_or_else(|| {
            ShimError::Config("Proxy is enabled but no session was provided".to_string())
        })?;

        Ok(Self::Proxied(InterceptingTransport::new(session, inner)?))
    }

    /// Whether requests go through the proxy
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        matches!(self, Self::Proxied(_))
    }
}

impl<T: Transport> Transport for RoutedTransport<T> {
    type Error = InterceptError<T::Error>;

    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, Self::Error> {
        match self {
            Self::Direct(inner) => inner.send(request).await.map_err(InterceptError::Upstream),
            Self::Proxied(proxied) => proxied.send(request).await,
        }
    }
}
