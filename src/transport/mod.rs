//! HTTP send abstraction
//!
//! Everything that sends a request implements [`Transport`]. The
//! intercepting transport wraps another transport rather than any concrete
//! client, so application code can stay unaware of the proxy.

mod intercept;
mod network;
mod routed;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

pub use intercept::{upstream_base_uri, InterceptingTransport, RedirectTarget};
pub use network::NetworkTransport;
pub use routed::RoutedTransport;

/// Request handed to a transport
pub type HttpRequest = hyper::Request<Bytes>;

/// Response returned by a transport
pub type HttpResponse = hyper::Response<Bytes>;

/// Minimal HTTP send capability
pub trait Transport: Send + Sync {
    /// Error produced when a request cannot be sent
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send one request and return its response
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = std::result::Result<HttpResponse, Self::Error>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    type Error = T::Error;

    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = std::result::Result<HttpResponse, Self::Error>> + Send {
        (**self).send(request)
    }
}
