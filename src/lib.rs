//! testproxy-shim - route any HTTP client through a record/playback test proxy
//!
//! A session is started with [`session::ProxyController::start`], requests are
//! sent through a [`transport::InterceptingTransport`] bound to that session,
//! and [`session::ProxyController::stop`] tells the proxy to persist (or drop)
//! the capture.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{InterceptError, Result, ShimError};
