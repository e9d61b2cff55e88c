//! Proxy session lifecycle
//!
//! A session moves `Unstarted → Started → Stopped`. The recording id is
//! issued by the proxy on start; requests may only be redirected while the
//! session is started.

mod controller;
mod state;

pub use controller::{ControlOptions, ProxyController};
pub use state::{ProxySessionConfig, SessionState};
