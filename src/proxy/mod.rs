//! Live proxy pool and the plumbing used to talk through a proxy
//!
//! - Weighted selection with eviction over scored proxies
//! - HTTP clients and raw CONNECT tunnels through a proxy
//! - Pre-use validation of a proxy by tunnelling to a known host

pub mod pool;
pub mod transport;
pub mod validator;

pub use pool::{LivePool, PoolSource};
pub use transport::ProxyTransport;
pub use validator::{ConnectValidator, ProxyValidator};
