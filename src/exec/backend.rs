// src/exec/backend.rs

//! Pluggable endpoint probing.
//!
//! Drivers of function-executing deployments (Dask) wait for the engine
//! they submitted to become reachable before running anything against it.
//! They do so through an `EndpointProbe` instead of opening sockets
//! directly, so tests can swap in a probe that succeeds, fails, or counts.
//!
//! - `TcpProbe` is the production implementation: an endpoint is reachable
//!   once a TCP connection to it succeeds within the probe timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::trace;

/// Trait abstracting "is this engine endpoint up yet?".
pub trait EndpointProbe: Send + Sync {
    /// Probe `address` (`host:port`) once. Must not retry internally.
    fn probe<'a>(&'a self, address: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Probe that attempts a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl EndpointProbe for TcpProbe {
    fn probe<'a>(&'a self, address: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, TcpStream::connect(address)).await {
                Ok(Ok(_stream)) => true,
                Ok(Err(err)) => {
                    trace!(%address, error = %err, "endpoint not reachable");
                    false
                }
                Err(_elapsed) => {
                    trace!(%address, "endpoint probe timed out");
                    false
                }
            }
        })
    }
}
