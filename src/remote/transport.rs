//! HTTP transport construction.
//!
//! The media CDN is sometimes unreachable through the system resolver, so
//! the transport accepts static host→address overrides as plain data. The
//! rest of the crate only ever sees the finished [`reqwest::Client`].

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for the shared HTTP client.
#[derive(Debug, Clone, Default)]
pub struct TransportBuilder {
    overrides: Vec<(String, SocketAddr)>,
    request_timeout: Option<Duration>,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `host` to a fixed address, bypassing the system resolver.
    pub fn resolve(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.overrides.push((host.into(), addr));
        self
    }

    /// Overall per-request timeout. Left unset for download requests, which
    /// may legitimately stream for a long time.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(concat!("photomirror/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        for (host, addr) in self.overrides {
            builder = builder.resolve(&host, addr);
        }
        builder.build().context("failed to build HTTP client")
    }
}

/// Parse a `host=ip:port` override flag.
pub fn parse_resolve_entry(raw: &str) -> anyhow::Result<(String, SocketAddr)> {
    let (host, addr) = raw
        .split_once('=')
        .with_context(|| format!("expected host=ip:port, got '{raw}'"))?;
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid socket address '{addr}' in '{raw}'"))?;
    anyhow::ensure!(!host.is_empty(), "empty host in '{raw}'");
    Ok((host.to_string(), addr))
}
