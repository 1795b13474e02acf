//! DNS resolver trait and implementations.
//!
//! Provides abstraction over upstream resolution to enable testing with
//! mock resolvers and alternative resolution strategies.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Maximum DNS message size over UDP.
pub const MAX_UDP_DNS_SIZE: usize = 512;

/// How long to wait for the upstream resolver before answering SERVFAIL.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Trait for DNS resolution.
///
/// Implementations can resolve queries through various mechanisms:
/// an upstream UDP resolver, or mock responses for testing.
pub trait Resolve: Send + Sync + Clone + 'static {
    /// Resolve a DNS query and return the response.
    fn resolve(&self, query: &Message) -> impl Future<Output = Result<Message>> + Send;
}

/// Upstream DNS resolver using UDP with a bounded timeout.
#[derive(Clone)]
pub struct UpstreamResolver {
    upstream_addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamResolver {
    /// Create a new upstream resolver with the default timeout.
    #[must_use]
    pub const fn new(upstream_addr: SocketAddr) -> Self {
        Self {
            upstream_addr,
            timeout: UPSTREAM_TIMEOUT,
        }
    }

    /// Create a resolver with a custom timeout.
    #[must_use]
    pub const fn with_timeout(upstream_addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            upstream_addr,
            timeout,
        }
    }
}

impl Resolve for UpstreamResolver {
    async fn resolve(&self, query: &Message) -> Result<Message> {
        let exchange = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(self.upstream_addr).await?;

            let query_bytes = query.to_bytes()?;
            socket.send(&query_bytes).await?;

            let mut response_buf = [0u8; MAX_UDP_DNS_SIZE];
            let len = socket.recv(&mut response_buf).await?;

            Ok(Message::from_bytes(&response_buf[..len])?)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Resolver(format!("upstream {} timed out", self.upstream_addr)))?
    }
}

/// Find an upstream resolver in a resolv.conf style file, skipping
/// nameserver lines that point back at the daemon itself.
pub fn discover_upstream(path: &Path, own_host: &str) -> Result<SocketAddr> {
    let content = std::fs::read_to_string(path)?;

    for line in content.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("nameserver") else {
            continue;
        };
        let server = rest.trim();
        if server.is_empty() || server == own_host {
            continue;
        }
        if let Ok(ip) = server.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, 53));
        }
    }

    Err(Error::NoUpstream(path.to_path_buf()))
}
