use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, instrument, trace};

use crate::ProxyError;

/// Upstream replies may exceed the 512 bytes accepted from clients.
const MAX_UPSTREAM_RESPONSE: usize = 4096;

/// Sends a raw query somewhere that can answer it.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Returns the raw reply bytes, unmodified.
    async fn forward(&self, query: &[u8]) -> Result<Bytes, ProxyError>;
}

/// Forwards queries verbatim to a single resolver over UDP.
#[derive(Debug, Clone)]
pub struct UdpForwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl UdpForwarder {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    async fn connect(&self) -> io::Result<UdpSocket> {
        let local: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let sock = UdpSocket::bind(local).await?;
        sock.connect(self.upstream).await?;
        Ok(sock)
    }

    /// Waits for the reply carrying transaction id `id`, skipping stray
    /// datagrams.
    async fn receive_reply(&self, sock: &UdpSocket, id: [u8; 2]) -> io::Result<Bytes> {
        let mut buf = vec![0; MAX_UPSTREAM_RESPONSE];

        loop {
            let len = sock.recv(&mut buf).await?;
            if len >= 2 && buf[..2] == id {
                buf.truncate(len);
                return Ok(Bytes::from(buf));
            }

            trace!(len, "discarding datagram with foreign transaction id");
        }
    }
}

#[async_trait]
impl Forwarder for UdpForwarder {
    #[instrument(level = "debug", skip_all, fields(upstream = %self.upstream))]
    async fn forward(&self, query: &[u8]) -> Result<Bytes, ProxyError> {
        let id = match query {
            [a, b, ..] => [*a, *b],
            _ => {
                return Err(ProxyError::UpstreamUnreachable(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "query shorter than a transaction id",
                )))
            }
        };

        let sock = self
            .connect()
            .await
            .map_err(ProxyError::UpstreamUnreachable)?;
        sock.send(query)
            .await
            .map_err(ProxyError::UpstreamUnreachable)?;

        let reply = tokio::time::timeout(self.timeout, self.receive_reply(&sock, id))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.timeout))?
            .map_err(ProxyError::UpstreamUnreachable)?;

        debug!(bytes = reply.len(), "upstream replied");

        Ok(reply)
    }
}
