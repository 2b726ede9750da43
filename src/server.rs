use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::handler::{QueryHandler, MAX_DATAGRAM_SIZE};
use crate::ProxyError;

/// Receives client datagrams and answers each on its own task, with at most
/// `max_in_flight` tasks alive at once.
pub struct Server {
    socket: Arc<UdpSocket>,
    handler: Arc<QueryHandler>,
    limiter: Arc<Semaphore>,
    shutdown_grace: Duration,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        handler: QueryHandler,
        max_in_flight: usize,
        shutdown_grace: Duration,
    ) -> Result<Self, ProxyError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
            handler: Arc::new(handler),
            limiter: Arc::new(Semaphore::new(max_in_flight)),
            shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until `shutdown` is cancelled, then gives in-flight requests
    /// up to the grace period to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        let mut buf = [0; MAX_DATAGRAM_SIZE];

        if let Ok(addr) = self.local_addr() {
            info!(%addr, "listening");
        }

        loop {
            // Waiting for a permit before reading applies backpressure
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        continue;
                    }
                },
            };

            let datagram = Bytes::copy_from_slice(&buf[..len]);
            let socket = Arc::clone(&self.socket);
            let handler = Arc::clone(&self.handler);

            tracker.spawn(async move {
                dispatch(&handler, &socket, &datagram, peer).await;
                drop(permit);
            });
        }

        tracker.close();
        info!(in_flight = tracker.len(), "stopped accepting queries");

        if tokio::time::timeout(self.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                abandoned = tracker.len(),
                "grace period elapsed, abandoning in-flight queries"
            );
        }
    }
}

async fn dispatch(handler: &QueryHandler, socket: &UdpSocket, datagram: &[u8], peer: SocketAddr) {
    match handler.handle(datagram).await {
        Ok(reply) => {
            if let Err(e) = socket.send_to(reply.bytes(), peer).await {
                warn!(%peer, error = %e, "failed to send reply");
            } else {
                debug!(%peer, source = reply.source(), bytes = reply.bytes().len(), "replied");
            }
        }
        Err(e @ ProxyError::MalformedQuery(_)) => {
            debug!(%peer, error = %e, "dropping datagram");
        }
        Err(e) => {
            warn!(%peer, error = %e, "dropping query");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::cache::RecordStore;
    use crate::upstream::{Forwarder, UdpForwarder};
    use crate::{Message, Name, Networkable, RecordType};

    /// Echoes each query back after `delay`, or never answers without one,
    /// counting how many forwards overlap.
    struct SlowForwarder {
        delay: Option<Duration>,
        calls: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowForwarder {
        fn new(delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Forwarder for SlowForwarder {
        async fn forward(&self, query: &[u8]) -> Result<Bytes, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }

            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::copy_from_slice(query))
        }
    }

    async fn spawn_server(
        forwarder: Arc<SlowForwarder>,
        max_in_flight: usize,
        grace: Duration,
    ) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
        let handler = QueryHandler::new(Arc::new(RecordStore::new()), forwarder);
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), handler, max_in_flight, grace)
            .await
            .unwrap();

        let addr = server.local_addr().unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));

        (addr, token, handle)
    }

    async fn send_query(client: &UdpSocket, server: SocketAddr, name: &str) {
        let query = Message::query(Name::new(name), RecordType::A);
        client.send_to(&query.to_bytes(), server).await.unwrap();
    }

    async fn recv_reply(client: &UdpSocket, wait: Duration) -> Option<usize> {
        let mut buf = [0; MAX_DATAGRAM_SIZE];
        tokio::time::timeout(wait, client.recv(&mut buf))
            .await
            .ok()
            .map(|received| received.unwrap())
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let forwarder = UdpForwarder::new((Ipv4Addr::LOCALHOST, 9).into(), Duration::from_secs(1));
        let handler = QueryHandler::new(Arc::new(RecordStore::new()), Arc::new(forwarder));

        let err = Server::bind(addr, handler, 8, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::Bind { .. }));
    }

    #[tokio::test]
    async fn in_flight_cap_serializes_handlers() {
        let forwarder = SlowForwarder::new(Some(Duration::from_millis(50)));
        let (server, token, handle) =
            spawn_server(Arc::clone(&forwarder), 1, Duration::from_secs(1)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for name in ["a.example.", "b.example.", "c.example."] {
            send_query(&client, server, name).await;
        }
        for _ in 0..3 {
            assert!(recv_reply(&client, Duration::from_secs(2)).await.is_some());
        }

        assert_eq!(forwarder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(forwarder.peak.load(Ordering::SeqCst), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn in_flight_query_finishes_after_cancel() {
        let forwarder = SlowForwarder::new(Some(Duration::from_millis(200)));
        let (server, token, handle) =
            spawn_server(Arc::clone(&forwarder), 8, Duration::from_secs(2)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_query(&client, server, "example.com.").await;
        while forwarder.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        assert!(recv_reply(&client, Duration::from_secs(1)).await.is_some());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarder.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stuck_query_is_abandoned_after_grace() {
        let forwarder = SlowForwarder::new(None);
        let (server, token, handle) =
            spawn_server(Arc::clone(&forwarder), 8, Duration::from_millis(100)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_query(&client, server, "example.com.").await;
        while forwarder.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let cancelled_at = tokio::time::Instant::now();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(cancelled_at.elapsed() >= Duration::from_millis(100));
        assert!(recv_reply(&client, Duration::from_millis(50)).await.is_none());
    }
}
