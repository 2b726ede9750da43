use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::RecordStore;
use crate::config::Config;
use crate::handler::QueryHandler;
use crate::janitor::CacheJanitor;
use crate::persistence::Persistence;
use crate::server::Server;
use crate::upstream::UdpForwarder;
use crate::ProxyError;

/// The whole forwarder: restored cache, bound listener and the janitor that
/// runs next to it.
pub struct Proxy {
    store: Arc<RecordStore>,
    persistence: Arc<Persistence>,
    server: Server,
    sweep_interval: Duration,
}

impl Proxy {
    /// Restores the cache snapshot and binds the listener. Failing to bind is
    /// the only error.
    pub async fn start(config: &Config) -> Result<Self, ProxyError> {
        let persistence = Arc::new(Persistence::new(&config.cache_file));
        let store = Arc::new(RecordStore::from_index(persistence.load().await));
        info!(names = store.len(), "cache ready");

        let forwarder = UdpForwarder::new(config.upstream_addr()?, config.upstream_timeout());
        let upstream = forwarder.upstream();
        let handler = QueryHandler::new(Arc::clone(&store), Arc::new(forwarder));

        let server = Server::bind(
            config.listen,
            handler,
            config.max_in_flight,
            config.shutdown_grace(),
        )
        .await?;
        info!(%upstream, "forwarding cache misses");

        Ok(Self {
            store,
            persistence,
            server,
            sweep_interval: config.sweep_interval(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Serves until `shutdown` fires. Then the listener drains, the janitor
    /// stops between ticks and a final snapshot is written; its failure is
    /// the returned error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ProxyError> {
        let janitor = CacheJanitor::new(Arc::clone(&self.store), Arc::clone(&self.persistence))
            .with_period(self.sweep_interval)
            .with_cancellation(shutdown.clone())
            .start();

        self.server.run(shutdown).await;
        janitor.await.ok();

        self.persistence.save_store(&self.store).await?;
        info!(names = self.store.len(), "cache saved");

        Ok(())
    }
}
