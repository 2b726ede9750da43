use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cachedns::cache::RecordStore;
use cachedns::handler::QueryHandler;
use cachedns::persistence::Persistence;
use cachedns::server::Server;
use cachedns::upstream::UdpForwarder;
use cachedns::{Message, Name, Networkable, RecordData, RecordType, ResourceRecord, CLASS_IN};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ANSWER: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

/// Answers every A query with `ANSWER`, or stays silent.
async fn spawn_upstream(silent: bool) -> (SocketAddr, Arc<AtomicUsize>) {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    tokio::spawn(async move {
        let mut buf = [0; 512];
        loop {
            let Ok((len, peer)) = sock.recv_from(&mut buf).await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            if silent {
                continue;
            }

            let mut message = Message::from_bytes(&mut Cursor::new(&buf[..len])).unwrap();
            message.header.flags.set_qr(true);
            message.header.flags.set_ra(true);
            let name = message.questions[0].name.clone();
            message.add_answer(ResourceRecord {
                name,
                type_: RecordType::A,
                class: CLASS_IN,
                ttl: 300,
                data: RecordData::A(ANSWER),
            });

            sock.send_to(&message.to_bytes(), peer).await.unwrap();
        }
    });

    (addr, calls)
}

async fn spawn_proxy(
    store: Arc<RecordStore>,
    upstream: SocketAddr,
    timeout: Duration,
) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
    let forwarder = UdpForwarder::new(upstream, timeout);
    let handler = QueryHandler::new(store, Arc::new(forwarder));
    let server = Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        handler,
        16,
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    let addr = server.local_addr().unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(server.run(token.clone()));

    (addr, token, handle)
}

async fn ask(proxy: SocketAddr, name: &str) -> Option<Message> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let query = Message::query(Name::new(name), RecordType::A);
    client.send_to(&query.to_bytes(), proxy).await.unwrap();

    let mut buf = [0; 512];
    let len = tokio::time::timeout(Duration::from_millis(500), client.recv(&mut buf))
        .await
        .ok()?
        .unwrap();

    let reply = Message::from_bytes(&mut Cursor::new(&buf[..len])).unwrap();
    assert_eq!(reply.header.id, query.header.id);
    Some(reply)
}

#[tokio::test]
async fn miss_then_hit() {
    let (upstream, calls) = spawn_upstream(false).await;
    let store = Arc::new(RecordStore::new());
    let (proxy, token, handle) =
        spawn_proxy(Arc::clone(&store), upstream, Duration::from_secs(2)).await;

    let first = ask(proxy, "example.com.").await.unwrap();
    assert_eq!(first.answers[0].data, RecordData::A(ANSWER));
    assert_eq!(first.answers[0].ttl, 300);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = ask(proxy, "example.com.").await.unwrap();
    assert_eq!(second.answers[0].data, RecordData::A(ANSWER));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn silent_upstream_means_no_reply() {
    let (upstream, calls) = spawn_upstream(true).await;
    let store = Arc::new(RecordStore::new());
    let (proxy, token, handle) =
        spawn_proxy(Arc::clone(&store), upstream, Duration::from_millis(100)).await;

    assert!(ask(proxy, "example.com.").await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.is_empty());

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn garbage_datagram_does_not_stop_listener() {
    let (upstream, _calls) = spawn_upstream(false).await;
    let (proxy, token, handle) =
        spawn_proxy(Arc::new(RecordStore::new()), upstream, Duration::from_secs(2)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&[0xde, 0xad], proxy).await.unwrap();

    assert!(ask(proxy, "example.org.").await.is_some());

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Persistence::new(dir.path().join("dns_cache.json"));
    let (upstream, calls) = spawn_upstream(false).await;

    let store = Arc::new(RecordStore::from_index(persistence.load().await));
    let (proxy, token, handle) =
        spawn_proxy(Arc::clone(&store), upstream, Duration::from_secs(2)).await;
    ask(proxy, "example.com.").await.unwrap();
    token.cancel();
    handle.await.unwrap();
    persistence.save_store(&store).await.unwrap();

    // A fresh process loads the snapshot and answers without upstream
    let restored = Arc::new(RecordStore::from_index(persistence.load().await));
    let (proxy, token, handle) = spawn_proxy(restored, upstream, Duration::from_secs(2)).await;
    let reply = ask(proxy, "example.com.").await.unwrap();

    assert_eq!(reply.answers[0].data, RecordData::A(ANSWER));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    token.cancel();
    handle.await.unwrap();
}
