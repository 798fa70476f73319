use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdht::bencode::{encode, Value};
use rdht::dht::{DhtMessage, Endpoint, Identifier, MessageBody, NodeServer};
use rdht::{DhtConfig, NodeWrangler};

struct TestNode {
    wrangler: NodeWrangler,
    server: Arc<NodeServer>,
}

impl TestNode {
    async fn new() -> Self {
        let wrangler = NodeWrangler::new(DhtConfig::default()).expect("wrangler starts");
        let server = wrangler
            .add_server(
                Identifier::generate(),
                SocketAddr::from(([127, 0, 0, 1], 0)),
                None,
                false,
            )
            .await
            .expect("server binds");
        Self { wrangler, server }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.server.local_addr())
    }

    async fn shutdown(self) {
        self.wrangler.shutdown().await;
    }
}

async fn await_reply(handle: rdht::QueryHandle) -> DhtMessage {
    tokio::time::timeout(Duration::from_secs(5), handle.response())
        .await
        .expect("reply in time")
        .expect("query not expired")
}

#[tokio::test]
async fn ping_confirms_responsive_node() {
    let main = TestNode::new().await;
    let peer = TestNode::new().await;

    let reply = await_reply(main.server.ping(peer.endpoint()).await.unwrap()).await;
    assert!(matches!(reply.body, MessageBody::Response(_)));

    let nodes = main.server.nodes().await.unwrap();
    let node = nodes
        .iter()
        .find(|n| n.id == *peer.server.id())
        .expect("peer in routing table");
    assert!(node.good);
    assert!(!node.pending);
    assert_eq!(node.endpoint, peer.endpoint());
    assert_eq!(node.received, 1);

    // The queried side learns about us as well.
    let nodes = peer.server.nodes().await.unwrap();
    assert!(nodes.iter().any(|n| n.id == *main.server.id()));
    assert!(peer.server.got_incoming());

    main.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn get_peers_then_announce() {
    let main = TestNode::new().await;
    let peer = TestNode::new().await;
    let info_hash = Identifier::generate();
    let downloader = Endpoint::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)), 51413);

    peer.wrangler
        .storage()
        .call(move |db| {
            db.torrents_mut()
                .record_announcement(downloader, info_hash, false, Instant::now());
        })
        .await
        .unwrap();

    let reply = await_reply(
        main.server
            .get_peers(peer.endpoint(), info_hash, false)
            .await
            .unwrap(),
    )
    .await;
    let response = match reply.body {
        MessageBody::Response(response) => response,
        other => panic!("expected response, got {:?}", other),
    };
    assert_eq!(response.values, Some(vec![downloader]));
    let token = response.token.expect("get_peers carries a token");

    // Returned peers are remembered locally.
    let known = main.wrangler.peers_for(info_hash, false).await.unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].peer, downloader);

    let reply = await_reply(
        main.server
            .announce_peer(peer.endpoint(), info_hash, 6000, token, true)
            .await
            .unwrap(),
    )
    .await;
    assert!(matches!(reply.body, MessageBody::Response(_)));

    let links = peer.wrangler.peers_for(info_hash, false).await.unwrap();
    assert_eq!(links.len(), 2);
    let announced = links
        .iter()
        .find(|l| l.peer == Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6000))
        .expect("announcement recorded");
    assert!(announced.seed);

    let torrent = peer
        .wrangler
        .torrents()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.info_hash == info_hash)
        .unwrap();
    assert!(torrent.seed_estimate() > 0.5);
    assert!(torrent.peer_estimate() > 0.5);

    main.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn announce_with_stale_token_is_rejected() {
    let main = TestNode::new().await;
    let peer = TestNode::new().await;
    let info_hash = Identifier::generate();

    let reply = await_reply(
        main.server
            .announce_peer(
                peer.endpoint(),
                info_hash,
                6000,
                bytes::Bytes::from_static(b"not a token"),
                false,
            )
            .await
            .unwrap(),
    )
    .await;
    assert!(matches!(reply.body, MessageBody::Error { code: 203, .. }));
    assert!(peer.wrangler.torrents().await.unwrap().is_empty());

    main.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn bootstrap_populates_routing_table() {
    let main = TestNode::new().await;
    let peer = TestNode::new().await;

    let mut dict = std::collections::BTreeMap::new();
    dict.insert(
        bytes::Bytes::from_static(b"nodes"),
        Value::List(vec![Value::List(vec![
            Value::string("127.0.0.1"),
            Value::Integer(i64::from(peer.endpoint().port())),
        ])]),
    );
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&encode(&Value::Dict(dict)).unwrap()).unwrap();
    file.flush().unwrap();

    assert_eq!(main.server.load_bootstrap(file.path()).await.unwrap(), 1);

    let peer_id = *peer.server.id();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let nodes = main.server.nodes().await.unwrap();
        if nodes.iter().any(|n| n.id == peer_id && !n.pending) {
            break;
        }
        assert!(Instant::now() < deadline, "bootstrap node never answered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let closest = main.server.closest(peer_id, 8).await.unwrap();
    assert_eq!(closest[0].id, peer_id);

    main.shutdown().await;
    peer.shutdown().await;
}
