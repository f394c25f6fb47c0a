//! Networks of sessions talking over loopback UDP.

use std::thread;
use std::time::Duration;

use chunkdht::{Key, Session, SessionBuilder, State, Testnet, MAX_BUCKET_SIZE_K};

fn quick() -> SessionBuilder {
    let mut builder = Session::builder();
    builder
        .request_timeout(Duration::from_millis(300))
        .bootstrap_timeout(Duration::from_secs(5));

    builder
}

#[test]
fn three_sessions_in_a_ring() {
    let testnet = Testnet::ring_with(&quick(), 3).unwrap();
    let mut nodes = testnet.nodes.into_iter();

    let (s0, s1, s2) = (
        nodes.next().unwrap(),
        nodes.next().unwrap(),
        nodes.next().unwrap(),
    );

    for session in [&s0, &s1, &s2] {
        assert_eq!(session.state(), State::Active);
    }

    let data: &[u8] = &[1, 2, 3, 4, 5];
    let key = s0.set(data).unwrap();

    assert_eq!(s1.get(&key).unwrap(), data);
    assert_eq!(s2.get(&key).unwrap(), data);

    s0.teardown(true);

    assert_eq!(s1.get(&key).unwrap(), data);

    s1.teardown(false);
    s2.teardown(false);
}

#[test]
fn bootstrap_learns_real_key() {
    let testnet = Testnet::new_with(&quick(), 2).unwrap();
    let (founder, joiner) = (&testnet.nodes[0], &testnet.nodes[1]);

    let joiner_peers = joiner.peers();
    assert_eq!(joiner_peers.len(), 1);
    assert_eq!(joiner_peers[0].key, founder.key());
    assert_eq!(joiner_peers[0].endpoint, founder.endpoint());

    // The founder learned the joiner from its requests.
    let founder_peers = founder.peers();
    assert_eq!(founder_peers.len(), 1);
    assert_eq!(founder_peers[0].key, joiner.key());
    assert_eq!(founder_peers[0].endpoint, joiner.endpoint());

    let known = founder.peer(&joiner.key()).unwrap();
    assert_eq!(known.endpoint, joiner.endpoint());

    testnet.teardown(false);
}

#[test]
fn set_and_get_across_network() {
    let testnet = Testnet::new_with(&quick(), 8).unwrap();

    let key = testnet.nodes[3].set(&b"spread me"[..]).unwrap();
    assert_eq!(key, Key::from_data(b"spread me"));

    for session in &testnet.nodes {
        assert_eq!(session.get(&key).unwrap(), &b"spread me"[..]);
    }

    let named = Key::from_name("greeting");
    testnet.nodes[5]
        .set_with_key(named, &b"hello"[..])
        .unwrap();

    assert_eq!(testnet.nodes[0].get(&named).unwrap(), &b"hello"[..]);

    testnet.teardown(false);
}

#[test]
fn get_missing_chunk() {
    let testnet = Testnet::new_with(&quick(), 4).unwrap();

    assert!(testnet.nodes[2].get(&Key::random()).is_none());

    testnet.teardown(false);
}

#[test]
fn unresponsive_peer_is_evicted() {
    let testnet = Testnet::new_with(&quick(), 3).unwrap();
    let mut nodes = testnet.nodes;

    let gone = nodes.pop().unwrap();
    let gone_key = gone.key();

    assert!(nodes[0].peers().iter().any(|peer| peer.key == gone_key));

    gone.teardown(false);

    // Publishing looks up and stores on every peer, including the silent one.
    nodes[0].set(&b"anyone there?"[..]).unwrap();

    assert!(!nodes[0].peers().iter().any(|peer| peer.key == gone_key));
    assert!(nodes[0].info().dead_peers() >= 1);

    for session in nodes {
        session.teardown(false);
    }
}

#[test]
fn chunks_expire_everywhere() {
    let mut builder = quick();
    builder
        .expiry_ttl(Duration::from_secs(1))
        .sweep_interval(Duration::from_millis(100));

    let testnet = Testnet::new_with(&builder, 3).unwrap();

    let key = testnet.nodes[0].set(&b"short lived"[..]).unwrap();
    assert!(testnet
        .nodes
        .iter()
        .all(|session| session.has_local_chunk(&key)));

    thread::sleep(Duration::from_millis(1600));

    for session in &testnet.nodes {
        assert!(!session.has_local_chunk(&key));
        assert_eq!(session.info().chunk_count(), 0);
    }
    assert!(testnet.nodes[1].get(&key).is_none());

    testnet.teardown(false);
}

#[test]
fn republishing_does_not_extend_lifetime() {
    let mut builder = quick();
    builder
        .expiry_ttl(Duration::from_millis(1500))
        .republish_interval(Duration::from_millis(300))
        .sweep_interval(Duration::from_millis(100));

    let testnet = Testnet::new_with(&builder, 3).unwrap();

    let key = testnet.nodes[0].set(&b"republished"[..]).unwrap();

    thread::sleep(Duration::from_millis(700));
    assert_eq!(testnet.nodes[2].get(&key).unwrap(), &b"republished"[..]);

    // Gone a TTL after the first publication, publisher included.
    thread::sleep(Duration::from_millis(1600));

    for session in &testnet.nodes {
        assert!(!session.has_local_chunk(&key));
    }
    assert!(testnet.nodes[1].get(&key).is_none());

    testnet.teardown(false);
}

#[test]
fn set_again_under_same_name_overwrites() {
    let testnet = Testnet::new_with(&quick(), 3).unwrap();
    let name = Key::from_name("index");

    testnet.nodes[0].set_with_key(name, &b"v1"[..]).unwrap();
    testnet.nodes[0].set_with_key(name, &b"v2"[..]).unwrap();

    for session in &testnet.nodes {
        assert_eq!(session.get(&name).unwrap(), &b"v2"[..]);
    }

    testnet.teardown(false);
}

#[test]
fn chunks_survive_departure() {
    let builder = quick();

    // Alone in the network, so nobody else gets a copy.
    let mut testnet = Testnet::new_with(&builder, 1).unwrap();
    let key = testnet.nodes[0].set(&b"hand me off"[..]).unwrap();

    for _ in 0..MAX_BUCKET_SIZE_K {
        let session = builder.startup("127.0.0.1:0", &testnet.bootstrap).unwrap();
        testnet.nodes.push(session);
    }

    let mut nodes = testnet.nodes.into_iter();
    let departing = nodes.next().unwrap();
    let remaining: Vec<Session> = nodes.collect();

    assert!(departing.has_local_chunk(&key));
    assert!(remaining.iter().all(|session| !session.has_local_chunk(&key)));

    departing.teardown(true);

    assert!(remaining.iter().any(|session| session.has_local_chunk(&key)));

    for session in &remaining {
        assert_eq!(session.get(&key).unwrap(), &b"hand me off"[..]);
    }

    for session in remaining {
        session.teardown(false);
    }
}
