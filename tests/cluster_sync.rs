//! Blocking client against the in-process fake cluster.

mod common;

use bytes::Bytes;
use clustermux::core::command;
use clustermux::{ClusterBuilder, ClusterClient, Cmd, Error, Frame, NodeAddr, RouteStrategy, Transaction};
use common::FakeCluster;

fn connect(cluster: &FakeCluster) -> ClusterClient {
    ClusterClient::connect(&cluster.seeds()).expect("failed to connect")
}

#[test]
fn test_discovers_every_primary() {
    let cluster = FakeCluster::start(3);
    let client = connect(&cluster);

    let nodes: Vec<_> = client.nodes().collect();
    assert_eq!(nodes.len(), 3);
    for index in 0..3 {
        assert!(nodes.contains(&cluster.addr(index)));
    }
    assert_eq!(client.node_count(), 3);
    assert!(client.slot_map().is_fully_covered());
    assert_eq!(cluster.topology_queries(), 1);
}

#[test]
fn test_basic_operations_route_by_key() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    client.set("foo", "bar").expect("SET failed");
    assert_eq!(client.get("foo").unwrap(), Some(Bytes::from("bar")));
    assert_eq!(cluster.received(cluster.owner_of("foo")), 2);
    assert_eq!(
        client.key_to_node("foo").unwrap(),
        cluster.addr(cluster.owner_of("foo"))
    );

    assert!(client.exists("foo").unwrap());
    assert!(client.del("foo").unwrap());
    assert!(!client.exists("foo").unwrap());
    assert_eq!(client.get("foo").unwrap(), None);

    assert_eq!(client.incr("counter").unwrap(), 1);
    assert_eq!(client.incr("counter").unwrap(), 2);
    assert_eq!(cluster.value("counter"), Some(b"2".to_vec()));
}

#[test]
fn test_hash_tags_share_a_node() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    let name = client.key_to_node("{user1}.name").unwrap();
    let visits = client.key_to_node("{user1}.visits").unwrap();
    assert_eq!(name, visits);
}

#[test]
fn test_pipeline_replies_in_order() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    for i in 0..10 {
        client
            .append_command(&command::set(format!("key{i}"), i.to_string()))
            .unwrap();
    }
    for i in 0..10 {
        client.append_command(&command::get(format!("key{i}"))).unwrap();
    }
    assert_eq!(client.pending_replies(), 20);

    for _ in 0..10 {
        assert!(client.get_reply().unwrap().unwrap().is_ok());
    }
    for i in 0..10 {
        assert_eq!(
            client.get_reply().unwrap(),
            Some(Frame::bulk(i.to_string()))
        );
    }
    assert_eq!(client.get_reply().unwrap(), None);
    assert_eq!(client.pending_replies(), 0);
}

#[test]
fn test_direct_dispatch_leaves_node_iteration_alone() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);
    assert_eq!(client.nodes().count(), 3);

    let alias = NodeAddr::new("localhost", cluster.addr(0).port);
    let pong = client.command_to_node(&alias, &command::ping()).unwrap();
    assert_eq!(pong, Frame::SimpleString(b"PONG".to_vec()));

    let nodes: Vec<_> = client.nodes().collect();
    assert_eq!(nodes.len(), 3);
    assert!(!nodes.contains(&alias));
    for _ in 0..5 {
        client.command(&command::ping()).unwrap();
    }
    client.refresh().unwrap();
    assert_eq!(client.nodes().count(), 3);
    assert_eq!(client.node_count(), 3);
}

#[test]
fn test_keyless_commands_and_dbsize() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    let pong = client.command(&command::ping()).unwrap();
    assert_eq!(pong, Frame::SimpleString(b"PONG".to_vec()));

    for i in 0..30 {
        client.set(format!("k{i}"), "v").unwrap();
    }
    let nodes: Vec<_> = client.nodes().collect();
    let mut total = 0;
    for node in &nodes {
        total += client.dbsize(node).unwrap();
    }
    assert_eq!(total, 30);
}

#[test]
fn test_error_reply_returned_as_frame() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    let reply = client.command(&Cmd::new("NOPE").arg("key")).unwrap();
    assert!(reply.error_message().unwrap().starts_with("ERR unknown command"));

    client.set("text", "abc").unwrap();
    assert!(matches!(client.incr("text"), Err(Error::Server { .. })));
}

#[test]
fn test_cross_slot_rejected_before_io() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    let err = client
        .command(&command::mget(["foo", "bar"]))
        .unwrap_err();
    assert!(matches!(err, Error::CrossSlot));
    assert_eq!(
        (0..3).map(|i| cluster.received(i)).sum::<usize>(),
        0
    );
}

#[test]
fn test_transaction_results_in_order() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    let tx = Transaction::new()
        .add(command::set("{t}.a", "1"))
        .add(command::incr("{t}.n"))
        .add(command::incr("{t}.n"));
    let results = client.transaction(&tx).unwrap();
    assert_eq!(
        results,
        vec![
            Frame::SimpleString(b"OK".to_vec()),
            Frame::Integer(1),
            Frame::Integer(2)
        ]
    );
}

#[test]
fn test_transaction_keeps_runtime_errors_in_place() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);
    client.set("{t}.s", "text").unwrap();

    let tx = Transaction::new()
        .add(command::incr("{t}.s"))
        .add(command::incr("{t}.c"));
    let results = client.transaction(&tx).unwrap();
    assert!(results[0].error_message().is_some());
    assert_eq!(results[1], Frame::Integer(1));
}

#[test]
fn test_append_transaction_through_get_reply() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);

    let tx = Transaction::new()
        .add(command::set("{t}.x", "1"))
        .add(command::get("{t}.x"));
    client.append_transaction(&tx).unwrap();

    assert!(client.get_reply().unwrap().unwrap().is_ok());
    assert!(client.get_reply().unwrap().unwrap().is_queued());
    assert!(client.get_reply().unwrap().unwrap().is_queued());
    let exec = client.get_reply().unwrap().unwrap();
    assert_eq!(exec.as_array().map(|items| items.len()), Some(2));
    assert_eq!(client.get_reply().unwrap(), None);
}

#[test]
fn test_transaction_across_nodes_is_aborted() {
    let cluster = FakeCluster::start(3);
    let mut client = connect(&cluster);
    assert_ne!(cluster.owner_of("foo"), cluster.owner_of("bar"));

    let tx = Transaction::new()
        .add(command::set("foo", "1"))
        .add(command::set("bar", "2"));
    assert!(matches!(
        client.transaction(&tx),
        Err(Error::TransactionAborted { .. })
    ));
    assert_eq!(cluster.value("foo"), None);
}

#[test]
fn test_cluster_nodes_strategy() {
    let cluster = FakeCluster::start(3);
    let mut client = ClusterBuilder::new()
        .seeds(cluster.seeds())
        .route_strategy(RouteStrategy::Nodes)
        .connect()
        .unwrap();

    assert_eq!(client.nodes().count(), 3);
    assert!(client.slot_map().is_fully_covered());
    client.set("foo", "bar").unwrap();
    assert_eq!(client.get("foo").unwrap(), Some(Bytes::from("bar")));
}

#[test]
fn test_auth_on_every_connection() {
    let cluster = FakeCluster::with_password(3, "s3cret");
    let mut client = ClusterBuilder::new()
        .seeds(cluster.seeds())
        .password("s3cret")
        .connect()
        .unwrap();
    for i in 0..10 {
        client.set(format!("k{i}"), "v").unwrap();
    }

    let denied = ClusterBuilder::new()
        .seeds(cluster.seeds())
        .password("wrong")
        .connect();
    assert!(matches!(denied, Err(Error::ClusterUnavailable { .. })));
}

#[test]
fn test_connect_without_reachable_seed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = ClusterClient::connect(&format!("127.0.0.1:{port}")).unwrap_err();
    assert!(matches!(err, Error::ClusterUnavailable { .. }));
}
