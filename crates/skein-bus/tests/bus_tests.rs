// Integration tests for the in-process bus

use std::thread;
use std::time::Duration;

use skein_bus::{
    Broker, BusError, Node, Publisher, ServiceClient, ServiceServer, Socket, Subscriber,
};

fn ready_node(broker: &Broker, name: &str) -> Node {
    let mut node = Node::new(broker, name).expect("Failed to create node");
    node.init().expect("Failed to init node");
    node
}

#[test]
fn test_publish_reaches_every_subscriber() {
    let broker = Broker::new();
    let node = ready_node(&broker, "pubsub");

    let mut first = Subscriber::new(&node, "chatter");
    let mut second = Subscriber::new(&node, "chatter");
    let mut publisher = Publisher::new(&node, "chatter");
    first.init().unwrap();
    second.init().unwrap();
    publisher.init().unwrap();

    publisher.publish(b"one").unwrap();
    publisher.publish(b"two").unwrap();

    assert_eq!(first.drain().unwrap(), vec![b"one".to_vec(), b"two".to_vec()]);
    assert_eq!(second.drain().unwrap(), vec![b"one".to_vec(), b"two".to_vec()]);
    assert!(first.drain().unwrap().is_empty());
    assert_eq!(publisher.published(), 2);
}

#[test]
fn test_topics_close_once_their_sockets_are_gone() {
    let broker = Broker::new();
    let node = ready_node(&broker, "transient");

    for round in 0..3 {
        let topic = format!("scratch-{}", round);
        let mut publisher = Publisher::new(&node, topic.clone());
        let mut subscriber = Subscriber::new(&node, topic);
        publisher.init().unwrap();
        subscriber.init().unwrap();
        publisher.publish(b"once").unwrap();
        assert_eq!(subscriber.drain().unwrap(), vec![b"once".to_vec()]);

        subscriber.cleanup();
        drop(publisher);
        assert!(broker.topics().is_empty());
    }

    // A topic that lost its subscribers stays open for its publisher
    let mut publisher = Publisher::new(&node, "kept");
    publisher.init().unwrap();
    let mut early = Subscriber::new(&node, "kept");
    early.init().unwrap();
    drop(early);
    assert_eq!(broker.topics(), vec!["kept".to_string()]);

    let mut late = Subscriber::new(&node, "kept");
    late.init().unwrap();
    publisher.publish(b"still here").unwrap();
    assert_eq!(late.drain().unwrap(), vec![b"still here".to_vec()]);
}

#[test]
fn test_conflate_keeps_latest_message() {
    let broker = Broker::new();
    let node = ready_node(&broker, "conflate");

    let mut subscriber = Subscriber::new(&node, "pose");
    subscriber.options_mut().conflate = true;
    subscriber.init().unwrap();

    let mut publisher = Publisher::new(&node, "pose");
    publisher.init().unwrap();
    for i in 0..5u8 {
        publisher.publish(&[i]).unwrap();
    }

    assert_eq!(subscriber.drain().unwrap(), vec![vec![4u8]]);
}

#[test]
fn test_immediate_publisher_requires_a_subscriber() {
    let broker = Broker::new();
    let node = ready_node(&broker, "lonely");
    let mut publisher = Publisher::new(&node, "void");
    publisher.init().unwrap();

    // Without immediate the message is quietly dropped
    publisher.publish(b"ignored").unwrap();

    publisher.options_mut().immediate = true;
    assert!(matches!(publisher.publish(b"x"), Err(BusError::NoPeer(topic)) if topic == "void"));
}

#[test]
fn test_compressed_messages_are_transparent_to_subscribers() {
    let broker = Broker::new();
    let node = ready_node(&broker, "zip");
    let mut subscriber = Subscriber::new(&node, "blob");
    subscriber.init().unwrap();

    let mut publisher = Publisher::new(&node, "blob");
    publisher.set_compression("zlib", 6).unwrap();
    publisher.init().unwrap();

    let payload = vec![7u8; 2048];
    publisher.write(&payload).unwrap();
    assert_eq!(subscriber.read().unwrap(), payload);
}

#[test]
fn test_subscriber_read_times_out() {
    let broker = Broker::new();
    let node = ready_node(&broker, "quiet");
    let mut subscriber = Subscriber::new(&node, "silence");
    subscriber.options_mut().read_timeout_ms = 20;
    subscriber.init().unwrap();

    assert!(!subscriber.poll(Duration::from_millis(5)).unwrap());
    assert!(matches!(subscriber.read(), Err(BusError::Timeout(_))));
}

#[test]
fn test_call_is_answered_by_server_on_another_thread() {
    let broker = Broker::new();
    let server_broker = broker.clone();

    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let server = thread::spawn(move || {
        let node = ready_node(&server_broker, "server");
        let mut server = ServiceServer::new(&node, "upper");
        server.options_mut().read_timeout_ms = 2000;
        server.init().unwrap();
        ready_tx.send(()).unwrap();

        let request = server.read().unwrap();
        server.write(&request.to_ascii_uppercase()).unwrap();
    });

    ready_rx.recv().unwrap();
    let node = ready_node(&broker, "client");
    let mut client = ServiceClient::new(&node, "upper");
    client.options_mut().read_timeout_ms = 2000;
    client.init().unwrap();

    assert_eq!(client.call(b"hello").unwrap(), b"HELLO".to_vec());
    server.join().unwrap();
}

#[test]
fn test_drained_requests_are_answered_through_responders() {
    let broker = Broker::new();
    let node = ready_node(&broker, "both");
    let mut server = ServiceServer::new(&node, "echo");
    server.init().unwrap();

    let mut client = ServiceClient::new(&node, "echo");
    client.options_mut().read_timeout_ms = 500;
    client.init().unwrap();

    // Send without waiting, answer, then collect the reply
    client.write(b"ping").unwrap();
    let requests = server.drain().unwrap();
    assert_eq!(requests.len(), 1);
    for request in requests {
        assert_eq!(request.payload, b"ping".to_vec());
        request.responder.respond(b"pong").unwrap();
    }
    assert!(client.poll(Duration::from_millis(100)).unwrap());
    assert_eq!(client.read().unwrap(), b"pong".to_vec());
}

#[test]
fn test_call_without_server() {
    let broker = Broker::new();
    let node = ready_node(&broker, "client");
    let mut client = ServiceClient::new(&node, "missing");
    client.options_mut().immediate = true;
    client.init().unwrap();
    assert!(matches!(client.call(b"x"), Err(BusError::NoService(name)) if name == "missing"));

    client.options_mut().immediate = false;
    client.options_mut().write_timeout_ms = 30;
    assert!(matches!(client.call(b"x"), Err(BusError::NoService(_))));
}

#[test]
fn test_unanswered_call_times_out_and_dropped_request_reports_no_reply() {
    let broker = Broker::new();
    let node = ready_node(&broker, "slow");
    let mut server = ServiceServer::new(&node, "sleepy");
    server.init().unwrap();

    let mut client = ServiceClient::new(&node, "sleepy");
    client.options_mut().read_timeout_ms = 30;
    client.init().unwrap();
    assert!(matches!(client.call(b"anyone?"), Err(BusError::Timeout(_))));

    client.write(b"again").unwrap();
    server.cleanup();
    assert!(matches!(client.read(), Err(BusError::NoReply(name)) if name == "sleepy"));
}

#[test]
fn test_second_server_for_same_service_is_rejected() {
    let broker = Broker::new();
    let node = ready_node(&broker, "dup");
    let mut first = ServiceServer::new(&node, "svc");
    let mut second = ServiceServer::new(&node, "svc");
    first.init().unwrap();
    assert!(matches!(second.init(), Err(BusError::ServiceTaken(_))));

    drop(first);
    second.init().unwrap();
    assert_eq!(broker.services(), vec!["svc".to_string()]);
}

#[test]
fn test_raw_operations_unsupported_by_kind() {
    let broker = Broker::new();
    let node = ready_node(&broker, "raw");
    let mut publisher = Publisher::new(&node, "t");
    publisher.init().unwrap();
    assert!(matches!(publisher.read(), Err(BusError::Unsupported { op: "read", .. })));

    let mut subscriber = Subscriber::new(&node, "t");
    subscriber.init().unwrap();
    assert!(matches!(subscriber.write(b"x"), Err(BusError::Unsupported { op: "write", .. })));

    let mut server = ServiceServer::new(&node, "s");
    server.init().unwrap();
    assert!(matches!(server.write(b"x"), Err(BusError::NoRequestPending(_))));
}
