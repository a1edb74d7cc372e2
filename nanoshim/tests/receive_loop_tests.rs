//! Receive loops running side by side

use nanoshim::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Pair {
    server: Socket,
    client: Socket,
}

fn pairs(fabric: &Arc<InprocFabric>, prefix: &str, n: usize) -> Vec<Pair> {
    let transport: Arc<dyn Transport> = fabric.clone();
    (0..n)
        .map(|i| {
            let endpoint = format!("inproc://{prefix}-{i}");
            let server = fabric.socket(SocketOptions::default()).unwrap();
            let client = fabric.socket(SocketOptions::default()).unwrap();
            fabric.bind(server, &endpoint).unwrap();
            fabric.connect(client, &endpoint).unwrap();
            Pair {
                server: Socket::bind(Arc::clone(&transport), server).unwrap(),
                client: Socket::bind(Arc::clone(&transport), client).unwrap(),
            }
        })
        .collect()
}

#[test]
fn test_each_loop_gets_exactly_its_message() {
    nanoshim::dev_tracing::init_tracing();
    const LOOPS: usize = 8;
    let fabric = Arc::new(InprocFabric::default());
    let pairs = pairs(&fabric, "fan", LOOPS);

    // Every loop feeds one shared queue, tagging events with its socket.
    let (tx, rx) = flume::unbounded();
    let mut handles: Vec<_> = pairs
        .iter()
        .map(|pair| {
            let tx = tx.clone();
            let id = pair.server.id();
            ReceiveLoop::start(
                pair.server.clone(),
                callback(move |event| tx.send((id, event)).is_ok()),
            )
            .unwrap()
        })
        .collect();
    drop(tx);

    for (i, pair) in pairs.iter().enumerate() {
        pair.client
            .send(MessageBuffer::from(format!("msg-{i}").into_bytes()), Flags::NONE)
            .unwrap();
    }

    let mut seen = HashMap::new();
    for _ in 0..LOOPS {
        let (id, event) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let ReceiveEvent::Message(msg) = event else {
            panic!("loop on {id} failed");
        };
        assert!(seen.insert(id, msg.into_bytes()).is_none(), "{id} delivered twice");
    }
    for (i, pair) in pairs.iter().enumerate() {
        assert_eq!(seen[&pair.server.id()], format!("msg-{i}").into_bytes());
    }

    for handle in &mut handles {
        handle.stop().unwrap();
    }
    assert!(rx.try_recv().is_err());
    assert!(pairs.iter().all(|pair| pair.server.state() == SocketState::Closed));
}

#[test]
fn test_per_socket_order_with_concurrent_producers() {
    const LOOPS: usize = 4;
    const PER_LOOP: u32 = 100;
    let fabric = Arc::new(InprocFabric::default());
    let pairs = pairs(&fabric, "ordered", LOOPS);

    let mut loops: Vec<_> = pairs
        .iter()
        .map(|pair| ReceiveLoop::unbounded(pair.server.clone()).unwrap())
        .collect();

    let producers: Vec<_> = pairs
        .iter()
        .map(|pair| {
            let client = pair.client.clone();
            thread::spawn(move || {
                for seq in 0..PER_LOOP {
                    client
                        .send(MessageBuffer::from(seq.to_be_bytes().to_vec()), Flags::NONE)
                        .unwrap();
                }
            })
        })
        .collect();

    for (_, events) in &loops {
        for expected in 0..PER_LOOP {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                ReceiveEvent::Message(msg) => {
                    assert_eq!(msg.as_slice(), &expected.to_be_bytes()[..]);
                }
                ReceiveEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
    }
    for producer in producers {
        producer.join().unwrap();
    }
    for (handle, _) in &mut loops {
        handle.stop().unwrap();
    }
}

#[test]
fn test_stop_idle_loops_does_not_hang() {
    let fabric = Arc::new(InprocFabric::default());
    let pairs = pairs(&fabric, "idle", 4);
    let mut loops: Vec<_> = pairs
        .iter()
        .map(|pair| ReceiveLoop::unbounded(pair.server.clone()).unwrap())
        .collect();

    for (handle, events) in &mut loops {
        handle.stop().unwrap();
        assert_eq!(handle.state(), LoopState::Stopped);
        assert!(events.try_recv().is_err());
        assert!(matches!(handle.stop(), Err(NanoshimError::AlreadyStopped)));
    }
}

#[test]
fn test_dropping_handle_stops_loop() {
    let fabric = Arc::new(InprocFabric::default());
    let pair = pairs(&fabric, "dropped", 1).pop().unwrap();

    let (handle, events) = ReceiveLoop::unbounded(pair.server.clone()).unwrap();
    drop(handle);

    assert_eq!(pair.server.state(), SocketState::Closed);
    assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    assert!(!fabric.is_live(pair.server.id()));
}
