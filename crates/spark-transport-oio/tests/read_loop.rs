//! 协作式读取循环：数据交付、流结束处理、跨线程关闭与同一循环上的多通道公平性。

mod support;

use std::{
    io::{Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use spark_channel::OioChannelConfig;
use spark_transport_oio::{ByteInbound, OioReadLoop, OioSocketChannel, ReadOutcome};
use support::{WAIT, connected_channel, event_loop, fast_config, listener, on_loop};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Data(Vec<u8>),
    InputShutdown,
    Inactive,
}

/// 把回调转成事件流送回测试线程。
struct Recorder(Sender<Event>);

impl ByteInbound for Recorder {
    fn on_read(&mut self, _channel: &OioSocketChannel, data: &mut BytesMut) {
        let _ = self.0.send(Event::Data(data.split().to_vec()));
    }

    fn on_input_shutdown(&mut self, _channel: &OioSocketChannel) {
        let _ = self.0.send(Event::InputShutdown);
    }

    fn on_inactive(&mut self, _channel: &OioSocketChannel) {
        let _ = self.0.send(Event::Inactive);
    }
}

/// 收集数据直到出现终止事件。
fn collect_until_terminal(events: &mpsc::Receiver<Event>) -> (Vec<u8>, Event) {
    let mut data = Vec::new();
    loop {
        match events.recv_timeout(WAIT).expect("read loop event") {
            Event::Data(chunk) => data.extend_from_slice(&chunk),
            terminal => return (data, terminal),
        }
    }
}

#[test]
fn delivers_data_then_closes_on_end_of_stream() {
    let event_loop = event_loop("read-loop-close");
    let (listener, remote) = listener();
    let channel = connected_channel(&event_loop, remote, fast_config());
    let (mut peer, _) = listener.accept().expect("accept");

    let (tx, rx) = mpsc::channel();
    OioReadLoop::start(channel.clone(), Recorder(tx)).expect("start read loop");

    peer.write_all(b"ping-").expect("peer write");
    peer.write_all(b"pong").expect("peer write");
    drop(peer);

    let (data, terminal) = collect_until_terminal(&rx);
    assert_eq!(data, b"ping-pong");
    assert_eq!(terminal, Event::Inactive);
    assert!(channel.close_future().wait_timeout(WAIT).is_some());
    assert!(!channel.is_open());
    event_loop.shutdown_and_join().expect("join");
}

#[test]
fn half_closure_keeps_channel_writable() {
    let event_loop = event_loop("read-loop-half");
    let (listener, remote) = listener();
    let config = fast_config().with_allow_half_closure(true);
    let channel = connected_channel(&event_loop, remote, config);
    let (mut peer, _) = listener.accept().expect("accept");

    let (tx, rx) = mpsc::channel();
    OioReadLoop::start(channel.clone(), Recorder(tx)).expect("start read loop");

    peer.write_all(b"request").expect("peer write");
    peer.shutdown(std::net::Shutdown::Write).expect("peer half close");

    let (data, terminal) = collect_until_terminal(&rx);
    assert_eq!(data, b"request");
    assert_eq!(terminal, Event::InputShutdown);
    assert!(channel.is_open());
    assert!(channel.is_input_shutdown());
    assert!(!channel.is_output_shutdown());

    let reply = channel.write_bytes(Bytes::from_static(b"response"));
    assert!(matches!(reply.wait_timeout(WAIT), Some(Ok(()))));
    let mut received = [0u8; 8];
    peer.set_read_timeout(Some(WAIT)).expect("peer timeout");
    peer.read_exact(&mut received).expect("peer read");
    assert_eq!(&received, b"response");

    assert!(matches!(channel.close().wait_timeout(WAIT), Some(Ok(()))));
    assert_eq!(rx.recv_timeout(WAIT).expect("inactive after close"), Event::Inactive);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    event_loop.shutdown_and_join().expect("join");
}

#[test]
fn foreign_close_during_streaming_ends_delivery() {
    let event_loop = event_loop("read-loop-foreign-close");
    let (listener, remote) = listener();
    let channel = connected_channel(&event_loop, remote, fast_config());
    let (mut peer, _) = listener.accept().expect("accept");

    let (tx, rx) = mpsc::channel();
    OioReadLoop::start(channel.clone(), Recorder(tx)).expect("start read loop");

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) && peer.write_all(b"tick").is_ok() {
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    match rx.recv_timeout(WAIT).expect("streaming started") {
        Event::Data(chunk) => assert!(!chunk.is_empty()),
        other => panic!("unexpected event {other:?}"),
    }
    let closer = channel.clone();
    let closed = thread::spawn(move || closer.close().wait_timeout(WAIT))
        .join()
        .expect("closer thread");
    assert!(matches!(closed, Some(Ok(()))));

    let (_, terminal) = collect_until_terminal(&rx);
    assert_eq!(terminal, Event::Inactive);
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "no data may follow the inactive event"
    );

    let reader = channel.clone();
    let outcome = on_loop(&event_loop, move || reader.read_step(&mut BytesMut::new()));
    assert_eq!(outcome, ReadOutcome::EndOfStream);

    stop.store(true, Ordering::Release);
    writer.join().expect("writer thread");
    event_loop.shutdown_and_join().expect("join");
}

#[test]
fn idle_sibling_does_not_starve_busy_channel() {
    let event_loop = event_loop("read-loop-fair");
    let (listener, remote) = listener();
    let config = OioChannelConfig::new()
        .with_connect_timeout(Duration::from_millis(500))
        .with_so_timeout(Duration::from_millis(20));

    let idle = connected_channel(&event_loop, remote, config.clone());
    let (_idle_peer, _) = listener.accept().expect("accept idle");
    let busy = connected_channel(&event_loop, remote, config);
    let (mut busy_peer, _) = listener.accept().expect("accept busy");

    let (idle_tx, idle_rx) = mpsc::channel();
    let (busy_tx, busy_rx) = mpsc::channel();
    OioReadLoop::start(idle.clone(), Recorder(idle_tx)).expect("start idle loop");
    OioReadLoop::start(busy.clone(), Recorder(busy_tx)).expect("start busy loop");

    for round in 0..5u8 {
        busy_peer.write_all(&[round; 3]).expect("peer write");
        match busy_rx.recv_timeout(WAIT).expect("busy channel progresses") {
            Event::Data(chunk) => assert_eq!(chunk, vec![round; 3]),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(idle_rx.try_recv().is_err(), "idle channel produced no events");

    let _ = idle.close().wait_timeout(WAIT);
    let _ = busy.close().wait_timeout(WAIT);
    event_loop.shutdown_and_join().expect("join");
}
