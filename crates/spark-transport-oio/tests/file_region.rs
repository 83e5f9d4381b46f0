//! 文件区域写出：零拷贝完整传输、源提前耗尽与未建连。

mod support;

use std::{
    fs::File,
    io::{self, Read, Write},
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use spark_channel::{EventExecutor, ErrorKind};
use spark_transport_oio::{DefaultFileRegion, FileRegion, OioSocketChannel, Transfer, TransferTarget};
use support::{WAIT, connected_channel, event_loop, fast_config, listener};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn file_with(content: &[u8]) -> File {
    let mut file = tempfile::tempfile().expect("tempfile");
    file.write_all(content).expect("fill tempfile");
    file
}

/// 在独立线程上读空对端，直到通道关闭连接。
fn drain(mut peer: TcpStream) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        peer.set_read_timeout(Some(WAIT)).expect("peer timeout");
        let mut received = Vec::new();
        peer.read_to_end(&mut received).expect("peer drain");
        received
    })
}

/// 统计释放次数的区域包装。
struct CountingRegion {
    inner: DefaultFileRegion,
    releases: Arc<AtomicUsize>,
}

impl FileRegion for CountingRegion {
    fn count(&self) -> u64 {
        self.inner.count()
    }

    fn transferred(&self) -> u64 {
        self.inner.transferred()
    }

    fn transfer_to(
        &mut self,
        target: &mut dyn TransferTarget,
        position: u64,
    ) -> io::Result<Transfer> {
        self.inner.transfer_to(target, position)
    }

    fn release(&mut self) -> io::Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release()
    }
}

#[test]
fn whole_file_reaches_the_peer() {
    let event_loop = event_loop("region-full");
    let (listener, remote) = listener();
    let channel = connected_channel(&event_loop, remote, fast_config());
    let (peer, _) = listener.accept().expect("accept");
    let reader = drain(peer);

    let content = pattern(3 * 1024 * 1024 + 17);
    let region = DefaultFileRegion::new(file_with(&content), 0, content.len() as u64);
    let outcome = channel
        .write_file_region(Box::new(region))
        .wait_timeout(WAIT)
        .expect("transfer finished");
    assert!(outcome.is_ok(), "transfer failed: {outcome:?}");

    assert!(matches!(channel.close().wait_timeout(WAIT), Some(Ok(()))));
    let received = reader.join().expect("drain thread");
    assert_eq!(received.len(), content.len());
    assert!(received == content, "payload must arrive intact");
    event_loop.shutdown_and_join().expect("join");
}

#[test]
fn region_window_honours_offset() {
    let event_loop = event_loop("region-window");
    let (listener, remote) = listener();
    let channel = connected_channel(&event_loop, remote, fast_config());
    let (peer, _) = listener.accept().expect("accept");
    let reader = drain(peer);

    let content = pattern(4096);
    let region = DefaultFileRegion::new(file_with(&content), 100, 1000);
    assert_eq!(region.offset(), 100);
    assert!(matches!(
        channel.write_file_region(Box::new(region)).wait_timeout(WAIT),
        Some(Ok(()))
    ));

    assert!(matches!(channel.close().wait_timeout(WAIT), Some(Ok(()))));
    assert_eq!(reader.join().expect("drain thread"), content[100..1100].to_vec());
    event_loop.shutdown_and_join().expect("join");
}

#[test]
fn truncated_file_fails_short_source_and_releases_once() {
    let event_loop = event_loop("region-short");
    let (listener, remote) = listener();
    let channel = connected_channel(&event_loop, remote, fast_config());
    let (peer, _) = listener.accept().expect("accept");
    let reader = drain(peer);

    let content = pattern(1_000_000);
    let releases = Arc::new(AtomicUsize::new(0));
    let region = CountingRegion {
        inner: DefaultFileRegion::new(file_with(&content), 0, 1_048_576),
        releases: Arc::clone(&releases),
    };
    let outcome = channel
        .write_file_region(Box::new(region))
        .wait_timeout(WAIT)
        .expect("transfer finished");
    let err = outcome.expect_err("source is shorter than declared");
    assert_eq!(err.kind(), ErrorKind::ShortSource);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(channel.is_active(), "a short source does not close the channel");

    assert!(matches!(channel.close().wait_timeout(WAIT), Some(Ok(()))));
    assert_eq!(reader.join().expect("drain thread").len(), content.len());
    event_loop.shutdown_and_join().expect("join");
}

#[test]
fn unconnected_channel_rejects_regions_without_transferring() {
    let event_loop = event_loop("region-unconnected");
    let executor: Arc<dyn EventExecutor> = event_loop.clone();
    let channel = OioSocketChannel::new(executor, fast_config()).expect("channel");

    let content = pattern(64);
    let releases = Arc::new(AtomicUsize::new(0));
    let region = CountingRegion {
        inner: DefaultFileRegion::new(file_with(&content), 0, content.len() as u64),
        releases: Arc::clone(&releases),
    };
    let outcome = channel
        .write_file_region(Box::new(region))
        .wait_timeout(WAIT)
        .expect("transfer finished");
    assert_eq!(outcome.expect_err("not connected").kind(), ErrorKind::NotConnected);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    event_loop.shutdown_and_join().expect("join");
}
