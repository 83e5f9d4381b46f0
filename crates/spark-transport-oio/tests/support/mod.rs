//! 集成测试共用的事件循环与套接字夹具。
#![allow(dead_code)]

use std::{
    net::{SocketAddr, TcpListener},
    sync::{Arc, mpsc},
    time::Duration,
};

use spark_channel::{EventExecutor, OioChannelConfig, SingleThreadEventLoop};
use spark_transport_oio::OioSocketChannel;

/// 所有跨线程等待的上限，避免失败用例把测试进程挂死。
pub const WAIT: Duration = Duration::from_secs(5);

pub fn event_loop(name: &str) -> Arc<SingleThreadEventLoop> {
    SingleThreadEventLoop::spawn(name).expect("spawn event loop")
}

/// 在事件循环线程上执行 `f` 并把结果带回测试线程。
pub fn on_loop<T, F>(event_loop: &SingleThreadEventLoop, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    event_loop
        .execute(Box::new(move || {
            let _ = tx.send(f());
        }))
        .expect("event loop accepts task");
    rx.recv_timeout(WAIT).expect("event loop task finished")
}

pub fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    (listener, addr)
}

/// 刚刚释放、没有任何进程监听的本地地址。
pub fn refused_addr() -> SocketAddr {
    let (listener, addr) = listener();
    drop(listener);
    addr
}

pub fn fast_config() -> OioChannelConfig {
    OioChannelConfig::new()
        .with_connect_timeout(Duration::from_millis(500))
        .with_so_timeout(Duration::from_millis(50))
}

/// 创建通道并建连到 `remote`，等待建连完成。
pub fn connected_channel(
    event_loop: &Arc<SingleThreadEventLoop>,
    remote: SocketAddr,
    config: OioChannelConfig,
) -> OioSocketChannel {
    let executor: Arc<dyn EventExecutor> = event_loop.clone();
    let channel = OioSocketChannel::new(executor, config).expect("channel");
    let outcome = channel.connect(remote).wait_timeout(WAIT).expect("connect finished");
    assert!(outcome.is_ok(), "connect failed: {outcome:?}");
    channel
}
