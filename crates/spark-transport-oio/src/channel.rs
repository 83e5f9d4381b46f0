use std::{
    fmt, io,
    net::{SocketAddr, TcpStream},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use spark_channel::{
    ChannelId, ChannelPromise, CoreError, EventExecutor, OioChannelConfig, Result,
    affinity::run_in_event_loop,
};
use tracing::{debug, trace, warn};

use crate::{
    error::{
        ACQUIRE_STREAMS, BIND, CLEANUP, CLOSE, CONFIGURE, CONNECT, SHUTDOWN_OUTPUT, TRANSFER,
        WRITE, already_connected, closed, map_io_error, not_connected,
    },
    file_region::{FileRegion, release_region, transfer_region},
    socket::{SocketHandle, probe_available},
    state::{ChannelState, StateCell},
    stream::{BlockingStream, ReadOutcome},
};

/// 套接字句柄与流视图；只有所属事件循环线程会加锁。
struct SocketCore {
    socket: SocketHandle,
    stream: BlockingStream<TcpStream, TcpStream>,
}

#[derive(Default)]
struct Addresses {
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

struct ChannelInner {
    id: ChannelId,
    parent: Option<ChannelId>,
    event_loop: Arc<dyn EventExecutor>,
    config: OioChannelConfig,
    state: StateCell,
    input_shutdown: AtomicBool,
    addresses: Mutex<Addresses>,
    core: Mutex<SocketCore>,
    close_future: ChannelPromise,
}

/// 不延长通道生命周期的弱引用，供挂在通道自身句柄上的监听器使用。
pub(crate) struct WeakChannel(Weak<ChannelInner>);

impl WeakChannel {
    pub(crate) fn upgrade(&self) -> Option<OioSocketChannel> {
        self.0.upgrade().map(|inner| OioSocketChannel { inner })
    }
}

/// 以阻塞套接字实现的通道。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 在没有就绪通知的前提下，让一个事件循环线程协作式地服务多条阻塞连接：
///   每次读取都以 `so_timeout` 为界，超时即让出线程；
/// - 所有修改状态的入口（bind/connect/close/shutdown_output/write）都经由
///   [`run_in_event_loop`] 派发，跨线程调用立即返回尚未完成的 [`ChannelPromise`]。
///
/// ## 逻辑 (How)
/// - 生命周期状态保存在原子单元中，谓词可从任意线程读取；
/// - 套接字与输入/输出流视图放在 `Mutex<SocketCore>` 中，锁只在循环线程上获取，
///   并且总在完成句柄、触发监听器之前释放；
/// - 建连遵循“获取或回滚”：绑定、建连、流视图获取任一步失败都会关闭套接字，
///   清理时的次生错误只记录日志，调用方看到的是原始错误。
///
/// ## 契约 (What)
/// - `is_open`：未关闭；`is_active`：已建连且未关闭；
/// - `is_output_shutdown`：写方向已半关闭，或通道不处于活跃状态；
/// - `is_input_shutdown`：读到流结束并进入半关闭，或通道已关闭；未建连的通道读方向并未关闭；
/// - `close` 幂等，[`close_future`](Self::close_future) 在首次关闭时成功完成。
///
/// ## 注意事项 (Trade-offs)
/// - 写出是同步阻塞的，写满对端窗口时会占住事件循环，直到对端读取。
#[derive(Clone)]
pub struct OioSocketChannel {
    inner: Arc<ChannelInner>,
}

impl OioSocketChannel {
    /// 创建未建连的通道。底层套接字延迟到首次 bind/connect 时创建。
    pub fn new(event_loop: Arc<dyn EventExecutor>, config: OioChannelConfig) -> Result<Self> {
        config.validate()?;
        let core = SocketCore {
            socket: SocketHandle::unconnected(config.so_timeout()),
            stream: BlockingStream::detached(),
        };
        let channel = Self::assemble(None, event_loop, config, ChannelState::Created, core);
        debug!(channel = %channel.id(), "channel created");
        Ok(channel)
    }

    /// 包装一条已建连的连接（例如由监听器接受），通道直接处于活跃状态。
    ///
    /// 应用读超时或获取流视图失败时，连接被关闭并返回 SetupFailure。
    pub fn from_accepted(
        parent: Option<ChannelId>,
        stream: TcpStream,
        event_loop: Arc<dyn EventExecutor>,
        config: OioChannelConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut socket = SocketHandle::from_connected(stream, config.so_timeout())
            .map_err(|err| map_io_error(CONFIGURE, err))?;
        let (input, output) = match socket.acquire_streams() {
            Ok(streams) => streams,
            Err(err) => {
                let err = map_io_error(ACQUIRE_STREAMS, err);
                if let Err(cleanup) = socket.close() {
                    log_cleanup_failure(None, cleanup);
                }
                return Err(err);
            }
        };
        let addresses = Addresses {
            local: socket.local_addr().ok(),
            remote: socket.peer_addr().ok(),
        };
        let mut stream = BlockingStream::detached();
        stream.attach(input, output);

        let channel = Self::assemble(
            parent,
            event_loop,
            config,
            ChannelState::Active,
            SocketCore { socket, stream },
        );
        *channel.inner.addresses.lock() = addresses;
        debug!(
            channel = %channel.id(),
            parent = ?parent,
            remote = ?channel.remote_address(),
            "accepted connection wrapped"
        );
        Ok(channel)
    }

    fn assemble(
        parent: Option<ChannelId>,
        event_loop: Arc<dyn EventExecutor>,
        config: OioChannelConfig,
        state: ChannelState,
        core: SocketCore,
    ) -> Self {
        let close_future = ChannelPromise::with_executor(Arc::clone(&event_loop));
        Self {
            inner: Arc::new(ChannelInner {
                id: ChannelId::next(),
                parent,
                event_loop,
                config,
                state: StateCell::new(state),
                input_shutdown: AtomicBool::new(false),
                addresses: Mutex::new(Addresses::default()),
                core: Mutex::new(core),
                close_future,
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// 接受本连接的父通道。
    pub fn parent(&self) -> Option<ChannelId> {
        self.inner.parent
    }

    pub fn config(&self) -> &OioChannelConfig {
        &self.inner.config
    }

    /// 所属事件循环。
    pub fn event_loop(&self) -> &Arc<dyn EventExecutor> {
        &self.inner.event_loop
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state.load()
    }

    /// 创建绑定到所属事件循环的完成句柄。
    pub fn new_promise(&self) -> ChannelPromise {
        ChannelPromise::with_executor(Arc::clone(&self.inner.event_loop))
    }

    /// 通道首次关闭时成功完成的句柄。
    pub fn close_future(&self) -> ChannelPromise {
        self.inner.close_future.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state() != ChannelState::Closed
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_output_shutdown(&self) -> bool {
        self.state() == ChannelState::OutputShutdown || !self.is_active()
    }

    pub fn is_input_shutdown(&self) -> bool {
        self.inner.input_shutdown.load(Ordering::Acquire) || !self.is_open()
    }

    /// 本地地址；仅在成功绑定或建连后可用。
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.addresses.lock().local
    }

    /// 对端地址；仅在成功建连后可用。
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.addresses.lock().remote
    }

    /// 绑定本地地址。失败时状态不变，可以换一个地址重试。
    pub fn bind(&self, local: SocketAddr) -> ChannelPromise {
        self.bind_with(local, self.new_promise())
    }

    pub fn bind_with(&self, local: SocketAddr, promise: ChannelPromise) -> ChannelPromise {
        let channel = self.clone();
        run_in_event_loop(&self.inner.event_loop, promise, move |promise| {
            promise.complete_with(channel.bind_now(local));
        })
    }

    /// 建连到 `remote`。
    pub fn connect(&self, remote: SocketAddr) -> ChannelPromise {
        self.connect_with(remote, None, self.new_promise())
    }

    /// 先绑定 `local`（若给出）再建连到 `remote`；任一步失败都会关闭通道。
    pub fn connect_with(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> ChannelPromise {
        let channel = self.clone();
        run_in_event_loop(&self.inner.event_loop, promise, move |promise| {
            promise.complete_with(channel.connect_now(remote, local));
        })
    }

    /// 断开连接；对流式套接字等价于 [`close`](Self::close)。
    pub fn disconnect(&self) -> ChannelPromise {
        self.close()
    }

    pub fn close(&self) -> ChannelPromise {
        self.close_with(self.new_promise())
    }

    /// 关闭通道；已关闭时直接成功。
    pub fn close_with(&self, promise: ChannelPromise) -> ChannelPromise {
        let channel = self.clone();
        run_in_event_loop(&self.inner.event_loop, promise, move |promise| {
            promise.complete_with(channel.close_now(false));
        })
    }

    pub fn shutdown_output(&self) -> ChannelPromise {
        self.shutdown_output_with(self.new_promise())
    }

    /// 半关闭写方向，对端随后读到流结束；读方向不受影响。
    pub fn shutdown_output_with(&self, promise: ChannelPromise) -> ChannelPromise {
        let channel = self.clone();
        run_in_event_loop(&self.inner.event_loop, promise, move |promise| {
            promise.complete_with(channel.shutdown_output_now());
        })
    }

    /// 同步写出整段字节并刷新。
    pub fn write_bytes(&self, data: Bytes) -> ChannelPromise {
        let channel = self.clone();
        run_in_event_loop(&self.inner.event_loop, self.new_promise(), move |promise| {
            promise.complete_with(channel.write_now(data));
        })
    }

    /// 写出文件区域；跨线程调用会被派发到所属事件循环。
    pub fn write_file_region(&self, region: Box<dyn FileRegion>) -> ChannelPromise {
        let channel = self.clone();
        run_in_event_loop(&self.inner.event_loop, self.new_promise(), move |promise| {
            channel.flush_file_region(region, promise);
        })
    }

    /// 在所属事件循环上把整个文件区域写入输出流，并以结果完成 `promise`。
    ///
    /// # 契约说明（What）
    /// - 没有输出流视图时立即以 NotConnected 失败，不发生任何部分传输；
    /// - 源提前耗尽时以 ShortSource 失败；
    /// - 区域在任何结果下都恰好释放一次。
    pub fn flush_file_region(&self, mut region: Box<dyn FileRegion>, promise: ChannelPromise) {
        debug_assert!(
            self.inner.event_loop.in_event_loop(),
            "file regions must be flushed on the owning event loop"
        );
        let outcome = {
            let mut core = self.inner.core.lock();
            match core.stream.output_mut() {
                Some(output) => transfer_region(region.as_mut(), output).map(|written| {
                    trace!(channel = %self.inner.id, written, "file region flushed");
                }),
                None => {
                    release_region(region.as_mut());
                    Err(not_connected(TRANSFER))
                }
            }
        };
        if let Err(err) = &outcome {
            debug!(channel = %self.inner.id, error = %err, "file region flush failed");
        }
        promise.complete_with(outcome);
    }

    /// 在所属事件循环上执行一次有界阻塞读，数据追加到 `buf` 尾部。
    ///
    /// 读取上限为 `buf` 的剩余容量；没有剩余容量时先预留 `read_buffer_size`。
    /// 通道关闭后恒返回 [`ReadOutcome::EndOfStream`]。
    pub fn read_step(&self, buf: &mut BytesMut) -> ReadOutcome {
        debug_assert!(
            self.inner.event_loop.in_event_loop(),
            "reads must run on the owning event loop"
        );
        if !self.is_open() {
            return ReadOutcome::EndOfStream;
        }
        if buf.capacity() == buf.len() {
            buf.reserve(self.inner.config.read_buffer_size());
        }
        let max = buf.capacity() - buf.len();
        let outcome = self.inner.core.lock().stream.read_step(buf, max);
        trace!(channel = %self.inner.id, ?outcome, "read step");
        outcome
    }

    /// 不阻塞、不消费地估计可立即读取的字节数；任何错误报告为 0。
    pub fn available(&self) -> usize {
        let core = self.inner.core.lock();
        core.stream.input_ref().map_or(0, probe_available)
    }

    pub(crate) fn downgrade(&self) -> WeakChannel {
        WeakChannel(Arc::downgrade(&self.inner))
    }

    /// 读到流结束后进入半关闭。
    pub(crate) fn mark_input_shutdown(&self) {
        if !self.inner.input_shutdown.swap(true, Ordering::AcqRel) {
            debug!(channel = %self.inner.id, "input shut down, channel stays open");
        }
    }

    fn bind_now(&self, local: SocketAddr) -> Result<()> {
        match self.state() {
            ChannelState::Created => {}
            ChannelState::Closed => return Err(closed(BIND)),
            _ => return Err(already_connected(BIND)),
        }
        let bound = {
            let mut core = self.inner.core.lock();
            core.socket
                .bind(local)
                .map_err(|err| map_io_error(BIND, err))?;
            core.socket.local_addr().ok()
        };
        self.inner.addresses.lock().local = bound;
        self.advance(ChannelState::Bound);
        debug!(channel = %self.inner.id, local = ?bound, "channel bound");
        Ok(())
    }

    fn connect_now(&self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<()> {
        match self.state() {
            ChannelState::Created | ChannelState::Bound => {}
            ChannelState::Closed => return Err(closed(CONNECT)),
            ChannelState::Active | ChannelState::OutputShutdown => {
                return Err(already_connected(CONNECT));
            }
        }
        let timeout = self.inner.config.connect_timeout();
        let established = {
            let mut core = self.inner.core.lock();
            establish(&mut core, remote, local, timeout)
                .map(|()| (core.socket.local_addr().ok(), core.socket.peer_addr().ok()))
        };
        let (bound, peer) = match established {
            Ok(addresses) => addresses,
            Err(err) => {
                debug!(
                    channel = %self.inner.id,
                    %remote,
                    error = %err,
                    "connect failed, rolling back"
                );
                // 回滚时的清理错误已在 close_now 内部记录。
                let _ = self.close_now(true);
                return Err(err);
            }
        };
        {
            let mut addresses = self.inner.addresses.lock();
            addresses.local = bound;
            addresses.remote = peer.or(Some(remote));
        }
        self.advance(ChannelState::Active);
        debug!(channel = %self.inner.id, %remote, local = ?bound, "channel connected");
        Ok(())
    }

    fn shutdown_output_now(&self) -> Result<()> {
        match self.state() {
            ChannelState::Active => {}
            ChannelState::OutputShutdown => return Ok(()),
            ChannelState::Closed => return Err(closed(SHUTDOWN_OUTPUT)),
            ChannelState::Created | ChannelState::Bound => {
                return Err(not_connected(SHUTDOWN_OUTPUT));
            }
        }
        self.inner
            .core
            .lock()
            .socket
            .shutdown_output()
            .map_err(|err| map_io_error(SHUTDOWN_OUTPUT, err))?;
        self.advance(ChannelState::OutputShutdown);
        debug!(channel = %self.inner.id, "output shut down");
        Ok(())
    }

    fn write_now(&self, mut data: Bytes) -> Result<()> {
        let mut core = self.inner.core.lock();
        if !core.stream.has_output() {
            return Err(not_connected(WRITE));
        }
        let written = core
            .stream
            .write_from(&mut data)
            .map_err(|err| map_io_error(WRITE, err))?;
        trace!(channel = %self.inner.id, written, "bytes written");
        Ok(())
    }

    /// 释放流视图与套接字并进入 Closed。
    ///
    /// `rollback` 为真时清理错误只记录日志；否则作为关闭结果返回。
    /// 关闭通知在释放锁之后发出，监听器可以安全地再次调用通道。
    fn close_now(&self, rollback: bool) -> Result<()> {
        let released = {
            let mut core = self.inner.core.lock();
            let (input, output) = core.stream.detach();
            drop(input);
            drop(output);
            core.socket.close()
        };
        let first_close = self.inner.state.transition(ChannelState::Closed).is_ok();
        if first_close {
            debug!(channel = %self.inner.id, rollback, "channel closed");
        }
        let outcome = match released {
            Ok(_) => Ok(()),
            Err(err) if rollback => {
                log_cleanup_failure(Some(self.inner.id), err);
                Ok(())
            }
            Err(err) => Err(map_io_error(CLOSE, err)),
        };
        if first_close {
            self.inner.close_future.try_success();
        }
        outcome
    }

    fn advance(&self, next: ChannelState) {
        if let Err(current) = self.inner.state.transition(next) {
            trace!(channel = %self.inner.id, ?current, ?next, "state transition skipped");
        }
    }
}

fn establish(
    core: &mut SocketCore,
    remote: SocketAddr,
    local: Option<SocketAddr>,
    timeout: Option<std::time::Duration>,
) -> Result<()> {
    if let Some(local) = local {
        core.socket
            .bind(local)
            .map_err(|err| map_io_error(BIND, err))?;
    }
    core.socket
        .connect(remote, timeout)
        .map_err(|err| map_io_error(CONNECT, err))?;
    let (input, output) = core
        .socket
        .acquire_streams()
        .map_err(|err| map_io_error(ACQUIRE_STREAMS, err))?;
    core.stream.attach(input, output);
    Ok(())
}

fn log_cleanup_failure(channel: Option<ChannelId>, err: io::Error) {
    let err: CoreError = map_io_error(CLEANUP, err);
    warn!(
        channel = ?channel,
        code = err.code(),
        error = %err,
        "failed to release socket during setup rollback"
    );
}

impl fmt::Debug for OioSocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OioSocketChannel")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent)
            .field("state", &self.state())
            .field("local", &self.local_address())
            .field("remote", &self.remote_address())
            .finish()
    }
}
