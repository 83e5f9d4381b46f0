use std::{
    io,
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// 阻塞套接字句柄及其生命周期标志。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 未建连通道在构造时并不知道目标地址族，因此底层 `socket2::Socket` 延迟到首次
///   `bind`/`connect` 才按地址族创建；读超时在构造时记录，创建套接字时立即落地；
/// - closed/connected 标志与套接字放在一起，流视图获取与幂等关闭只需查询这一处。
///
/// ## 契约（What）
/// - `close` 幂等：第二次调用返回 `Ok(false)`；
/// - 关闭后任何 `bind`/`connect`/`acquire_streams` 都返回错误，句柄不会复活；
/// - 由 `bind` 首次创建的套接字在绑定失败时被丢弃，重试可以换用另一地址族；
/// - 所有方法只在所属事件循环线程上调用。
#[derive(Debug)]
pub(crate) struct SocketHandle {
    socket: Option<Socket>,
    read_timeout: Duration,
    connected: bool,
    closed: bool,
    #[cfg(test)]
    close_failure: Option<io::ErrorKind>,
}

impl SocketHandle {
    /// 尚未创建底层套接字的句柄。
    pub(crate) fn unconnected(read_timeout: Duration) -> Self {
        Self {
            socket: None,
            read_timeout,
            connected: false,
            closed: false,
            #[cfg(test)]
            close_failure: None,
        }
    }

    /// 包装一条已建连（例如由监听器接受）的连接，并立即应用读超时。
    pub(crate) fn from_connected(stream: TcpStream, read_timeout: Duration) -> io::Result<Self> {
        let socket = Socket::from(stream);
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(Self {
            socket: Some(socket),
            read_timeout,
            connected: true,
            closed: false,
            #[cfg(test)]
            close_failure: None,
        })
    }

    fn ensure_socket(&mut self, addr: &SocketAddr) -> io::Result<&Socket> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket is closed"));
        }
        match self.socket {
            Some(ref socket) => Ok(socket),
            None => {
                let socket =
                    Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
                socket.set_read_timeout(Some(self.read_timeout))?;
                Ok(self.socket.insert(socket))
            }
        }
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not open"))
    }

    pub(crate) fn bind(&mut self, local: SocketAddr) -> io::Result<()> {
        let created = self.socket.is_none();
        let bound = self.ensure_socket(&local)?.bind(&SockAddr::from(local));
        if bound.is_err() && created {
            self.socket = None;
        }
        bound
    }

    /// 建连；`timeout` 为 `None` 时阻塞直到操作系统给出结果。
    pub(crate) fn connect(&mut self, remote: SocketAddr, timeout: Option<Duration>) -> io::Result<()> {
        let socket = self.ensure_socket(&remote)?;
        let target = SockAddr::from(remote);
        match timeout {
            Some(timeout) => socket.connect_timeout(&target, timeout)?,
            None => socket.connect(&target)?,
        }
        self.connected = true;
        Ok(())
    }

    /// 为已建连套接字复制出输入、输出两个流视图。
    pub(crate) fn acquire_streams(&self) -> io::Result<(TcpStream, TcpStream)> {
        if !self.connected || self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "streams are only available on a connected socket",
            ));
        }
        let socket = self.socket()?;
        let input = TcpStream::from(socket.try_clone()?);
        let output = TcpStream::from(socket.try_clone()?);
        Ok((input, output))
    }

    pub(crate) fn shutdown_output(&self) -> io::Result<()> {
        self.socket()?.shutdown(Shutdown::Write)
    }

    /// 关闭套接字；返回本次调用是否真正执行了关闭。
    ///
    /// 即使 `shutdown` 报错，套接字也已经被释放，句柄进入 closed。
    pub(crate) fn close(&mut self) -> io::Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.closed = true;
        let socket = self.socket.take();
        if let Some(err) = self.take_close_failure() {
            return Err(err);
        }
        let Some(socket) = socket else {
            return Ok(true);
        };
        let shutdown = if self.connected {
            socket.shutdown(Shutdown::Both)
        } else {
            Ok(())
        };
        drop(socket);
        match shutdown {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(true),
        }
    }

    /// 让下一次 `close` 在释放套接字后报告 `kind` 错误。
    #[cfg(test)]
    pub(crate) fn fail_next_close(&mut self, kind: io::ErrorKind) {
        self.close_failure = Some(kind);
    }

    #[cfg(test)]
    fn take_close_failure(&mut self) -> Option<io::Error> {
        self.close_failure
            .take()
            .map(|kind| io::Error::new(kind, "injected close failure"))
    }

    #[cfg(not(test))]
    fn take_close_failure(&mut self) -> Option<io::Error> {
        None
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        as_inet(self.socket()?.local_addr()?)
    }

    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        as_inet(self.socket()?.peer_addr()?)
    }
}

fn as_inet(addr: SockAddr) -> io::Result<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "socket address is not an inet address")
    })
}

/// 非阻塞地探测输入流中可立即读取的字节数。
///
/// 以 `MSG_PEEK | MSG_DONTWAIT` 窥视至多 [`PEEK_LIMIT`] 字节，不消费数据；
/// 任何错误（包括 `EAGAIN`）都报告为 0。
#[cfg(target_os = "linux")]
pub(crate) fn probe_available(stream: &TcpStream) -> usize {
    use nix::libc;
    use socket2::SockRef;
    use std::mem::MaybeUninit;

    let mut scratch = [MaybeUninit::<u8>::uninit(); PEEK_LIMIT];
    SockRef::from(stream)
        .recv_with_flags(&mut scratch, libc::MSG_PEEK | libc::MSG_DONTWAIT)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn probe_available(_stream: &TcpStream) -> usize {
    0
}

/// 单次探测的窥视上限。
pub const PEEK_LIMIT: usize = 64 * 1024;
