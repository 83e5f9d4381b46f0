//! 文件区域的传输循环与默认实现。
//!
//! # 设计动机（Why）
//! - 大文件直接从页缓存送往套接字（Linux 上为 `sendfile(2)`），避免经过用户态缓冲；
//! - 区域的“声明长度”与文件实际长度可能不一致（文件被截断），传输循环必须识别
//!   “源提前耗尽”并以 [`ErrorKind::ShortSource`](spark_channel::ErrorKind::ShortSource) 失败，
//!   而不是无声地少发数据。
//!
//! # 契约（What）
//! - [`transfer_region`] 以累计字节数为位置反复调用 [`FileRegion::transfer_to`]；
//! - 无论成功或失败，区域恰好被释放一次；释放失败只记录日志。

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    net::TcpStream,
    path::Path,
};

use spark_channel::CoreError;
use tracing::{trace, warn};

use crate::error::{CLEANUP, TRANSFER, map_io_error, short_source};

/// 单次传输的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// 本次移动了 `n` 个字节（可能为 0）。
    Moved(u64),
    /// 源已经没有更多数据。
    SourceExhausted,
}

/// 文件区域的写出目标。
///
/// 能提供原始描述符的目标（套接字）在 Linux 上走零拷贝路径，其余目标走缓冲拷贝。
pub trait TransferTarget: Write {
    #[cfg(target_os = "linux")]
    fn zero_copy_fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        None
    }
}

impl TransferTarget for TcpStream {
    #[cfg(target_os = "linux")]
    fn zero_copy_fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        Some(self.as_fd())
    }
}

impl TransferTarget for Vec<u8> {}

/// 可被通道写出的文件区域。
pub trait FileRegion: Send {
    /// 区域声明的总字节数。
    fn count(&self) -> u64;

    /// 已成功传输的字节数，单调递增且不超过 [`count`](Self::count)。
    fn transferred(&self) -> u64;

    /// 从区域内的 `position` 处开始，向 `target` 传输一段数据。
    fn transfer_to(&mut self, target: &mut dyn TransferTarget, position: u64)
    -> io::Result<Transfer>;

    /// 释放底层资源；返回本次调用是否真正释放了资源。
    fn release(&mut self) -> io::Result<bool>;
}

/// 把整个区域写入 `target`，返回写出的字节数。
///
/// # 逻辑解析（How）
/// - `SourceExhausted`：若累计字节数不等于声明长度，以 ShortSource 失败；否则视为完成；
/// - `Moved(n)`：累加，达到声明长度即完成；
/// - I/O 错误：释放区域后原样向上映射。
///
/// 单次返回 `Moved(0)` 而未耗尽的区域会让循环继续重试，循环本身不设上限。
pub fn transfer_region(
    region: &mut dyn FileRegion,
    target: &mut dyn TransferTarget,
) -> Result<u64, CoreError> {
    let count = region.count();
    let mut written = 0u64;
    let outcome = loop {
        if written >= count {
            break Ok(written);
        }
        match region.transfer_to(target, written) {
            Ok(Transfer::Moved(moved)) => {
                written += moved;
                trace!(moved, written, count, "file region progressed");
            }
            Ok(Transfer::SourceExhausted) if written == count => break Ok(written),
            Ok(Transfer::SourceExhausted) => break Err(short_source(count, written)),
            Err(err) => break Err(map_io_error(TRANSFER, err)),
        }
    };
    release_region(region);
    outcome
}

/// 释放区域；失败只记录清理错误。
pub(crate) fn release_region(region: &mut dyn FileRegion) {
    if let Err(err) = region.release() {
        let err = map_io_error(CLEANUP, err);
        warn!(code = err.code(), error = %err, "failed to release file region");
    }
}

/// 单次缓冲拷贝或 `sendfile` 的最大字节数。
const MAX_CHUNK: u64 = 1024 * 1024;
const COPY_BUFFER: usize = 64 * 1024;

/// 以 [`File`] 为源的文件区域。
#[derive(Debug)]
pub struct DefaultFileRegion {
    file: Option<File>,
    offset: u64,
    count: u64,
    transferred: u64,
}

impl DefaultFileRegion {
    /// 以文件中 `[offset, offset + count)` 为区域。
    pub fn new(file: File, offset: u64, count: u64) -> Self {
        Self {
            file: Some(file),
            offset,
            count,
            transferred: 0,
        }
    }

    /// 打开 `path` 并以整个文件为区域。
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::new(file, 0, len))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_released(&self) -> bool {
        self.file.is_none()
    }

    fn send_chunk(
        file: &File,
        start: u64,
        len: u64,
        target: &mut dyn TransferTarget,
    ) -> io::Result<u64> {
        #[cfg(target_os = "linux")]
        if let Some(fd) = target.zero_copy_fd() {
            return sendfile_chunk(fd, file, start, len);
        }
        copy_chunk(file, start, len, target)
    }
}

#[cfg(target_os = "linux")]
fn sendfile_chunk(
    out: std::os::fd::BorrowedFd<'_>,
    file: &File,
    start: u64,
    len: u64,
) -> io::Result<u64> {
    use nix::{errno::Errno, libc::off_t, sys::sendfile::sendfile};

    let mut offset = off_t::try_from(start)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset overflows off_t"))?;
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    loop {
        match sendfile(out, file, Some(&mut offset), len) {
            Ok(sent) => return Ok(sent as u64),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(io::Error::from(errno)),
        }
    }
}

fn copy_chunk(
    mut file: &File,
    start: u64,
    len: u64,
    target: &mut dyn TransferTarget,
) -> io::Result<u64> {
    let mut scratch = vec![0u8; usize::try_from(len).map_or(COPY_BUFFER, |len| len.min(COPY_BUFFER))];
    file.seek(SeekFrom::Start(start))?;
    let read = loop {
        match file.read(&mut scratch) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => break other?,
        }
    };
    target.write_all(&scratch[..read])?;
    Ok(read as u64)
}

impl FileRegion for DefaultFileRegion {
    fn count(&self) -> u64 {
        self.count
    }

    fn transferred(&self) -> u64 {
        self.transferred
    }

    fn transfer_to(
        &mut self,
        target: &mut dyn TransferTarget,
        position: u64,
    ) -> io::Result<Transfer> {
        if position > self.count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("position {position} is beyond region count {}", self.count),
            ));
        }
        let remaining = self.count - position;
        if remaining == 0 {
            return Ok(Transfer::Moved(0));
        }
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::other("file region already released"))?;

        let moved = Self::send_chunk(file, self.offset + position, remaining.min(MAX_CHUNK), target)?;
        if moved == 0 {
            return Ok(Transfer::SourceExhausted);
        }
        self.transferred = self.transferred.max(position + moved).min(self.count);
        Ok(Transfer::Moved(moved))
    }

    fn release(&mut self) -> io::Result<bool> {
        Ok(self.file.take().is_some())
    }
}
