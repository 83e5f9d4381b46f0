//! 有界阻塞读与同步写出的流适配器。
//!
//! 适配器只持有输入、输出两个可选的流视图，不关心它们来自套接字还是测试桩；
//! 通道在建连成功后 `attach`，在关闭时 `detach`，之后读取恒为流结束、写出恒为未连接。

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use tracing::debug;

/// 一次有界阻塞读的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 读到了 `n > 0` 个字节，已追加到缓冲区尾部。
    Progress(usize),
    /// 超时内没有数据；这是正常路径，调用方应当让出事件循环稍后再试。
    TimedOut,
    /// 对端关闭或读取失败；缓冲区内容不变。
    EndOfStream,
}

/// 输入/输出流视图的持有者。
#[derive(Debug)]
pub struct BlockingStream<R, W> {
    input: Option<R>,
    output: Option<W>,
}

impl<R, W> Default for BlockingStream<R, W> {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
        }
    }
}

impl<R: Read, W: Write> BlockingStream<R, W> {
    /// 尚未挂接任何流视图的适配器。
    pub fn detached() -> Self {
        Self::default()
    }

    /// 挂接流视图，替换已有视图。
    pub fn attach(&mut self, input: R, output: W) {
        self.input = Some(input);
        self.output = Some(output);
    }

    /// 摘除流视图并交还调用方，后者通常直接丢弃以释放描述符。
    pub fn detach(&mut self) -> (Option<R>, Option<W>) {
        (self.input.take(), self.output.take())
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn input_ref(&self) -> Option<&R> {
        self.input.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut W> {
        self.output.as_mut()
    }

    /// 至多读取 `max` 个字节并追加到 `buf` 尾部。
    ///
    /// # 契约说明（What）
    /// - `Ok(0)` 视为对端关闭，返回 [`ReadOutcome::EndOfStream`]；
    /// - `WouldBlock`/`TimedOut`/`Interrupted` 返回 [`ReadOutcome::TimedOut`]；
    /// - 其它错误记录 `debug` 日志后按流结束处理，不向上传播；
    /// - 没有输入视图时返回流结束；`max == 0` 时不发起读取，按超时处理；
    /// - 任何非 `Progress` 结果都保证 `buf` 与调用前一致。
    pub fn read_step(&mut self, buf: &mut BytesMut, max: usize) -> ReadOutcome {
        let Some(input) = self.input.as_mut() else {
            return ReadOutcome::EndOfStream;
        };
        if max == 0 {
            return ReadOutcome::TimedOut;
        }

        let start = buf.len();
        buf.resize(start + max, 0);
        let result = input.read(&mut buf[start..]);
        match result {
            Ok(0) => {
                buf.truncate(start);
                ReadOutcome::EndOfStream
            }
            Ok(read) => {
                buf.truncate(start + read);
                ReadOutcome::Progress(read)
            }
            Err(err) => {
                buf.truncate(start);
                match err.kind() {
                    io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted => ReadOutcome::TimedOut,
                    _ => {
                        debug!(error = %err, "blocking read failed, treating as end of stream");
                        ReadOutcome::EndOfStream
                    }
                }
            }
        }
    }

    /// 把 `buf` 的剩余字节全部写出并刷新，返回写出的字节数。
    ///
    /// 没有输出视图时返回 `NotConnected`，`buf` 保持不动。
    pub fn write_from<B: Buf>(&mut self, buf: &mut B) -> io::Result<usize> {
        let Some(output) = self.output.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no output stream attached",
            ));
        };
        let mut written = 0;
        while buf.has_remaining() {
            let chunk = buf.chunk();
            let len = chunk.len();
            output.write_all(chunk)?;
            buf.advance(len);
            written += len;
        }
        output.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;

    /// 按脚本依次返回结果的读取桩。
    struct Scripted(Vec<io::Result<&'static [u8]>>);

    impl Read for Scripted {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            match self.0.remove(0) {
                Ok(data) => {
                    let len = data.len().min(out.len());
                    out[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                Err(err) => Err(err),
            }
        }
    }

    fn attached(script: Vec<io::Result<&'static [u8]>>) -> BlockingStream<Scripted, Vec<u8>> {
        let mut stream = BlockingStream::detached();
        stream.attach(Scripted(script), Vec::new());
        stream
    }

    #[test]
    fn progress_timeout_and_eof_leave_buffer_consistent() {
        let mut stream = attached(vec![
            Ok(&b"abc"[..]),
            Err(io::ErrorKind::WouldBlock.into()),
            Err(io::ErrorKind::TimedOut.into()),
        ]);
        let mut buf = BytesMut::from(&b"xy"[..]);

        assert_eq!(stream.read_step(&mut buf, 16), ReadOutcome::Progress(3));
        assert_eq!(&buf[..], b"xyabc");
        assert_eq!(stream.read_step(&mut buf, 16), ReadOutcome::TimedOut);
        assert_eq!(stream.read_step(&mut buf, 16), ReadOutcome::TimedOut);
        assert_eq!(&buf[..], b"xyabc");
        assert_eq!(stream.read_step(&mut buf, 16), ReadOutcome::EndOfStream);
        assert_eq!(&buf[..], b"xyabc");
    }

    #[test]
    fn read_errors_are_absorbed_as_end_of_stream() {
        let mut stream = attached(vec![Err(io::ErrorKind::ConnectionReset.into())]);
        let mut buf = BytesMut::new();
        assert_eq!(stream.read_step(&mut buf, 8), ReadOutcome::EndOfStream);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_is_bounded_by_max() {
        let mut stream = attached(vec![Ok(&b"0123456789"[..])]);
        let mut buf = BytesMut::new();
        assert_eq!(stream.read_step(&mut buf, 4), ReadOutcome::Progress(4));
        assert_eq!(&buf[..], b"0123");
    }

    #[test]
    fn detached_stream_reads_eof_and_rejects_writes() {
        let mut stream: BlockingStream<Cursor<Vec<u8>>, Vec<u8>> = BlockingStream::detached();
        assert!(!stream.has_input());
        let mut buf = BytesMut::new();
        assert_eq!(stream.read_step(&mut buf, 8), ReadOutcome::EndOfStream);

        let mut payload = Bytes::from_static(b"data");
        let err = stream.write_from(&mut payload).expect_err("no output");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(payload.remaining(), 4);
    }

    #[test]
    fn write_drains_chained_buffers() {
        let mut stream = attached(Vec::new());
        let mut payload = Bytes::from_static(b"head-").chain(Bytes::from_static(b"tail"));
        assert_eq!(stream.write_from(&mut payload).expect("write"), 9);
        let (_, output) = stream.detach();
        assert_eq!(output.expect("output"), b"head-tail");
        assert!(!stream.has_output());
    }
}
