//! 协作式读取循环。
//!
//! 每一轮在所属事件循环上至多执行 `max_reads_per_pass` 次有界阻塞读，读到超时即结束本轮，
//! 然后把下一轮追加到队列尾部；同一循环上的其它通道与跨线程任务因此都能轮到执行。

use std::sync::Arc;

use bytes::BytesMut;
use spark_channel::Result;
use tracing::{debug, warn};

use crate::{channel::OioSocketChannel, stream::ReadOutcome};

/// 读取循环向上游交付事件的回调。
///
/// 所有回调都在所属事件循环线程上执行。
pub trait ByteInbound: Send + 'static {
    /// 有新数据追加到 `data` 尾部。回调可以消费（`split_to`/`clear`）任意前缀，
    /// 未消费的字节会保留到下一次回调。
    fn on_read(&mut self, channel: &OioSocketChannel, data: &mut BytesMut);

    /// 一轮读取结束且本轮读到过数据。
    fn on_read_complete(&mut self, _channel: &OioSocketChannel) {}

    /// 启用半关闭时读到流结束；通道保持打开，仍可写出。
    fn on_input_shutdown(&mut self, _channel: &OioSocketChannel) {}

    /// 通道已关闭，读取循环随之结束。
    ///
    /// 输入已半关闭时，本回调在通道随后关闭的那一刻由关闭线程（所属事件循环）触发。
    fn on_inactive(&mut self, _channel: &OioSocketChannel) {}
}

/// 绑定到单个通道的读取循环。
pub struct OioReadLoop<H> {
    channel: OioSocketChannel,
    inbound: H,
    buffer: BytesMut,
}

impl<H: ByteInbound> OioReadLoop<H> {
    /// 在通道所属的事件循环上启动读取。
    pub fn start(channel: OioSocketChannel, inbound: H) -> Result<()> {
        let buffer = BytesMut::with_capacity(channel.config().read_buffer_size());
        Self {
            channel,
            inbound,
            buffer,
        }
        .schedule()
    }

    fn schedule(self) -> Result<()> {
        let event_loop = Arc::clone(self.channel.event_loop());
        event_loop.execute(Box::new(move || self.run_pass()))
    }

    fn run_pass(mut self) {
        if !self.channel.is_open() {
            self.inbound.on_inactive(&self.channel);
            return;
        }
        if self.channel.is_input_shutdown() {
            return;
        }

        let mut progressed = false;
        for _ in 0..self.channel.config().max_reads_per_pass() {
            match self.channel.read_step(&mut self.buffer) {
                ReadOutcome::Progress(_) => {
                    progressed = true;
                    self.inbound.on_read(&self.channel, &mut self.buffer);
                }
                ReadOutcome::TimedOut => break,
                ReadOutcome::EndOfStream => {
                    if progressed {
                        self.inbound.on_read_complete(&self.channel);
                    }
                    self.finish_input();
                    return;
                }
            }
        }
        if progressed {
            self.inbound.on_read_complete(&self.channel);
        }

        let id = self.channel.id();
        if let Err(err) = self.schedule() {
            warn!(channel = %id, error = %err, "read loop could not reschedule, stopping");
        }
    }

    fn finish_input(mut self) {
        if self.channel.config().allow_half_closure() && self.channel.is_open() {
            self.channel.mark_input_shutdown();
            self.inbound.on_input_shutdown(&self.channel);
            let Self {
                channel,
                mut inbound,
                ..
            } = self;
            // 监听器挂在通道自己的关闭句柄上，只能持有弱引用。
            let weak = channel.downgrade();
            channel.close_future().add_listener(move |_| {
                if let Some(channel) = weak.upgrade() {
                    inbound.on_inactive(&channel);
                }
            });
            return;
        }
        debug!(channel = %self.channel.id(), "end of stream, closing channel");
        // 在循环线程上 close 同步完成；关闭失败已由完成句柄携带，这里只关心通道已进入 Closed。
        let closed = self.channel.close();
        if let Some(err) = closed.cause() {
            debug!(channel = %self.channel.id(), error = %err, "close after end of stream reported an error");
        }
        self.inbound.on_inactive(&self.channel);
    }
}
