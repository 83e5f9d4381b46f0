#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-transport-oio

## 设计动机（Why）
- **定位**：把阻塞式 TCP 套接字适配为事件循环驱动的通道：有界阻塞读、同步写出、
  零拷贝文件传输与半关闭。
- **架构角色**：依赖 `spark-channel` 提供的完成句柄、事件循环与线程亲和派发；
  本 crate 负责套接字生命周期与 I/O 细节。

## 核心组件（What）
- [`OioSocketChannel`]：生命周期（bind/connect/close/shutdown_output）、写出与读取原语；
- [`BlockingStream`] / [`ReadOutcome`]：把“超时”与“流结束”作为正常返回值的流适配器；
- [`FileRegion`] / [`DefaultFileRegion`]：文件区域及其“源提前耗尽”检测；
- [`OioReadLoop`] / [`ByteInbound`]：协作式读取循环。

## 风险提示（Trade-offs）
- 一个事件循环线程串行服务其上的全部通道；单次阻塞读以 `so_timeout` 为上限，
  超时设得越大，兄弟通道的响应延迟越高。
"#]

mod channel;
mod error;
mod file_region;
mod reader;
mod socket;
mod state;
mod stream;

pub use channel::OioSocketChannel;
pub use file_region::{DefaultFileRegion, FileRegion, Transfer, TransferTarget, transfer_region};
pub use reader::{ByteInbound, OioReadLoop};
pub use socket::PEEK_LIMIT;
pub use state::ChannelState;
pub use stream::{BlockingStream, ReadOutcome};
