#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-channel

## 设计动机（Why）
- **定位**：为阻塞套接字通道提供其依赖的协作契约：稳定错误域、单次赋值的完成句柄、
  所属执行上下文（事件循环）、线程亲和调度包装与通道配置。
- **架构角色**：`spark-transport-oio` 在这些契约之上实现通道生命周期；本 crate 不包含任何套接字细节。

## 核心契约（What）
- [`CoreError`]：稳定错误码 + 分类 + 可共享的底层原因；
- [`ChannelPromise`]：{pending, succeeded, failed} 单次转换，监听器在完成线程上同步触发；
- [`EventExecutor`] / [`SingleThreadEventLoop`]：`in_event_loop` + `execute` 的最小执行上下文；
- [`affinity::run_in_event_loop`]：所有状态修改入口共用的“检查并派发”包装；
- [`OioChannelConfig`]：建连超时、有界读超时等节流参数。

## 风险与考量（Trade-offs）
- 事件循环的任务队列无上限；通道的有界阻塞读是唯一的节流阀。
"#]

pub mod affinity;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod id;
pub mod logging;
pub mod promise;

pub use config::OioChannelConfig;
pub use error::{CoreError, ErrorCategory, ErrorKind, Result, RetryAdvice};
pub use event_loop::{EventExecutor, SingleThreadEventLoop, Task};
pub use id::ChannelId;
pub use promise::{AlreadyResolved, ChannelPromise, Outcome};
