use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

const DEFAULT_DIRECTIVE: &str = "info";

/// 日志安装失败的原因。
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// `install` 已经成功执行过。
    #[error("spark-channel logging is already installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 过滤指令无法解析。
    #[error("invalid log filter directive: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),
    /// 设置全局 Subscriber 失败。
    #[error("failed to set global subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// 安装进程级 `fmt + EnvFilter` 日志订阅者。
///
/// # 教案式说明
/// - **意图（Why）**：通道层只通过 `tracing` 宏打点，宿主进程调用一次本函数即可看到生命周期、
///   回滚清理失败等事件。
/// - **逻辑（How）**：显式传入的指令优先；否则读取 `RUST_LOG`；都没有时回退为 `info`。
/// - **契约（What）**：重复调用返回 [`LoggingError::AlreadyInstalled`]；外部已设置订阅者时返回
///   [`LoggingError::SubscriberAlreadySet`]，不会覆盖宿主的选择。
pub fn install(directive: Option<&str>) -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Err(LoggingError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(LoggingError::SubscriberAlreadySet);
    }

    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true));
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| LoggingError::AlreadyInstalled)
}
