use std::{borrow::Cow, error::Error, fmt, sync::Arc, time::Duration};

/// `CoreError` 表示通道层跨组件共享的稳定错误域，是完成句柄、事件循环与传输实现共同使用的最终形态。
///
/// # 设计背景（Why）
/// - 阻塞套接字适配层在不同阶段（建连、写出、文件传输、关闭回滚）产生的故障需要合流为统一错误码，
///   以便日志与上层 Handler 按语义而非字符串做处置。
/// - 失败的完成句柄可能同时被多个监听器与等待者观察，因此错误必须可以廉价克隆：底层原因以
///   `Arc` 共享，而不是 `Box` 独占。
///
/// # 逻辑解析（How）
/// - `code` 始终为 `'static` 字符串，承载稳定语义（参见 [`codes`]）；`message` 面向排障人员；
///   `cause` 保留底层 `io::Error` 等原因，通过 `source()` 暴露完整链路。
/// - [`CoreError::kind`] 将错误码折叠为 [`ErrorKind`]，便于调用方按语义匹配。
///
/// # 契约说明（What）
/// - **前置条件**：调用方使用 [`codes`] 中的码值或遵循 `<域>.<语义>` 约定的自定义码值。
/// - **后置条件**：构造出的错误满足 `Send + Sync + 'static`，可以跨线程移动并被任意次克隆。
///
/// # 设计取舍（Trade-offs）
/// - 以 `Cow` 保存消息：静态文案零分配，动态文案（携带 errno 或字节数）付出一次堆分配。
#[derive(Clone, Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

/// 共享的底层原因。
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// 通道层统一返回别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 示例（Examples）
    /// ```rust
    /// use spark_channel::{CoreError, ErrorKind, error::codes};
    ///
    /// let err = CoreError::new(codes::NOT_CONNECTED, "write without output stream");
    /// assert_eq!(err.code(), codes::NOT_CONNECTED);
    /// assert_eq!(err.kind(), ErrorKind::NotConnected);
    /// assert!(err.cause().is_none());
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 为错误标记结构化分类信息。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取结构化错误分类。
    ///
    /// # 契约说明（What）
    /// - 显式设置的分类优先；
    /// - 未设置时按错误码推导默认分类，查不到则回退为 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .clone()
            .unwrap_or_else(|| default_category(self.code))
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 将错误码折叠为语义化的 [`ErrorKind`]。
    ///
    /// 未登记的错误码统一归入 [`ErrorKind::Io`]，调用方应当把它视作“未知的底层故障”。
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::SETUP_FAILED => ErrorKind::SetupFailure,
            codes::NOT_CONNECTED => ErrorKind::NotConnected,
            codes::SHORT_SOURCE => ErrorKind::ShortSource,
            codes::CLEANUP_FAILED => ErrorKind::ResourceCleanupFailure,
            codes::CLOSED => ErrorKind::Closed,
            codes::RUNTIME_SHUTDOWN => ErrorKind::Rejected,
            codes::PROMISE_ALREADY_RESOLVED
            | codes::BLOCKING_IN_EVENT_LOOP
            | codes::ALREADY_CONNECTED => ErrorKind::IllegalState,
            codes::CONFIG_INVALID => ErrorKind::InvalidConfig,
            _ => ErrorKind::Io,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|shared| shared.as_ref() as &(dyn Error + 'static))
    }
}

/// 错误的语义分组。
///
/// 与 [`codes`] 一一对应；正常运行路径上的“超时”“流结束”不在此列，它们以返回值表达。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 绑定、建连或流视图获取失败，已触发回滚关闭。
    SetupFailure,
    /// 没有输出流视图时尝试写出。
    NotConnected,
    /// 文件区域在声明的字节数之前耗尽。
    ShortSource,
    /// 回滚期间关闭资源的次生错误，只记录日志，不替换主错误。
    ResourceCleanupFailure,
    /// 通道已关闭。
    Closed,
    /// 事件循环已停止，拒绝了任务。
    Rejected,
    /// 调用顺序违反契约（重复完成、重复建连、在事件循环内阻塞等待）。
    IllegalState,
    /// 配置无法通过校验。
    InvalidConfig,
    /// 其它底层 I/O 故障。
    Io,
}

/// 错误分类枚举，驱动上层的自动化容错策略。
///
/// # 契约说明（What）
/// - `Retryable`：携带退避建议 [`RetryAdvice`]；
/// - `Timeout`/`Cancelled`：对应确定性的放弃策略；
/// - `ResourceExhausted`：资源（例如文件内容）少于承诺；
/// - `ProtocolViolation`：调用方违反了使用契约。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable(RetryAdvice),
    NonRetryable,
    ResourceExhausted,
    ProtocolViolation,
    Cancelled,
    Timeout,
}

/// 重试建议，用于描述“等待多久再试”。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAdvice {
    /// 推荐的等待时长。
    pub wait: Duration,
    /// 可选的原因描述，帮助调用方生成观测日志。
    pub reason: Option<Cow<'static, str>>,
}

impl RetryAdvice {
    /// 构造一个仅包含等待时间的建议。
    pub const fn after(wait: Duration) -> Self {
        Self { wait, reason: None }
    }

    /// 为建议附加原因描述。
    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

fn default_category(code: &str) -> ErrorCategory {
    match code {
        codes::SHORT_SOURCE => ErrorCategory::ResourceExhausted,
        codes::PROMISE_ALREADY_RESOLVED
        | codes::BLOCKING_IN_EVENT_LOOP
        | codes::ALREADY_CONNECTED
        | codes::CONFIG_INVALID => ErrorCategory::ProtocolViolation,
        codes::RUNTIME_SHUTDOWN => ErrorCategory::Cancelled,
        _ => ErrorCategory::NonRetryable,
    }
}

/// 通道层稳定错误码。
///
/// 错误码遵循 `<领域>.<语义>` 命名约定，方便在跨组件日志中检索与聚合。
pub mod codes {
    /// 绑定/建连/流视图获取失败（已回滚关闭）。
    pub const SETUP_FAILED: &str = "transport.oio.setup_failed";
    /// 写出时输出流视图不存在。
    pub const NOT_CONNECTED: &str = "transport.oio.not_connected";
    /// 文件区域提前耗尽。
    pub const SHORT_SOURCE: &str = "transport.oio.short_source";
    /// 关闭资源的次生错误。
    pub const CLEANUP_FAILED: &str = "transport.oio.cleanup_failed";
    /// 通用 I/O 故障（写出、半关闭、绑定）。
    pub const TRANSPORT_IO: &str = "transport.oio.io";
    /// 操作作用于已关闭的通道。
    pub const CLOSED: &str = "transport.oio.closed";
    /// 对已绑定或已建连的通道重复绑定/建连。
    pub const ALREADY_CONNECTED: &str = "transport.oio.already_connected";
    /// 事件循环已停止。
    pub const RUNTIME_SHUTDOWN: &str = "runtime.shutdown";
    /// 完成句柄被重复完成。
    pub const PROMISE_ALREADY_RESOLVED: &str = "promise.already_resolved";
    /// 在所属事件循环线程上阻塞等待尚未完成的句柄。
    pub const BLOCKING_IN_EVENT_LOOP: &str = "promise.blocking_in_event_loop";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "config.invalid";
}
