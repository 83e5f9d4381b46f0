use spark_channel::{
    CoreError, ErrorCategory, RetryAdvice,
    error::codes,
};
use std::{borrow::Cow, io, time::Duration};

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: codes::SETUP_FAILED,
    message: "oio bind",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: codes::SETUP_FAILED,
    message: "oio connect",
};
pub(crate) const ACQUIRE_STREAMS: OperationKind = OperationKind {
    code: codes::SETUP_FAILED,
    message: "oio acquire streams",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: codes::SETUP_FAILED,
    message: "oio configure",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: codes::TRANSPORT_IO,
    message: "oio write",
};
pub(crate) const TRANSFER: OperationKind = OperationKind {
    code: codes::TRANSPORT_IO,
    message: "oio file transfer",
};
pub(crate) const SHUTDOWN_OUTPUT: OperationKind = OperationKind {
    code: codes::TRANSPORT_IO,
    message: "oio shutdown output",
};
pub(crate) const CLOSE: OperationKind = OperationKind {
    code: codes::TRANSPORT_IO,
    message: "oio close",
};
pub(crate) const CLEANUP: OperationKind = OperationKind {
    code: codes::CLEANUP_FAILED,
    message: "oio cleanup",
};

/// 将 IO 错误映射为框架级 CoreError，并附带错误分类与底层原因。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(
        kind.code,
        Cow::Owned(format!("{}: {}", kind.message, error)),
    )
    .with_category(category)
    .with_cause(error)
}

/// 操作需要已建连的套接字（或其输出流视图），但通道尚未建连或已释放流视图。
pub(crate) fn not_connected(kind: OperationKind) -> CoreError {
    CoreError::new(
        codes::NOT_CONNECTED,
        format!("{}: channel is not connected", kind.message),
    )
}

/// 操作作用于已关闭的通道。
pub(crate) fn closed(kind: OperationKind) -> CoreError {
    CoreError::new(codes::CLOSED, format!("{}: channel is closed", kind.message))
}

/// 对已建连通道再次建连或绑定。
pub(crate) fn already_connected(kind: OperationKind) -> CoreError {
    CoreError::new(
        codes::ALREADY_CONNECTED,
        format!("{}: channel is already bound or connected", kind.message),
    )
}

/// 文件区域在声明的字节数之前耗尽。
pub(crate) fn short_source(expected: u64, transferred: u64) -> CoreError {
    CoreError::new(
        codes::SHORT_SOURCE,
        format!("file region expected {expected} bytes but source ended after {transferred}"),
    )
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(5)))
        }
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable(
            RetryAdvice::after(Duration::from_millis(50)).with_reason("peer or address unavailable"),
        ),
        ErrorKind::WriteZero => ErrorCategory::Retryable(
            RetryAdvice::after(Duration::from_millis(10)).with_reason("peer window is full"),
        ),
        _ => ErrorCategory::NonRetryable,
    }
}
