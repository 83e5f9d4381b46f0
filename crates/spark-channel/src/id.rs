//! 通道标识。
//!
//! # 设计动机（Why）
//! - 日志、父子关系与调试输出都需要一个稳定且廉价的通道 ID；
//! - 以新类型包裹 `u64`，避免与端口、字节数等裸整数混用。

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一、单调分配的通道标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 分配下一个标识。
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 以已知数值构造标识，主要用于测试与跨进程回放。
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// 读取底层数值。
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oio-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let first = ChannelId::next();
        let second = ChannelId::next();
        assert!(second > first);
        assert_eq!(ChannelId::from_raw(9).to_string(), "oio-9");
        assert_eq!(ChannelId::from_raw(9).as_u64(), 9);
    }
}
