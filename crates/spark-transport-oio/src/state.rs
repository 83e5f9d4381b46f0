use std::sync::atomic::{AtomicU8, Ordering};

/// 通道生命周期状态。
///
/// ```text
/// Created ──bind──▶ Bound ──connect──▶ Active ──shutdown_output──▶ OutputShutdown
///    └──────────connect──────────────────┘
/// 任意状态 ──close / 建连失败回滚──▶ Closed（终态）
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Created = 0,
    Bound = 1,
    Active = 2,
    OutputShutdown = 3,
    Closed = 4,
}

impl ChannelState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Bound,
            2 => Self::Active,
            3 => Self::OutputShutdown,
            _ => Self::Closed,
        }
    }

    /// 是否允许从 `self` 迁移到 `next`。
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Created, Bound)
                | (Created, Active)
                | (Bound, Active)
                | (Active, OutputShutdown)
                | (Created | Bound | Active | OutputShutdown, Closed)
        )
    }

    /// 已建连且未关闭。
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::OutputShutdown)
    }
}

/// 可被任意线程读取的状态单元；只有所属事件循环线程写入。
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(initial: ChannelState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn load(&self) -> ChannelState {
        ChannelState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// 尝试迁移；非法迁移返回 `Err(当前状态)` 且不修改状态。
    pub(crate) fn transition(&self, next: ChannelState) -> Result<ChannelState, ChannelState> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.0.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(raw) => current = ChannelState::from_raw(raw),
            }
        }
    }
}
