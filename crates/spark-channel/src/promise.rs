use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::{
    error::{CoreError, codes},
    event_loop::EventExecutor,
};

/// 完成句柄的终态。
pub type Outcome = Result<(), CoreError>;

type Listener = Box<dyn FnOnce(&Outcome) + Send + 'static>;

/// 对已完成的句柄再次赋值时返回的错误。
///
/// 这是编程错误而非可重试条件：调用方要么改用 `try_*` 系列，要么修正重复完成的路径。
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("completion handle already resolved")]
pub struct AlreadyResolved;

impl From<AlreadyResolved> for CoreError {
    fn from(value: AlreadyResolved) -> Self {
        CoreError::new(codes::PROMISE_ALREADY_RESOLVED, value.to_string())
    }
}

struct PromiseState {
    outcome: Option<Outcome>,
    listeners: Vec<Listener>,
}

struct PromiseInner {
    state: Mutex<PromiseState>,
    done: Condvar,
    executor: Option<Arc<dyn EventExecutor>>,
}

/// 单次赋值的完成句柄（Promise/Future），用于报告延迟执行的通道操作结果。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 线程亲和调度要求：非所属线程发起的操作立即返回“尚未完成”的句柄，待事件循环执行任务后再完成；
///   调用方需要一个可跨线程共享、可注册回调、也可阻塞等待的结果单元。
///
/// ## 逻辑 (How)
/// - 内部为 `Mutex<PromiseState>`：单次写入的结果 + 待触发的监听器列表；
/// - 完成时在锁内写入结果并取走监听器，释放锁后在**完成线程**上同步依次调用监听器；
///   对通道操作而言，完成线程就是所属事件循环线程，而不是发起调用的线程；
/// - `Condvar` 唤醒所有阻塞等待者。
///
/// ## 契约 (What)
/// - 状态恰为 {pending, succeeded, failed(error)} 之一，转换只发生一次；
/// - `try_*` 返回是否由本次调用完成；`set_*` 在已完成时返回 [`AlreadyResolved`]；
/// - 完成后注册的监听器立即在注册线程上执行；
/// - 绑定了事件循环的句柄若在该循环线程内被 `wait` 且尚未完成，立即返回
///   [`codes::BLOCKING_IN_EVENT_LOOP`] 错误，避免循环等待自己。
///
/// ## 注意事项 (Trade-offs)
/// - 监听器 panic 会被隔离并记录日志，不影响其余监听器与完成方。
#[derive(Clone)]
pub struct ChannelPromise {
    inner: Arc<PromiseInner>,
}

impl ChannelPromise {
    /// 创建未绑定事件循环的句柄。
    pub fn new() -> Self {
        Self::build(None)
    }

    /// 创建绑定到所属事件循环的句柄，用于在循环线程内阻塞等待时快速失败。
    pub fn with_executor(executor: Arc<dyn EventExecutor>) -> Self {
        Self::build(Some(executor))
    }

    /// 创建一个已成功的句柄。
    pub fn succeeded() -> Self {
        let promise = Self::new();
        promise.try_success();
        promise
    }

    /// 创建一个已失败的句柄。
    pub fn failed(error: CoreError) -> Self {
        let promise = Self::new();
        promise.try_failure(error);
        promise
    }

    fn build(executor: Option<Arc<dyn EventExecutor>>) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                state: Mutex::new(PromiseState {
                    outcome: None,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
                executor,
            }),
        }
    }

    /// 尝试以成功完成，返回是否由本次调用完成。
    pub fn try_success(&self) -> bool {
        self.complete(Ok(()))
    }

    /// 尝试以失败完成，返回是否由本次调用完成。
    pub fn try_failure(&self, error: CoreError) -> bool {
        self.complete(Err(error))
    }

    /// 以成功完成；已完成时返回 [`AlreadyResolved`]。
    pub fn set_success(&self) -> Result<(), AlreadyResolved> {
        if self.try_success() {
            Ok(())
        } else {
            Err(AlreadyResolved)
        }
    }

    /// 以失败完成；已完成时返回 [`AlreadyResolved`]。
    pub fn set_failure(&self, error: CoreError) -> Result<(), AlreadyResolved> {
        if self.try_failure(error) {
            Ok(())
        } else {
            Err(AlreadyResolved)
        }
    }

    /// 以给定结果完成，供“执行后照单回填”的调用点使用。
    pub fn complete_with(&self, outcome: Outcome) -> bool {
        self.complete(outcome)
    }

    /// 是否已进入终态。
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    /// 是否已成功。
    pub fn is_success(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Ok(())))
    }

    /// 失败原因；未完成或已成功时为 `None`。
    pub fn cause(&self) -> Option<CoreError> {
        match &self.inner.state.lock().outcome {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// 当前结果的快照。
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.state.lock().outcome.clone()
    }

    /// 注册完成监听器。
    ///
    /// 监听器在完成线程上同步执行；若句柄已完成，则在当前线程立即执行。
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                notify(Box::new(listener), &outcome);
            }
            None => state.listeners.push(Box::new(listener)),
        }
    }

    /// 阻塞等待终态。
    pub fn wait(&self) -> Outcome {
        let mut state = self.inner.state.lock();
        if state.outcome.is_none() {
            self.check_deadlock()?;
        }
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.inner.done.wait(&mut state);
        }
    }

    /// 在超时内等待终态，超时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        if state.outcome.is_none()
            && let Err(err) = self.check_deadlock()
        {
            return Some(Err(err));
        }
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            if self
                .inner
                .done
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.outcome.clone();
            }
        }
    }

    fn check_deadlock(&self) -> Result<(), CoreError> {
        match &self.inner.executor {
            Some(executor) if executor.in_event_loop() => Err(CoreError::new(
                codes::BLOCKING_IN_EVENT_LOOP,
                "waiting on a pending promise from its own event loop would deadlock",
            )),
            _ => Ok(()),
        }
    }

    fn complete(&self, outcome: Outcome) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.listeners)
        };
        self.inner.done.notify_all();
        for listener in listeners {
            notify(listener, &outcome);
        }
        true
    }
}

impl Default for ChannelPromise {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Ok(())) => "succeeded",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("ChannelPromise")
            .field("status", &status)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

fn notify(listener: Listener, outcome: &Outcome) {
    if panic::catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
        warn!("completion listener panicked");
    }
}
