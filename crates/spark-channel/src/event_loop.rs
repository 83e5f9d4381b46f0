//! 所属执行上下文（事件循环）契约与单线程实现。
//!
//! # 契约声明
//! * **单一所有者**：每个通道被钉在一个事件循环上；只有该循环的线程可以检查并修改通道状态。
//! * **显式任务队列**：跨线程调用被打包为闭包追加到队列尾部，由循环线程按 FIFO 顺序执行，
//!   因此同一通道上的状态修改天然形成全序，无需额外加锁。
//! * **不依赖线程局部魔法**：是否“身处循环”由线程 ID 比较得出，而不是隐式的 thread-local 注册。

use std::{
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, OnceLock},
    thread::{self, JoinHandle, ThreadId},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::error::{CoreError, Result, codes};

/// 投递给事件循环的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// `EventExecutor` 定义所属执行上下文的最小能力。
///
/// # 契约说明（What）
/// - `in_event_loop`：当前调用线程是否就是该上下文的执行线程；
/// - `execute`：将任务追加到队列尾部；上下文已停止时返回 [`codes::RUNTIME_SHUTDOWN`] 错误，
///   任务被丢弃且不会执行。
/// - **后置条件**：成功入队的任务恰好执行一次，且执行线程满足 `in_event_loop() == true`。
pub trait EventExecutor: Send + Sync + 'static {
    /// 判断调用线程是否为本执行上下文。
    fn in_event_loop(&self) -> bool;

    /// 追加任务到队列尾部。
    fn execute(&self, task: Task) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopState {
    Running,
    ShuttingDown,
    Terminated,
}

struct LoopQueue {
    tasks: VecDeque<Task>,
    state: LoopState,
}

struct LoopShared {
    name: String,
    queue: Mutex<LoopQueue>,
    ready: Condvar,
    thread_id: OnceLock<ThreadId>,
}

/// 单线程事件循环：一个专属线程按 FIFO 顺序执行任务队列。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为阻塞套接字通道提供“所属执行上下文”：同一循环可协作式地服务多个通道，
///   每个通道的有界阻塞读在超时后让出线程，让兄弟通道与跨线程任务获得执行机会。
///
/// ## 逻辑 (How)
/// - 队列由 `parking_lot::Mutex<VecDeque<Task>>` + `Condvar` 实现；
/// - 循环线程启动后先登记自身 `ThreadId`，之后才开始出队，因此循环内执行的任何任务
///   调用 `in_event_loop` 都能得到 `true`；
/// - 任务 panic 被 `catch_unwind` 隔离并记录日志，循环继续服务后续任务。
///
/// ## 契约 (What)
/// - `spawn`：创建并启动循环线程；
/// - `shutdown`：停止接收新任务，已入队任务依然执行完毕后线程退出；
/// - `join`：等待线程退出，在循环线程内调用会返回错误而不是死锁。
///
/// ## 注意事项 (Trade-offs)
/// - 队列无上限；阻塞读以超时为界，是防止单个通道饿死其它任务的唯一节流手段。
pub struct SingleThreadEventLoop {
    shared: Arc<LoopShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadEventLoop {
    /// 启动一个命名的事件循环线程。
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let shared = Arc::new(LoopShared {
            name: name.clone(),
            queue: Mutex::new(LoopQueue {
                tasks: VecDeque::new(),
                state: LoopState::Running,
            }),
            ready: Condvar::new(),
            thread_id: OnceLock::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&worker))
            .map_err(|err| {
                CoreError::new(
                    codes::RUNTIME_SHUTDOWN,
                    format!("failed to spawn event loop thread `{name}`"),
                )
                .with_cause(err)
            })?;
        debug!(event_loop = %name, "event loop started");
        Ok(Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// 循环名称，同时也是线程名。
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 队列中尚未执行的任务数量。
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// 是否仍在接收新任务。
    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().state == LoopState::Running
    }

    /// 是否已经彻底退出。
    pub fn is_terminated(&self) -> bool {
        self.shared.queue.lock().state == LoopState::Terminated
    }

    /// 停止接收新任务；已入队的任务仍会被执行。重复调用无副作用。
    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.state == LoopState::Running {
            queue.state = LoopState::ShuttingDown;
            debug!(event_loop = %self.shared.name, pending = queue.tasks.len(), "event loop shutting down");
        }
        drop(queue);
        self.shared.ready.notify_all();
    }

    /// 等待循环线程退出。
    pub fn join(&self) -> Result<()> {
        if self.in_event_loop() {
            return Err(CoreError::new(
                codes::BLOCKING_IN_EVENT_LOOP,
                "event loop cannot join itself",
            ));
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            return Err(CoreError::new(
                codes::RUNTIME_SHUTDOWN,
                format!("event loop `{}` terminated abnormally", self.shared.name),
            ));
        }
        Ok(())
    }

    /// `shutdown` 后 `join` 的便捷组合。
    pub fn shutdown_and_join(&self) -> Result<()> {
        self.shutdown();
        self.join()
    }
}

impl EventExecutor for SingleThreadEventLoop {
    fn in_event_loop(&self) -> bool {
        self.shared
            .thread_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    fn execute(&self, task: Task) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.state != LoopState::Running {
            warn!(event_loop = %self.shared.name, "task rejected by stopped event loop");
            return Err(CoreError::new(
                codes::RUNTIME_SHUTDOWN,
                format!("event loop `{}` is shut down", self.shared.name),
            ));
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.ready.notify_one();
        Ok(())
    }
}

impl fmt::Debug for SingleThreadEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleThreadEventLoop")
            .field("name", &self.shared.name)
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

impl Drop for SingleThreadEventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: &LoopShared) {
    let _ = shared.thread_id.set(thread::current().id());
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if queue.state != LoopState::Running {
                    break None;
                }
                shared.ready.wait(&mut queue);
            }
        };
        let Some(task) = next else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(event_loop = %shared.name, "event loop task panicked");
        }
    }
    shared.queue.lock().state = LoopState::Terminated;
    shared.ready.notify_all();
    debug!(event_loop = %shared.name, "event loop terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn tasks_run_in_submission_order_on_loop_thread() {
        let event_loop = SingleThreadEventLoop::spawn("order").expect("spawn");
        let (tx, rx) = mpsc::channel();
        for index in 0..32 {
            let tx = tx.clone();
            let probe = Arc::clone(&event_loop);
            event_loop
                .execute(Box::new(move || {
                    tx.send((index, probe.in_event_loop())).expect("send");
                }))
                .expect("execute");
        }
        drop(tx);
        let observed: Vec<_> = rx.iter().collect();
        assert_eq!(observed.len(), 32);
        for (expected, (index, on_loop)) in observed.into_iter().enumerate() {
            assert_eq!(index, expected);
            assert!(on_loop);
        }
        assert!(!event_loop.in_event_loop());
        event_loop.shutdown_and_join().expect("join");
    }

    #[test]
    fn shutdown_drains_queue_then_rejects() {
        let event_loop = SingleThreadEventLoop::spawn("drain").expect("spawn");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();
        event_loop
            .execute(Box::new(move || {
                let _ = gate_rx.recv();
            }))
            .expect("execute gate");
        event_loop
            .execute(Box::new(move || {
                done_tx.send(()).expect("send");
            }))
            .expect("execute tail");
        assert!(event_loop.is_running());
        event_loop.shutdown();
        assert!(!event_loop.is_running());
        let rejected = event_loop.execute(Box::new(|| {}));
        assert_eq!(
            rejected.expect_err("must reject").code(),
            codes::RUNTIME_SHUTDOWN
        );
        gate_tx.send(()).expect("open gate");
        done_rx.recv().expect("queued task still runs");
        event_loop.join().expect("join");
        assert!(event_loop.is_terminated());
    }

    #[test]
    #[tracing_test::traced_test]
    fn rejected_submission_is_logged() {
        let event_loop = SingleThreadEventLoop::spawn("rejecting").expect("spawn");
        event_loop.shutdown_and_join().expect("join");
        assert!(event_loop.execute(Box::new(|| {})).is_err());
        assert!(logs_contain("task rejected by stopped event loop"));
    }

    #[test]
    fn panicking_task_does_not_kill_loop() {
        let event_loop = SingleThreadEventLoop::spawn("panic").expect("spawn");
        let (tx, rx) = mpsc::channel();
        event_loop
            .execute(Box::new(|| panic!("boom")))
            .expect("execute");
        event_loop
            .execute(Box::new(move || tx.send(()).expect("send")))
            .expect("execute");
        rx.recv().expect("loop survives panic");
        event_loop.shutdown_and_join().expect("join");
    }
}
