//! 线程亲和调度：所有修改通道状态的入口都经由此处的“检查并派发”包装。
//!
//! # 设计动机（Why）
//! - 通道状态只能由所属事件循环线程修改。与其给每个字段加锁，不如让每个修改入口先判断
//!   调用线程：在循环内就地执行，在循环外就把“同一个操作”排进循环队列，由循环线程重入执行。
//! - 这样同一通道的所有修改都按循环执行顺序形成全序，跨线程调用排在已入队任务之后。
//!
//! # 契约（What）
//! - 在循环线程内调用：`op` 同步执行，返回前句柄已完成（由 `op` 负责完成）；
//! - 在其它线程调用：立即返回尚未完成的句柄；循环稍后执行任务时重新进入本函数，
//!   此时命中“已在循环内”分支；
//! - 循环拒绝任务（已停止）时句柄以 [`codes::RUNTIME_SHUTDOWN`] 失败，`op` 不会执行。

use std::sync::Arc;

use tracing::warn;

use crate::{
    error::{CoreError, codes},
    event_loop::EventExecutor,
    promise::ChannelPromise,
};

/// 在所属事件循环上执行 `op`，并返回其完成句柄。
pub fn run_in_event_loop<F>(
    executor: &Arc<dyn EventExecutor>,
    promise: ChannelPromise,
    op: F,
) -> ChannelPromise
where
    F: FnOnce(ChannelPromise) + Send + 'static,
{
    if executor.in_event_loop() {
        op(promise.clone());
        return promise;
    }

    let owner = Arc::clone(executor);
    let deferred = promise.clone();
    let reentry = Box::new(move || {
        if owner.in_event_loop() {
            run_in_event_loop(&owner, deferred, op);
        } else {
            // 执行器违反了 `execute` 契约，继续排队只会无限循环。
            deferred.try_failure(CoreError::new(
                codes::BLOCKING_IN_EVENT_LOOP,
                "executor ran a marshaled task outside its own thread",
            ));
        }
    });
    if let Err(err) = executor.execute(reentry) {
        warn!(error = %err, "failed to marshal operation onto event loop");
        promise.try_failure(err);
    }
    promise
}
