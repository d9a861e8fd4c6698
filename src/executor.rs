/// 双执行器
///
/// boss 池串行执行重连流程，work 池串行执行心跳发送。
/// 每个池都是固定数量的 tokio worker 从同一个 flume 队列取任务，
/// 停止时直接 abort worker，正在执行和排队中的任务都会被中断。

use std::future::Future;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Task = BoxFuture<'static, ()>;

/// 固定大小的任务池
pub struct WorkerPool {
    name: &'static str,
    sender: flume::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 创建任务池并立即启动 `size` 个 worker
    pub fn new(name: &'static str, size: usize) -> Self {
        let (sender, receiver) = flume::unbounded::<Task>();
        let workers = (0..size.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    while let Ok(task) = receiver.recv_async().await {
                        task.await;
                    }
                    debug!("🧵 {} worker #{} 退出", name, index);
                })
            })
            .collect();

        debug!("🧵 启动任务池 {} (workers: {})", name, size.max(1));
        Self { name, sender, workers }
    }

    /// 提交任务，池已停止时返回 false
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender.send(Box::pin(task)).is_ok()
    }

    /// 立即停止，中断执行中的任务并丢弃排队任务
    pub fn shutdown(self) {
        // Drop 负责 abort
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
        debug!("🧵 任务池 {} 已停止", self.name);
    }
}

/// boss / work 两个池的生命周期管理
#[derive(Default)]
pub struct ExecutorSupervisor {
    boss: Mutex<Option<WorkerPool>>,
    work: Mutex<Option<WorkerPool>>,
}

impl ExecutorSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动 boss 池（已启动时不做任何事）
    pub fn start_boss(&self) {
        self.boss.lock().get_or_insert_with(|| WorkerPool::new("boss", 1));
    }

    pub fn stop_boss(&self) {
        if let Some(pool) = self.boss.lock().take() {
            pool.shutdown();
        }
    }

    pub fn stop_work(&self) {
        if let Some(pool) = self.work.lock().take() {
            pool.shutdown();
        }
    }

    /// 在 boss 池执行任务，boss 池未启动时丢弃
    pub fn exec_boss<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.boss.lock().as_ref() {
            Some(pool) => pool.execute(task),
            None => {
                warn!("boss 池未启动，丢弃任务");
                false
            }
        }
    }

    /// 在 work 池执行任务，work 池未启动时先按需创建
    pub fn exec_work<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.work
            .lock()
            .get_or_insert_with(|| WorkerPool::new("work", 1))
            .execute(task)
    }

    pub fn is_boss_running(&self) -> bool {
        self.boss.lock().is_some()
    }

    pub fn is_work_running(&self) -> bool {
        self.work.lock().is_some()
    }

    /// 停止全部任务池
    pub fn destroy(&self) {
        self.stop_boss();
        self.stop_work();
    }
}
