// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 工作线程池
//!
//! 固定数量的工作线程在启动时一次性创建，循环地从 [`TaskQueue`] 取出任务并同步执行。
//! 池内维护一个“活跃任务”计数器：提交时加一，执行结束时减一，归零时唤醒
//! [`WorkerPool::wait_for_idle`] 的调用者。
//!
//! 任务内部的 panic 不会被捕获：对应的工作线程会随之退出，池中可用的线程数减少一个。
//! 计数器由 [`ActiveTaskGuard`] 在析构时维护，因此即使任务 panic，`wait_for_idle` 也不会永久阻塞。

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::{config::ShutdownMode, exception::Exception, queue::TaskQueue};

type Action = Box<dyn FnOnce() + Send + 'static>;

/// 一个待执行的工作单元，只会被某个工作线程执行一次。
pub struct Task {
    id: u64,
    action: Action,
}

impl Task {
    pub fn new<F>(id: u64, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            action: Box::new(action),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn run(self) {
        (self.action)()
    }
}

struct PoolShared {
    queue: TaskQueue<Task>,
    active: Mutex<usize>,
    all_completed: Condvar,
    completed: AtomicU64,
    next_id: AtomicU64,
}

impl PoolShared {
    fn add_active(&self, n: usize) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) += n;
    }

    fn finish_active(&self, n: usize) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(n);
        if *active == 0 {
            self.all_completed.notify_all();
        }
    }
}

/// 任务执行期间持有；无论任务正常返回还是 panic 都会在析构时归还活跃计数。
struct ActiveTaskGuard<'a> {
    shared: &'a PoolShared,
    worker: usize,
    task_id: u64,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(
                "[worker{}]任务[ID{}]执行时发生panic，该工作线程将退出",
                self.worker, self.task_id
            );
        } else {
            self.shared.completed.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.finish_active(1);
    }
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    mode: ShutdownMode,
}

impl WorkerPool {
    /// 创建队列并启动 `worker_count` 个工作线程。`worker_count` 为 0 时返回 `InvalidInput`。
    pub fn start(
        worker_count: usize,
        queue_capacity: usize,
        mode: ShutdownMode,
    ) -> io::Result<Self> {
        if worker_count == 0 {
            error!("线程池至少需要1个工作线程");
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker_count must be at least 1",
            ));
        }
        let shared = Arc::new(PoolShared {
            queue: TaskQueue::with_capacity(queue_capacity),
            active: Mutex::new(0),
            all_completed: Condvar::new(),
            completed: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let shared_clone = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", worker))
                .spawn(move || worker_loop(worker, shared_clone));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("无法创建第{}个工作线程：{}", worker, e);
                    shared.queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }
        info!(
            "线程池已启动：{}个工作线程，队列容量{}，停机模式{:?}",
            worker_count, queue_capacity, mode
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
            mode,
        })
    }

    /// 提交一个任务，返回任务 ID。队列已满时阻塞，线程池关闭后返回 `PoolShutDown`。
    pub fn submit<F>(&self, action: F) -> Result<u64, Exception>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        // 先计数再入队，避免工作线程在计数之前就完成了任务
        self.shared.add_active(1);
        match self.shared.queue.submit(Task::new(id, action)) {
            Ok(()) => {
                debug!("任务[ID{}]已入队", id);
                Ok(id)
            }
            Err(e) => {
                self.shared.finish_active(1);
                warn!("任务[ID{}]提交失败：{}", id, e);
                Err(e)
            }
        }
    }

    /// 阻塞直到所有已提交的任务都执行完毕。
    pub fn wait_for_idle(&self) {
        let mut active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *active > 0 {
            active = self
                .shared
                .all_completed
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 按配置的停机模式关闭线程池，并等待所有工作线程退出。重复调用无副作用。
    pub fn shutdown(&self) {
        self.stop(self.mode);
    }

    fn stop(&self, mode: ShutdownMode) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }

        if mode == ShutdownMode::Drain {
            debug!("等待剩余的{}个任务执行完毕", self.active_tasks());
            self.wait_for_idle();
        }
        self.shared.queue.close();

        for handle in handles {
            if handle.join().is_err() {
                warn!("有工作线程因任务panic而提前退出");
            }
        }

        let dropped = self.shared.queue.drain_remaining();
        if !dropped.is_empty() {
            warn!("停机时丢弃了{}个尚未执行的任务", dropped.len());
            self.shared.finish_active(dropped.len());
        }
        info!(
            "线程池已关闭，共完成{}个任务",
            self.shared.completed.load(Ordering::Relaxed)
        );
    }
}

impl WorkerPool {
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn active_tasks(&self) -> usize {
        *self
            .shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.is_closed()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop(ShutdownMode::Drop);
    }
}

fn worker_loop(worker: usize, shared: Arc<PoolShared>) {
    debug!("[worker{}]已就绪", worker);
    while let Some(task) = shared.queue.take_next() {
        let _guard = ActiveTaskGuard {
            shared: &shared,
            worker,
            task_id: task.id(),
        };
        debug!("[worker{}]开始执行任务[ID{}]", worker, task.id());
        task.run();
    }
    debug!("[worker{}]收到停机信号，退出", worker);
}
