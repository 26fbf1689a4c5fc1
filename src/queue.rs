//! # 有界任务队列
//!
//! 固定容量的环形缓冲区，所有访问都经过同一把互斥锁，配合两个条件变量：
//! - `not_empty`：消费者在队列为空时等待；
//! - `not_full`：生产者在队列已满时等待。
//!
//! `front == rear` 表示队列为空；`(rear + 1) % C == front` 表示队列已满，
//! 因此总会保留一个空槽位，实际可用容量为 `C - 1`。

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::exception::Exception;

struct QueueState<T> {
    slots: Vec<Option<T>>,
    front: usize,
    rear: usize,
    closed: bool,
}

impl<T> QueueState<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        (self.rear + self.capacity() - self.front) % self.capacity()
    }

    fn is_empty(&self) -> bool {
        self.front == self.rear
    }

    fn is_full(&self) -> bool {
        (self.rear + 1) % self.capacity() == self.front
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.front].take();
        self.front = (self.front + 1) % self.capacity();
        item
    }
}

pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> TaskQueue<T> {
    /// 创建容量为 `capacity` 的队列，实际最多可容纳 `capacity - 1` 个元素。
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity < 2 {
            panic!("环形队列的容量至少为2，当前为{}", capacity);
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            state: Mutex::new(QueueState {
                slots,
                front: 0,
                rear: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // 持锁期间不会执行任何用户代码，被污染的锁里的状态依然一致
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 把元素追加到队尾。队列已满时阻塞调用者，队列关闭后返回 `PoolShutDown`。
    pub fn submit(&self, item: T) -> Result<(), Exception> {
        let mut state = self.lock();
        while state.is_full() && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(Exception::PoolShutDown);
        }
        let rear = state.rear;
        state.slots[rear] = Some(item);
        state.rear = (rear + 1) % state.capacity();
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 取出队首元素。队列为空时阻塞；队列关闭后立即返回 `None`，不再交付剩余元素。
    pub fn take_next(&self) -> Option<T> {
        let mut state = self.lock();
        while state.is_empty() && !state.closed {
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return None;
        }
        let item = state.pop_front();
        drop(state);
        self.not_full.notify_one();
        item
    }

    /// 关闭队列并唤醒所有等待中的生产者和消费者。
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// 取走关闭后仍留在队列中的元素。
    pub fn drain_remaining(&self) -> Vec<T> {
        let mut state = self.lock();
        let mut remaining = Vec::with_capacity(state.len());
        while let Some(item) = state.pop_front() {
            remaining.push(item);
        }
        remaining
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
