//! Bounded FIFO queues consulted in strict priority order.
//!
//! Backpressure contract: a full queue rejects new work with
//! [`Error::QueueFull`] instead of buffering unboundedly. FIFO order holds
//! only within one tier; there is no cross-priority ordering.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use pulse_core::{Error, Priority, Result};

use crate::task::ProcessingTask;

/// One bounded FIFO tier.
///
/// Lock discipline: the mutex guards push/pop only and is never held across
/// an await point.
pub struct BoundedQueue {
    priority: Priority,
    capacity: usize,
    inner: Mutex<VecDeque<ProcessingTask>>,
}

impl BoundedQueue {
    pub fn new(priority: Priority, capacity: usize) -> Self {
        Self {
            priority,
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Enqueue a task, failing immediately when the queue is full.
    pub fn push(&self, task: ProcessingTask) -> Result<()> {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.capacity {
            return Err(Error::QueueFull {
                priority: self.priority,
                capacity: self.capacity,
            });
        }
        queue.push_back(task);
        Ok(())
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<ProcessingTask> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Queue depths at a point in time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueDepths {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// The three priority tiers.
pub struct PriorityQueues {
    high: BoundedQueue,
    medium: BoundedQueue,
    low: BoundedQueue,
}

impl PriorityQueues {
    pub fn new(high_capacity: usize, medium_capacity: usize, low_capacity: usize) -> Self {
        Self {
            high: BoundedQueue::new(Priority::High, high_capacity),
            medium: BoundedQueue::new(Priority::Medium, medium_capacity),
            low: BoundedQueue::new(Priority::Low, low_capacity),
        }
    }

    fn tier(&self, priority: Priority) -> &BoundedQueue {
        match priority {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    /// Enqueue into the tier matching the task's priority.
    pub fn push(&self, task: ProcessingTask) -> Result<()> {
        self.tier(task.priority).push(task)
    }

    /// Non-blocking dequeue in strict High → Medium → Low order.
    ///
    /// A non-empty High queue is always served before Medium or Low in the
    /// same poll.
    pub fn try_pop_next(&self) -> Option<ProcessingTask> {
        for priority in Priority::ALL {
            if let Some(task) = self.tier(priority).try_pop() {
                return Some(task);
            }
        }
        None
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            high: self.high.len(),
            medium: self.medium.len(),
            low: self.low.len(),
        }
    }

    pub fn total_len(&self) -> usize {
        self.depths().total()
    }
}
