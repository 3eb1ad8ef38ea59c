//! Pending-task queues used by [`WorkerPool`](super::WorkerPool).
//!
//! Both are plain single-owner containers; the pool guards them with its
//! own mutex.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use super::Task;

/// Storage discipline for queued tasks.
pub trait TaskQueue: Send + 'static {
    fn push(&mut self, task: Task);

    fn pop(&mut self) -> Option<Task>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every queued task in pop order.
    fn drain(&mut self) -> Vec<Task> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(t) = self.pop() {
            out.push(t);
        }
        out
    }
}

// ── FIFO ─────────────────────────────────────────────────────

/// Arrival order, priority ignored.
#[derive(Default)]
pub struct FifoQueue {
    inner: VecDeque<Task>,
}

impl TaskQueue for FifoQueue {
    fn push(&mut self, task: Task) {
        self.inner.push_back(task);
    }

    fn pop(&mut self) -> Option<Task> {
        self.inner.pop_front()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn drain(&mut self) -> Vec<Task> {
        self.inner.drain(..).collect()
    }
}

// ── Priority heap ────────────────────────────────────────────

struct Entry {
    seq: u64,
    task: Task,
}

impl Entry {
    fn key(&self) -> (u8, u64) {
        (self.task.priority() as u8, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; the smallest (priority, seq) must win.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Highest band first, FIFO within a band.
#[derive(Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl TaskQueue for PriorityQueue {
    fn push(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Entry { seq, task });
    }

    fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|e| e.task)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}
