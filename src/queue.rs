//! MPSC task queue (spec §4.1), grounded on the teacher's own
//! `concurrent-queue` dependency (declared in `Cargo.toml`) and on the
//! wake-coalescing `Queue<T>` wrapper in `src/queue/mpsc.rs`, which pairs an
//! MPSC queue with a pending counter and an `Awakener`. Here the wake
//! primitive lives in [`crate::waker::Waker`] instead, so this module is
//! just the queue half of that pair.

use concurrent_queue::ConcurrentQueue;

use crate::error::Result;

/// A deferred unit of work run on the owning reactor's thread. Returning
/// `Err(Error::Shutdown)` unwinds that reactor's poll loop (spec §4.1/§7).
pub type Task = Box<dyn FnOnce() -> Result<()> + Send>;

/// Multi-producer, single-consumer queue of [`Task`]s.
///
/// `push` is safe from any thread, never blocks, and never drops a task
/// (`ConcurrentQueue::unbounded` never rejects a push). `pop` must only be
/// called by the owning reactor. Ordering is FIFO per producer; no
/// cross-thread ordering is implied, matching spec §4.1.
pub struct TaskQueue {
    inner: ConcurrentQueue<Task>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue {
            inner: ConcurrentQueue::unbounded(),
        }
    }

    pub fn push(&self, task: Task) {
        // An unbounded queue only errs once closed, which this type never does.
        let _ = self.inner.push(task);
    }

    pub fn pop(&self) -> Option<Task> {
        self.inner.pop().ok()
    }

    /// Advisory only; may race with concurrent pushes (spec §4.1).
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        TaskQueue::new()
    }
}
