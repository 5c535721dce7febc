//! The wake primitive, grounded on the teacher's `src/awakener.rs` /
//! `src/waker.rs` (an `Arc<EventFd>` wrapping `wakeup`/`finish`) and the
//! original's `internal/netpoll/epoll.go` `Trigger`/wake-coalescing logic
//! (`netpollWakeSig` CAS around the eventfd write).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::sys::eventfd::EventFd;

/// A kernel counting notifier, readable by the owning reactor and writable
/// by any thread, paired with an armed flag so that concurrent writers
/// coalesce into at most one pending wake (spec §4.2 protocol, invariant P3).
#[derive(Clone)]
pub struct Waker {
    inner: Arc<WakerInner>,
}

struct WakerInner {
    eventfd: EventFd,
    armed: AtomicBool,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        Ok(Waker {
            inner: Arc::new(WakerInner {
                eventfd: EventFd::new()?,
                armed: AtomicBool::new(false),
            }),
        })
    }

    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.inner.eventfd.as_raw_fd()
    }

    /// Step T2 of the wake protocol: CAS `armed` from false to true and, only
    /// on success, write the eventfd. A writer that loses the CAS knows a
    /// wake is already in flight and skips the syscall — this is the
    /// coalescing that makes P3 hold.
    pub fn wake(&self) -> io::Result<()> {
        if self
            .inner
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.eventfd.write(1)?;
        }
        Ok(())
    }

    /// Drains the eventfd counter. Called by the owning reactor once per
    /// wake event, before draining the task queue.
    pub fn drain(&self) -> io::Result<()> {
        self.inner.eventfd.read()?;
        Ok(())
    }

    /// Step T3: clear `armed` after the drain. If the task queue is still
    /// non-empty afterwards the caller must re-wake (see
    /// [`Poller::drain_tasks`](crate::poller::Poller)) to close the race
    /// where a producer observed `armed == true` and skipped its write just
    /// before this clear.
    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::Waker;

    #[test]
    fn second_wake_while_armed_is_a_no_op() {
        let waker = Waker::new().unwrap();
        waker.wake().unwrap();
        waker.wake().unwrap();

        assert_eq!(waker.inner.eventfd.read().unwrap(), 1);
    }

    #[test]
    fn wake_after_disarm_fires_again() {
        let waker = Waker::new().unwrap();
        waker.wake().unwrap();
        waker.drain().unwrap();
        waker.disarm();
        waker.wake().unwrap();

        assert_eq!(waker.inner.eventfd.read().unwrap(), 1);
    }
}
