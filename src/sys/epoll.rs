//! Thin wrapper over Linux `epoll`, grounded on the teacher's
//! `src/sys/epoll.rs` (`epoll_create1`/`epoll_ctl`/`epoll_wait` via `libc`)
//! and the original's `internal/netpoll/epoll.go`.

use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use std::{cmp, io};

use libc::{self, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::ready::Ready;
use crate::sys::cvt;
use crate::token::Token;

pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = cvt!(libc::epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Epoll { epfd })
    }

    pub fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token.0 as u64,
        };
        cvt!(libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token.0 as u64,
        };
        cvt!(libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        // The event argument is ignored by the kernel for EPOLL_CTL_DEL on
        // modern Linux, but older kernels require a non-null pointer.
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        cvt!(libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event))?;
        Ok(())
    }

    /// Blocks until at least one fd is ready or the timeout elapses.
    /// `None` means block indefinitely; `Some(Duration::ZERO)` never blocks.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|d| cmp::min(d.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let n = cvt!(libc::epoll_wait(
            self.epfd,
            events.buf.as_mut_ptr(),
            events.buf.capacity() as i32,
            timeout_ms,
        ))
        .or_else(|e| {
            if e.kind() == io::ErrorKind::Interrupted {
                Ok(0)
            } else {
                Err(e)
            }
        })?;

        unsafe { events.buf.set_len(n as usize) };
        Ok(n as usize)
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// Raw-epfd control-plane calls, independent of any `&Poller`/`&Epoll`
/// borrow. Used by [`crate::eventloop`] so that a reactor's dispatch
/// closures can rearm interest for a connection's fd without holding a
/// borrow of the `Poller` that is, at that moment, already mutably
/// borrowed by its own `run()` call further up the stack — the epoll
/// control plane is kernel-serialized and safe to drive through a bare fd
/// (spec §4.2: these calls are only ever issued from the owning thread, a
/// discipline this crate upholds by construction, not by the type system).
pub(crate) fn ctl_add(epfd: RawFd, fd: RawFd, interest: Ready) -> io::Result<()> {
    let mut event = libc::epoll_event {
        events: interest_to_epoll(interest),
        u64: fd as u64,
    };
    cvt!(libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, fd, &mut event))?;
    Ok(())
}

pub(crate) fn ctl_modify(epfd: RawFd, fd: RawFd, interest: Ready) -> io::Result<()> {
    let mut event = libc::epoll_event {
        events: interest_to_epoll(interest),
        u64: fd as u64,
    };
    cvt!(libc::epoll_ctl(epfd, libc::EPOLL_CTL_MOD, fd, &mut event))?;
    Ok(())
}

pub(crate) fn ctl_delete(epfd: RawFd, fd: RawFd) -> io::Result<()> {
    let mut event = libc::epoll_event { events: 0, u64: 0 };
    cvt!(libc::epoll_ctl(epfd, libc::EPOLL_CTL_DEL, fd, &mut event))?;
    Ok(())
}

fn interest_to_epoll(interest: Ready) -> u32 {
    let mut kind = EPOLLET as u32;

    if interest.is_readable() {
        kind |= (EPOLLIN | EPOLLPRI) as u32;
    }

    if interest.is_writable() {
        kind |= EPOLLOUT as u32;
    }

    kind
}

fn epoll_to_ready(events: u32) -> Ready {
    let events = events as i32;
    let mut ready = Ready::empty();

    if events & (EPOLLIN | EPOLLPRI) != 0 {
        ready.insert(Ready::readable());
    }
    if events & EPOLLOUT != 0 {
        ready.insert(Ready::writable());
    }
    if events & EPOLLERR != 0 {
        ready.insert(Ready::error());
    }
    if events & (EPOLLHUP | EPOLLRDHUP) != 0 {
        ready.insert(Ready::hup());
    }

    ready
}

/// Resizable batch of raw epoll events. Doubles when fully filled, halves
/// when under half-filled, per spec §4.2 step 5 — always reallocating,
/// matching the original's `expand`/`shrink` (`make([]unix.EpollEvent, size)`).
pub struct Events {
    buf: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn get(&self, index: usize) -> Option<(Token, Ready)> {
        self.buf
            .get(index)
            .map(|e| (Token(e.u64 as usize), epoll_to_ready(e.events)))
    }

    pub fn expand(&mut self) {
        let new_cap = cmp::max(1, self.buf.capacity() * 2);
        self.buf = Vec::with_capacity(new_cap);
    }

    pub fn shrink(&mut self) {
        let new_cap = cmp::max(1, self.buf.capacity() / 2);
        self.buf = Vec::with_capacity(new_cap);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn epoll_create_and_close() {
        let epoll = Epoll::new().unwrap();
        assert!(epoll.as_raw_fd() >= 0);
    }

    #[test]
    fn event_mask_roundtrip() {
        let both = interest_to_epoll(Ready::readable() | Ready::writable());
        assert_eq!(both & EPOLLET as u32, EPOLLET as u32);
        assert_eq!(both & EPOLLIN as u32, EPOLLIN as u32);
        assert_eq!(both & EPOLLOUT as u32, EPOLLOUT as u32);
    }

    #[test]
    fn events_resize_always_reallocates() {
        let mut events = Events::with_capacity(128);
        let original_cap = events.capacity();
        events.expand();
        assert_eq!(events.capacity(), original_cap * 2);
        events.shrink();
        assert_eq!(events.capacity(), original_cap);
    }
}
