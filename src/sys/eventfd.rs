//! eventfd wrapper, grounded on the teacher's `src/sys/eventfd.rs`
//! (`EventFd::new` with `EFD_CLOEXEC | EFD_NONBLOCK`, 8-byte counter
//! read/write) and the original's `internal/netpoll/epoll.go` wake fd.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::sys::cvt;
use crate::sys::fd::FileDesc;

#[derive(Debug)]
pub struct EventFd {
    inner: FileDesc,
}

impl EventFd {
    /// Creates an eventfd with initval 0 and `EFD_CLOEXEC | EFD_NONBLOCK`.
    pub fn new() -> io::Result<EventFd> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = cvt!(libc::eventfd(0, flags))?;
        Ok(EventFd {
            inner: unsafe { FileDesc::new(fd) },
        })
    }

    /// Adds `val` to the kernel counter. Returns `Ok(())` on `EAGAIN`
    /// (counter would overflow) rather than surfacing it as an error, per
    /// spec's transient-OS-error policy.
    pub fn write(&self, val: u64) -> io::Result<()> {
        let buf = val.to_ne_bytes();
        match (&self.inner).write_all(&buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drains the kernel counter, returning its value (0 if nothing was pending).
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        match (&self.inner).read_exact(&mut buf) {
            Ok(()) => Ok(u64::from_ne_bytes(buf)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::EventFd;

    #[test]
    fn write_and_read() {
        let eventfd = EventFd::new().unwrap();
        eventfd.write(123).unwrap();
        assert_eq!(123, eventfd.read().unwrap());
    }

    #[test]
    fn read_when_empty_is_zero_not_error() {
        let eventfd = EventFd::new().unwrap();
        assert_eq!(0, eventfd.read().unwrap());
    }
}
