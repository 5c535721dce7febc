//! The listening socket, grounded on the original's `listener_unix.go`
//! (`listener` struct: fd, `lnaddr`, `reusePort`, a `sync.Once`-guarded
//! close).

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::sys::socket;

pub struct Listener {
    // `Mutex<Option<..>>` rather than a bare `StdTcpListener` so that
    // `close` (called from `&self`, possibly racing a concurrent `accept`
    // during shutdown) can `take()` and drop the socket exactly once,
    // instead of closing the cached raw fd out from under a socket object
    // that would then double-close it on its own `Drop`.
    inner: Mutex<Option<StdTcpListener>>,
    raw_fd: RawFd,
    addr: SocketAddr,
    reuse_port: bool,
    closed: AtomicBool,
}

impl Listener {
    /// Resolves `addr`, binds and listens. When `reuse_port` is set the
    /// caller may construct additional `Listener`s on the same address —
    /// used by reuse-port mode, where every reactor owns its own listener
    /// (spec §4.7 `activateEventLoops`).
    pub fn bind(addr: &str, reuse_port: bool) -> Result<Listener> {
        use std::os::unix::io::AsRawFd;

        let (inner, resolved) = socket::bind_tcp_listener(addr, reuse_port)?;
        let raw_fd = inner.as_raw_fd();
        Ok(Listener {
            inner: Mutex::new(Some(inner)),
            raw_fd,
            addr: resolved,
            reuse_port,
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn reuse_port(&self) -> bool {
        self.reuse_port
    }

    /// Stable even after `close()` — solely an identifier for removing
    /// this fd from a poller's interest set, never dereferenced directly.
    pub fn as_raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    pub fn accept(&self) -> io::Result<(std::net::TcpStream, SocketAddr)> {
        match self.inner.lock().unwrap().as_ref() {
            Some(listener) => listener.accept(),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    /// Idempotent; only the first call actually closes the fd.
    pub fn close(&self) {
        if self.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            self.inner.lock().unwrap().take();
        }
    }
}

#[cfg(test)]
mod test {
    use super::Listener;

    #[test]
    fn bind_ephemeral() {
        let listener = Listener::bind("127.0.0.1:0", false).unwrap();
        assert!(listener.local_addr().port() > 0);
        listener.close();
        listener.close();
    }
}
