//! Per-connection state (spec §3/§4.5), grounded on the original's `conn`
//! struct (`connection_unix.go`: fd, `localAddr`/`remoteAddr`, in/out
//! ring buffers, a back-reference to its loop).

use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use crate::buffer::RingBuffer;
use crate::ready::Ready;

/// A single established connection, owned by exactly one
/// [`EventLoop`](crate::eventloop::EventLoop)'s connection map (spec §3
/// invariant: a fd lives in at most one loop's map at a time).
///
/// Holds no reference back to its loop (spec §9 Design Notes, "Cyclic
/// references"): the owning loop addresses it only through `fd`, its key in
/// that loop's `IndexMap`.
pub struct Connection<H: crate::handler::EventHandler> {
    pub(crate) fd: RawFd,
    pub(crate) addr: SocketAddr,
    pub(crate) loop_index: isize,
    pub(crate) inbound: RingBuffer,
    pub(crate) outbound: RingBuffer,
    pub(crate) opened: bool,
    /// What the poller currently has registered for this fd: readable-only
    /// or read+write. Tracked so `loopRead`/`loopWrite` only call
    /// `modReadWrite`/`modRead` on an actual transition (spec §4.2 Interest
    /// operations rationale: "spurious rearms cost syscalls").
    pub(crate) interest: Ready,
    /// Set once `Action::Close` is returned by a handler callback; honored
    /// once the outbound buffer has fully drained.
    pub(crate) closing: bool,
    pub ctx: H::Context,
}

impl<H: crate::handler::EventHandler> Connection<H> {
    pub(crate) fn new(fd: RawFd, addr: SocketAddr, loop_index: isize) -> Connection<H> {
        Connection {
            fd,
            addr,
            loop_index,
            inbound: RingBuffer::new(),
            outbound: RingBuffer::new(),
            opened: false,
            interest: Ready::readable(),
            closing: false,
            ctx: H::Context::default(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Index of the sub-reactor (or -1 for the main reactor) that owns this
    /// connection. Never changes across the connection's lifetime.
    pub fn loop_index(&self) -> isize {
        self.loop_index
    }

    /// Appends encoded bytes to the outbound buffer; the caller
    /// (`loopOpen`/`loopRead`'s handler-output path) is responsible for
    /// upgrading poller interest if this moves the buffer from empty to
    /// non-empty.
    pub fn write(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.outbound.append(bytes);
        }
    }

    pub fn close_after_flush(&mut self) {
        self.closing = true;
    }
}
