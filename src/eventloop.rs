//! The reactor's per-fd state machine (spec §4.3), grounded on the
//! original's `eventloop_unix.go` (`loopRead`/`loopWrite`/`loopAccept`/
//! `loopOpen`/`loopCloseConn`/`loopTicker`) driven by `eventloop.go`'s
//! dispatch switch, replayed over [`crate::poller::Poller`].

use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{trace, warn};

use crate::balancer::LoadBalancer;
use crate::codec::Codec;
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::handler::{Action, EventHandler};
use crate::listener::Listener;
use crate::poller::{PollEvent, Poller, Trigger};
use crate::ready::Ready;
use crate::server::ShutdownSignal;
use crate::sys::epoll;
use crate::sys::socket;

/// Index reserved for the main (accept-only) reactor; sub-reactors are
/// numbered `0..N` (spec §3 `EventLoop` attributes).
pub const MAIN_LOOP_INDEX: isize = -1;

/// The main reactor's routing table: how it turns an accepted connection
/// into a cross-thread handoff to the sub-reactor the load balancer picked.
/// Not part of spec §4.4's `LoadBalancer` interface itself — `next()`
/// there only *names* a target; the handoff channel is this crate's
/// concrete realization of spec §4.6 step 6's "construct, then trigger".
pub(crate) struct RouteTable<H: EventHandler> {
    pub(crate) balancer: Arc<dyn LoadBalancer>,
    pub(crate) pending_txs: Vec<Sender<Connection<H>>>,
}

/// One reactor: a poller, a connection map it exclusively owns, a reusable
/// scratch read buffer, and the shared handler/codec/load-balancer it
/// dispatches into (spec §3 `EventLoop` invariants).
pub struct EventLoop<H: EventHandler> {
    index: isize,
    poller: Poller,
    listener: Option<Arc<Listener>>,
    connections: IndexMap<RawFd, Connection<H>>,
    read_buf: Vec<u8>,
    handler: Arc<H>,
    codec: Arc<dyn Codec>,
    balancer: Arc<dyn LoadBalancer>,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
    shutdown_signal: Arc<ShutdownSignal>,
    /// Present only on the main reactor (non-reuse-port mode): how it
    /// routes a freshly accepted fd to its target sub-reactor.
    route: Option<RouteTable<H>>,
    /// Present only on sub-reactors in non-reuse-port mode: the receiving
    /// end of the main reactor's handoff channel.
    pending_rx: Option<Receiver<Connection<H>>>,
    /// Only loop 0 gets this, and only when `Config::ticker` is enabled.
    ticker_tx: Option<Sender<Duration>>,
}

impl<H: EventHandler> EventLoop<H> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: isize,
        listener: Option<Arc<Listener>>,
        read_buffer_cap: usize,
        handler: Arc<H>,
        codec: Arc<dyn Codec>,
        balancer: Arc<dyn LoadBalancer>,
        tcp_nodelay: bool,
        tcp_keepalive: Option<Duration>,
        shutdown_signal: Arc<ShutdownSignal>,
        route: Option<RouteTable<H>>,
        pending_rx: Option<Receiver<Connection<H>>>,
    ) -> Result<EventLoop<H>> {
        let poller = Poller::open()?;

        if let Some(listener) = &listener {
            poller.add_read(listener.as_raw_fd())?;
        }

        Ok(EventLoop {
            index,
            poller,
            listener,
            connections: IndexMap::new(),
            read_buf: vec![0u8; read_buffer_cap],
            handler,
            codec,
            balancer,
            tcp_nodelay,
            tcp_keepalive,
            shutdown_signal,
            route,
            pending_rx,
            ticker_tx: None,
        })
    }

    pub(crate) fn trigger_handle(&self) -> Trigger {
        self.poller.trigger_handle()
    }

    pub(crate) fn set_ticker_tx(&mut self, tx: Sender<Duration>) {
        self.ticker_tx = Some(tx);
    }

    pub fn index(&self) -> isize {
        self.index
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs this reactor's poll loop to completion (spec §4.3 `run`).
    /// `lock_thread` pins the calling kernel thread to a CPU core
    /// (`Config::lock_os_thread`).
    pub fn run(&mut self, lock_thread: bool) -> Result<()> {
        if lock_thread {
            pin_to_core(self.index);
        }

        if self.index == 0 {
            if let Some(tx) = &self.ticker_tx {
                let (duration, action) = self.handler.tick();
                if action == Action::Shutdown {
                    self.shutdown_signal.request();
                }
                let _ = tx.send(duration);
            }
        }

        let epfd = self.poller.epoll_fd();

        let EventLoop {
            poller,
            listener,
            connections,
            read_buf,
            handler,
            codec,
            balancer,
            tcp_nodelay,
            tcp_keepalive,
            shutdown_signal,
            route,
            pending_rx,
            index,
            ..
        } = self;

        let tcp_nodelay = *tcp_nodelay;
        let tcp_keepalive = *tcp_keepalive;
        let loop_index = *index;

        let result = poller.run(|event| match event {
            PollEvent::Fd(fd, ready) => {
                if connections.contains_key(&fd) {
                    dispatch_conn(
                        fd,
                        ready,
                        epfd,
                        connections,
                        read_buf,
                        handler.as_ref(),
                        codec.as_ref(),
                        balancer.as_ref(),
                        shutdown_signal,
                    )
                } else if let Some(listener) = listener.as_ref() {
                    if fd != listener.as_raw_fd() {
                        return Ok(());
                    }
                    match route.as_ref() {
                        Some(route) => accept_and_route(listener, route, tcp_nodelay, tcp_keepalive),
                        None => accept_local(
                            listener,
                            epfd,
                            connections,
                            handler.as_ref(),
                            codec.as_ref(),
                            balancer.as_ref(),
                            shutdown_signal,
                            loop_index,
                            tcp_nodelay,
                            tcp_keepalive,
                        ),
                    }
                } else {
                    Ok(())
                }
            }
            PollEvent::Woken => {
                let Some(rx) = pending_rx.as_ref() else {
                    return Ok(());
                };
                while let Ok(conn) = rx.try_recv() {
                    adopt_connection(
                        conn.fd,
                        conn,
                        epfd,
                        connections,
                        handler.as_ref(),
                        codec.as_ref(),
                        balancer.as_ref(),
                        shutdown_signal,
                        loop_index,
                    )?;
                }
                Ok(())
            }
        });

        // Whatever unwound the poll loop, any connections this reactor
        // still owns need a real closeConn pass — fd deleted from the
        // poller, OS-closed, handler notified — so shutdown (spec §8
        // scenario 4) never leaves `on_closed` uncalled for live
        // connections.
        let remaining: Vec<RawFd> = connections.keys().copied().collect();
        for fd in remaining {
            close_conn(fd, epfd, connections, handler.as_ref(), balancer.as_ref(), None);
        }

        match result {
            Ok(()) => Ok(()),
            Err(Error::Shutdown) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn pin_to_core(loop_index: isize) {
    if let Some(ids) = core_affinity::get_core_ids() {
        if !ids.is_empty() {
            let id = ids[loop_index.max(0) as usize % ids.len()];
            core_affinity::set_for_current(id);
        }
    }
}

/// Main-reactor accept path (spec §4.6). Loops on `accept` until `EAGAIN`
/// (spec §9 Open Question resolution, satisfying scenario 6: all of a
/// simultaneous backlog is drained before the next poll wait), asks the
/// load balancer for a target, and hands the connection off through that
/// target's typed channel plus a bare wake `Trigger` — never touching the
/// target sub-reactor's connection map directly (spec §4.6 rationale: fd
/// registration and map insertion must happen on the owning thread).
fn accept_and_route<H: EventHandler>(
    listener: &Listener,
    route: &RouteTable<H>,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
) -> Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("failed to mark accepted socket non-blocking: {e}");
                    continue;
                }
                apply_socket_opts(&stream, tcp_nodelay, tcp_keepalive);

                let target = route.balancer.next(&addr);
                let fd = stream.into_raw_fd();
                let conn = Connection::new(fd, addr, target.index as isize);

                if route.pending_txs[target.index].send(conn).is_err() {
                    unsafe {
                        libc::close(fd);
                    }
                    continue;
                }

                if target.trigger.trigger(Box::new(|| Ok(()))).is_err() {
                    warn!("failed to wake target reactor for accepted connection");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                warn!("accept failed: {e}");
                return Err(Error::AcceptSocket);
            }
        }
    }
}

/// Reuse-port accept path: the loop owns its own listener, so the accepted
/// connection is adopted directly, with no cross-thread handoff.
#[allow(clippy::too_many_arguments)]
fn accept_local<H: EventHandler>(
    listener: &Listener,
    epfd: RawFd,
    connections: &mut IndexMap<RawFd, Connection<H>>,
    handler: &H,
    codec: &dyn Codec,
    balancer: &dyn LoadBalancer,
    shutdown_signal: &ShutdownSignal,
    loop_index: isize,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
) -> Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("failed to mark accepted socket non-blocking: {e}");
                    continue;
                }
                apply_socket_opts(&stream, tcp_nodelay, tcp_keepalive);

                let fd = stream.into_raw_fd();
                let conn = Connection::new(fd, addr, loop_index);
                adopt_connection(fd, conn, epfd, connections, handler, codec, balancer, shutdown_signal, loop_index)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                warn!("accept failed: {e}");
                return Err(Error::AcceptSocket);
            }
        }
    }
}

fn apply_socket_opts(stream: &std::net::TcpStream, tcp_nodelay: bool, tcp_keepalive: Option<Duration>) {
    if tcp_nodelay {
        let _ = socket::set_nodelay(stream, true);
    }
    if let Some(d) = tcp_keepalive {
        let _ = socket::set_keepalive(stream, d);
    }
}

/// `loopOpen` (spec §4.3): registers `fd`/`conn` into this loop's map and
/// poller, then invokes the handler's `on_opened`. Always runs on the
/// owning reactor's own thread — either directly (reuse-port accept) or
/// from the `on_woken` hook draining the cross-thread handoff channel.
#[allow(clippy::too_many_arguments)]
fn adopt_connection<H: EventHandler>(
    fd: RawFd,
    mut conn: Connection<H>,
    epfd: RawFd,
    connections: &mut IndexMap<RawFd, Connection<H>>,
    handler: &H,
    codec: &dyn Codec,
    balancer: &dyn LoadBalancer,
    shutdown_signal: &ShutdownSignal,
    loop_index: isize,
) -> Result<()> {
    if let Err(e) = epoll::ctl_add(epfd, fd, Ready::readable()) {
        warn!("failed to register accepted fd with poller: {e}");
        unsafe {
            libc::close(fd);
        }
        return Ok(());
    }

    conn.opened = true;
    let conn = connections.entry(fd).or_insert(conn);

    let (out, action) = handler.on_opened(conn);
    conn.write(&codec.encode(&out));

    if !conn.outbound.is_empty() && conn.interest == Ready::readable() {
        if epoll::ctl_modify(epfd, fd, Ready::read_write()).is_ok() {
            conn.interest = Ready::read_write();
        }
    }

    balancer.calibrate(loop_index.max(0) as usize, 1);

    match action {
        Action::Close => conn.close_after_flush(),
        Action::Shutdown => shutdown_signal.request(),
        Action::None => {}
    }

    let should_close_now = connections
        .get(&fd)
        .map(|conn| conn.closing && conn.outbound.is_empty())
        .unwrap_or(false);

    if should_close_now {
        close_conn(fd, epfd, connections, handler, balancer, None);
    }

    Ok(())
}

/// Per-connection dispatch for an fd already in the loop's map (spec §4.3
/// "Per-connection dispatch, event ordering" / invariants P4, P5).
#[allow(clippy::too_many_arguments)]
fn dispatch_conn<H: EventHandler>(
    fd: RawFd,
    ready: Ready,
    epfd: RawFd,
    connections: &mut IndexMap<RawFd, Connection<H>>,
    read_buf: &mut [u8],
    handler: &H,
    codec: &dyn Codec,
    balancer: &dyn LoadBalancer,
    shutdown_signal: &ShutdownSignal,
) -> Result<()> {
    // P4: write before read when both are present — a peer close can
    // coalesce HUP/ERR/OUT/IN into a single event, and loopWrite is
    // responsible for flushing whatever is still queued before the
    // connection is torn down.
    let mut close_reason: Option<Option<Error>> = None;

    if ready.is_out_events() {
        if let Some(err) = loop_write(fd, epfd, connections) {
            close_reason = Some(err);
        }
    }

    // P5: read only when there is no outbound backpressure — IN present
    // AND (OUT absent OR outbound buffer empty). If OUT is absent we must
    // still read regardless, or a send buffer that's stuck full with no
    // further OUT events would deadlock the connection.
    if close_reason.is_none() {
        let outbound_empty = connections.get(&fd).map(|c| c.outbound.is_empty()).unwrap_or(true);
        if should_attempt_read(ready, outbound_empty) {
            if let Some(err) = loop_read(fd, epfd, connections, read_buf, handler, codec, shutdown_signal) {
                close_reason = Some(err);
            }
        }
    }

    if close_reason.is_none() {
        if let Some(conn) = connections.get(&fd) {
            if conn.closing && conn.outbound.is_empty() {
                close_reason = Some(None);
            }
        }
    }

    if let Some(err) = close_reason {
        close_conn(fd, epfd, connections, handler, balancer, err.as_ref());
    }

    Ok(())
}

/// P5's read-fallback decision, snapshotted post-write: read whenever IN is
/// present, except when OUT is also present and the outbound buffer is
/// still non-empty after `loop_write` had its chance to drain it.
#[inline]
fn should_attempt_read(ready: Ready, outbound_empty_after_write: bool) -> bool {
    ready.is_in_events() && (!ready.is_out_events() || outbound_empty_after_write)
}

/// Reads into the shared scratch buffer, decodes frames, dispatches each to
/// `handler.react`. Returns `Some(reason)` if the connection should close
/// (`None` reason for a clean 0-byte read).
#[allow(clippy::too_many_arguments)]
fn loop_read<H: EventHandler>(
    fd: RawFd,
    epfd: RawFd,
    connections: &mut IndexMap<RawFd, Connection<H>>,
    read_buf: &mut [u8],
    handler: &H,
    codec: &dyn Codec,
    shutdown_signal: &ShutdownSignal,
) -> Option<Option<Error>> {
    use std::io::Read;

    loop {
        let mut stream = borrow_stream(fd);

        match stream.read(read_buf) {
            Ok(0) => return Some(None),
            Ok(n) => {
                let Some(conn) = connections.get_mut(&fd) else {
                    return None;
                };
                conn.inbound.append(&read_buf[..n]);

                while let Some(frame) = codec.decode(&mut conn.inbound) {
                    let (out, action) = handler.react(&frame, conn);
                    conn.write(&codec.encode(&out));

                    match action {
                        Action::Close => conn.close_after_flush(),
                        Action::Shutdown => shutdown_signal.request(),
                        Action::None => {}
                    }
                }

                if !conn.outbound.is_empty() && conn.interest == Ready::readable() {
                    if epoll::ctl_modify(epfd, fd, Ready::read_write()).is_ok() {
                        conn.interest = Ready::read_write();
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return None,
            Err(e) => return Some(Some(Error::Io(e))),
        }
    }
}

/// Writes as much of the outbound buffer as the kernel accepts. Returns
/// `Some(reason)` if the connection should close.
fn loop_write<H: EventHandler>(
    fd: RawFd,
    epfd: RawFd,
    connections: &mut IndexMap<RawFd, Connection<H>>,
) -> Option<Option<Error>> {
    use std::io::Write;

    let Some(conn) = connections.get_mut(&fd) else {
        return None;
    };

    if conn.outbound.is_empty() {
        return None;
    }

    let mut stream = borrow_stream(fd);

    loop {
        let (a, _b) = conn.outbound.as_slices();
        if a.is_empty() {
            break;
        }

        match stream.write(a) {
            Ok(0) => return Some(None),
            Ok(n) => conn.outbound.advance(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Some(Some(Error::Io(e))),
        }
    }

    if conn.outbound.is_empty() && conn.interest == Ready::read_write() {
        if epoll::ctl_modify(epfd, fd, Ready::readable()).is_ok() {
            conn.interest = Ready::readable();
        }
    }

    None
}

fn close_conn<H: EventHandler>(
    fd: RawFd,
    epfd: RawFd,
    connections: &mut IndexMap<RawFd, Connection<H>>,
    handler: &H,
    balancer: &dyn LoadBalancer,
    err: Option<&Error>,
) {
    if let Some(conn) = connections.shift_remove(&fd) {
        let _ = epoll::ctl_delete(epfd, fd);
        unsafe {
            libc::close(fd);
        }
        handler.on_closed(&conn, err);
        balancer.calibrate(conn.loop_index.max(0) as usize, -1);
        trace!("closed connection fd={fd}");
    }
}

/// Borrows `fd` as a `TcpStream` just long enough to call a `Read`/`Write`
/// method; `ManuallyDrop` keeps std from closing it out from under the
/// connection map when the borrow goes out of scope. Mirrors the ownership
/// transfer already used by `sys::fd::FileDesc`, here applied to a fd this
/// crate does not otherwise wrap in an owning type.
fn borrow_stream(fd: RawFd) -> ManuallyDrop<std::net::TcpStream> {
    ManuallyDrop::new(unsafe { std::net::TcpStream::from_raw_fd(fd) })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::balancer::RoundRobin;
    use crate::codec::PassThroughCodec;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// P5 (read fallback under write pressure): read is skipped only when
    /// OUT is present and the outbound buffer is still non-empty after the
    /// write pass; every other combination reads regardless.
    #[test]
    fn p5_read_fallback_table() {
        let in_only = Ready::readable();
        let in_and_out = Ready::readable() | Ready::writable();

        assert!(should_attempt_read(in_only, true));
        assert!(should_attempt_read(in_only, false));
        assert!(should_attempt_read(in_and_out, true));
        assert!(!should_attempt_read(in_and_out, false));
        assert!(!should_attempt_read(Ready::writable(), true));
    }

    #[derive(Default)]
    struct Recording {
        reacted: AtomicBool,
    }

    impl EventHandler for Recording {
        type Context = ();

        fn react(&self, frame: &[u8], _conn: &mut Connection<Self>) -> (Vec<u8>, Action) {
            self.reacted.store(true, Ordering::SeqCst);
            (frame.to_vec(), Action::None)
        }
    }

    /// P4 in practice: a single `dispatch_conn` call presented with both OUT
    /// and IN readiness flushes the queued outbound bytes *and* runs the
    /// read/react path in that same call, because the small write drains
    /// completely and satisfies P5's fallback condition.
    #[test]
    fn dispatch_conn_writes_then_reads_in_one_pass() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_stream, addr) = listener.accept().unwrap();
        server_stream.set_nonblocking(true).unwrap();

        client.write_all(b"ping").unwrap();

        let fd = server_stream.into_raw_fd();
        let mut connections: IndexMap<RawFd, Connection<Recording>> = IndexMap::new();
        let mut conn = Connection::new(fd, addr, 0);
        conn.write(b"pong");
        connections.insert(fd, conn);

        let poller = Poller::open().unwrap();
        let epfd = poller.epoll_fd();
        let handler = Recording::default();
        let codec = PassThroughCodec;
        let balancer = RoundRobin::new();
        let shutdown_signal = ShutdownSignal::new();
        let mut read_buf = vec![0u8; 1024];

        dispatch_conn(
            fd,
            Ready::readable() | Ready::writable(),
            epfd,
            &mut connections,
            &mut read_buf,
            &handler,
            &codec,
            &balancer,
            &shutdown_signal,
        )
        .unwrap();

        assert!(handler.reacted.load(Ordering::SeqCst));
        let conn = connections.get(&fd).expect("connection still open");
        assert!(conn.outbound.is_empty(), "the queued write should have drained");

        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"ping");

        unsafe {
            libc::close(fd);
        }
    }
}
